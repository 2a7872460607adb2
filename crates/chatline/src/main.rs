//! # chatline
//!
//! Chatline binary: runs the HTTP + WebSocket notification server, or follows
//! one conversation from the command line.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chatline_client::{ClientConnectionManager, ConnectionStatus};
use chatline_core::ConversationId;
use chatline_server::assistant::{AssistantBackend, HttpAssistant};
use chatline_server::config::ServerConfig;
use chatline_server::server::ChatServer;
use chatline_server::store::InMemoryConversationStore;
use chatline_settings::ChatlineSettings;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

/// Live conversation updates over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "chatline", about = "Live conversation updates over WebSocket")]
struct Cli {
    /// Settings file (defaults to `~/.chatline/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, overriding the settings file (`RUST_LOG` wins over both).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until Ctrl-C.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        /// Do not generate assistant replies even if one is configured.
        #[arg(long)]
        no_assistant: bool,
    },
    /// Follow one conversation and print every envelope as a JSON line.
    Watch {
        /// Conversation to follow.
        #[arg(long, short)]
        conversation: String,
        /// Server base URL (`http://` or `https://`).
        #[arg(long)]
        url: Option<String>,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<ChatlineSettings> {
    match path {
        Some(path) => chatline_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => chatline_settings::load_settings().context("Failed to load settings"),
    }
}

async fn serve(
    settings: &ChatlineSettings,
    host: Option<String>,
    port: Option<u16>,
    no_assistant: bool,
) -> Result<()> {
    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let metrics_handle = chatline_server::metrics::install_recorder();
    let mut server = ChatServer::new(config, Arc::new(InMemoryConversationStore::new()))
        .with_metrics(metrics_handle);

    if !no_assistant {
        if let Some(assistant) = HttpAssistant::from_settings(&settings.assistant)
            .context("Failed to build assistant client")?
        {
            tracing::info!(model = %settings.assistant.model, "assistant replies enabled");
            server = server.with_assistant(Arc::new(assistant) as Arc<dyn AssistantBackend>);
        }
    }

    let handle = server.listen().await.context("Failed to bind server")?;
    tracing::info!(addr = %handle.addr(), ws = %handle.ws_url(), "ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    handle.join().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn watch(settings: &ChatlineSettings, conversation: String, url: Option<String>) -> Result<()> {
    let mut client_settings = settings.client.clone();
    if let Some(url) = url {
        client_settings.base_url = url;
    }

    let manager = ClientConnectionManager::from_settings(
        &client_settings,
        Some(ConversationId::from(conversation)),
    )
    .context("Invalid server URL")?;
    let mut states = manager.watch_state();
    let mut envelopes = manager.subscribe_envelopes();
    manager.connect()?;

    let mut last_status = None;
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    bail!("connection driver stopped");
                }
                let state = states.borrow_and_update().clone();
                if last_status != Some(state.status) {
                    last_status = Some(state.status);
                    tracing::info!(
                        status = ?state.status,
                        subscribed = state.is_subscribed,
                        errors = state.error_count,
                        attempts = state.reconnect_attempts,
                        "connection status"
                    );
                }
                match state.status {
                    ConnectionStatus::Error => bail!(
                        "gave up after {} reconnection attempts",
                        state.reconnect_attempts
                    ),
                    ConnectionStatus::Closed => {
                        tracing::info!("server closed the connection");
                        return Ok(());
                    }
                    _ => {}
                }
            }
            envelope = envelopes.recv() => match envelope {
                Ok(envelope) => println!("{}", serde_json::to_string(&envelope)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind, envelopes skipped");
                }
                Err(RecvError::Closed) => bail!("connection driver stopped"),
            },
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                manager.shutdown()?;
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_ref())?;
    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    chatline_core::logging::init_subscriber(level);

    match cli.command {
        Command::Serve {
            host,
            port,
            no_assistant,
        } => serve(&settings, host, port, no_assistant).await,
        Command::Watch { conversation, url } => watch(&settings, conversation, url).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults_to_settings() {
        let cli = Cli::parse_from(["chatline", "serve"]);
        match cli.command {
            Command::Serve {
                host,
                port,
                no_assistant,
            } => {
                assert!(host.is_none());
                assert!(port.is_none());
                assert!(!no_assistant);
            }
            Command::Watch { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn serve_overrides() {
        let cli = Cli::parse_from(["chatline", "serve", "--host", "0.0.0.0", "--port", "8080"]);
        match cli.command {
            Command::Serve { host, port, .. } => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(8080));
            }
            Command::Watch { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn watch_requires_conversation() {
        assert!(Cli::try_parse_from(["chatline", "watch"]).is_err());
        let cli = Cli::parse_from(["chatline", "watch", "-c", "abc", "--url", "http://h:1"]);
        match cli.command {
            Command::Watch { conversation, url } => {
                assert_eq!(conversation, "abc");
                assert_eq!(url.as_deref(), Some("http://h:1"));
            }
            Command::Serve { .. } => panic!("expected watch"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["chatline", "serve", "--log-level", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["chatline"]).is_err());
    }

    #[test]
    fn settings_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4555}}"#).unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 4555);
    }

    #[test]
    fn bad_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{oops").unwrap();
        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
