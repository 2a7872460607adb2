//! Socket seam between the driver and the network.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Fixed path of the subscription endpoint.
pub const WS_PATH: &str = "/ws";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that happened on an open transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text frame (binary frames are decoded as UTF-8).
    Text(String),
    /// The connection ended; `code` is `None` without a close frame.
    Closed {
        /// Peer's close code.
        code: Option<u16>,
    },
    /// Read failure. The transport is unusable afterwards.
    Error(ClientError),
}

/// An open, bidirectional text connection.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;
    /// Wait for the next event. Must be cancel-safe.
    async fn recv(&mut self) -> TransportEvent;
    /// Close politely. Errors are ignored.
    async fn close(&mut self);
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// Derive the WebSocket endpoint from an HTTP(S) base URL.
///
/// `http` becomes `ws`, `https` becomes `wss`, and the fixed `/ws` path is
/// appended. `ws`/`wss` URLs are accepted as-is apart from the path.
pub fn derive_ws_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| ClientError::InvalidUrl(base_url.to_string()))?;
    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(ClientError::InvalidUrl(base_url.to_string())),
    };
    if rest.is_empty() {
        return Err(ClientError::InvalidUrl(base_url.to_string()));
    }
    let rest = rest.strip_suffix(WS_PATH).unwrap_or(rest);
    Ok(format!("{ws_scheme}://{rest}{WS_PATH}"))
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `tokio-tungstenite` connector.
#[derive(Clone, Debug)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WsConnector {
    /// Connector with a custom handshake timeout.
    pub fn with_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| ClientError::ConnectTimeout(self.connect_timeout))??;
        debug!(url, "websocket connected");
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return TransportEvent::Text(text),
                    Err(_) => warn!(len = data.len(), "dropping non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return TransportEvent::Closed {
                        code: frame.map(|f| u16::from(f.code)),
                    };
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return TransportEvent::Error(e.into()),
                None => return TransportEvent::Closed { code: None },
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
