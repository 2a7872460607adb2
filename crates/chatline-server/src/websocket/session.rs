//! WebSocket session lifecycle: one task per connected client, from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use chatline_core::ConnectionId;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, ReadyState};
use super::protocol::SubscriptionProtocol;
use super::registry::ConnectionRegistry;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Per-session tuning, taken from the server config.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Outbound queue capacity.
    pub max_send_queue: usize,
    /// Interval between Ping frames.
    pub heartbeat_interval: Duration,
    /// Silence after which the client is disconnected.
    pub heartbeat_timeout: Duration,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Registers an outbound queue and marks the connection open
/// 2. Feeds inbound text frames to the [`SubscriptionProtocol`]
/// 3. Forwards queued frames and periodic Pings from a writer task
/// 4. Disconnects clients silent for longer than the heartbeat timeout
/// 5. Unsubscribes on disconnect, whatever the cause
#[instrument(skip_all, fields(conn_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.max_send_queue.max(1));
    let connection = Arc::new(ClientConnection::new(connection_id.clone(), send_tx));
    connection.set_ready_state(ReadyState::Open);
    let mut protocol = SubscriptionProtocol::new(Arc::clone(&connection), Arc::clone(&registry));

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let outbound_conn = Arc::clone(&connection);
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(config.heartbeat_interval);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_seen_elapsed() > config.heartbeat_timeout
                    {
                        warn!(timeout = ?config.heartbeat_timeout, "client unresponsive, disconnecting");
                        let _ = ws_tx.send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: Utf8Bytes::from_static("heartbeat timeout"),
                        }))).await;
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: Utf8Bytes::from_static("server shutting down"),
                    }))).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read error");
                        break;
                    }
                    None => break,
                };
                connection.mark_alive();
                match msg {
                    Message::Text(text) => {
                        let _ = protocol.handle_text(text.as_str());
                    }
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => {
                            let _ = protocol.handle_text(text);
                        }
                        Err(_) => warn!(len = data.len(), "dropping non-UTF8 binary frame"),
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            _ = &mut outbound => {
                debug!("writer task finished");
                break;
            }
        }
    }

    connection.set_ready_state(ReadyState::Closing);
    let released = protocol.close();
    outbound.abort();
    connection.set_ready_state(ReadyState::Closed);

    info!(
        conversation_id = released.as_deref(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}
