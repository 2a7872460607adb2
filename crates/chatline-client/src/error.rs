//! Client error types.

use std::time::Duration;

use chatline_core::EnvelopeError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by the connection manager and its transport.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The base URL cannot be turned into a WebSocket endpoint.
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
    /// WebSocket handshake or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    /// The handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// The driver task has exited.
    #[error("connection manager stopped")]
    Stopped,
}

impl From<tungstenite::Error> for ClientError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
