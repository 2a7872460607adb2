//! # chatline-client
//!
//! Live connection to a Chatline server that follows one conversation.
//!
//! - [`state`]: pure transition function over [`ConnectionStatus`]
//! - [`policy`]: bounded reconnection with fixed or capped exponential delay
//! - [`transport`]: the socket seam, with a `tokio-tungstenite` implementation
//! - [`manager`]: the async driver exposing status and envelope streams

#![deny(unsafe_code)]

pub mod error;
pub mod manager;
pub mod policy;
pub mod state;
pub mod transport;

pub use error::{ClientError, Result};
pub use manager::ClientConnectionManager;
pub use policy::ReconnectPolicy;
pub use state::{Action, ConnectionEvent, ConnectionStatus, SessionState};
pub use transport::{Connector, Transport, TransportEvent, WsConnector, derive_ws_url};
