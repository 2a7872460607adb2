//! # chatline-core
//!
//! Shared vocabulary for the Chatline server and client:
//!
//! - **Branded IDs**: `ConversationId`, `ConnectionId`, `MessageId` as newtypes
//! - **Records**: `Conversation`, `MessageRecord`, `ContextRecord`
//! - **Envelopes**: the JSON wire contract between publisher and subscribers
//!   (`ClientFrame` inbound, `ServerEnvelope` outbound)
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod conversation;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use conversation::{ContextRecord, Conversation, ConversationMetadata, MessageRecord, Role};
pub use envelope::{ClientFrame, MessageStatus, NotificationData, ServerEnvelope};
pub use errors::{EnvelopeError, Result};
pub use ids::{ConnectionId, ConversationId, MessageId};
