//! # chatline-server
//!
//! Axum HTTP + WebSocket server for live conversation updates.
//!
//! - **Registry**: which connections follow which conversation
//! - **Protocol**: per-connection `subscribe` handling and acknowledgment
//! - **Publisher**: typed `update` fan-out after each persisted change
//! - **Routes**: REST endpoints that persist, then publish
//! - **Collaborators**: conversation storage and an optional AI reply backend

#![deny(unsafe_code)]

pub mod assistant;
pub mod config;
pub mod health;
pub mod metrics;
pub mod publisher;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod websocket;

pub use config::ServerConfig;
pub use publisher::NotificationPublisher;
pub use server::{ChatServer, ServerHandle};
pub use store::{ConversationStore, InMemoryConversationStore};
