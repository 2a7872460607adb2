//! WebSocket transport: connection handles, the subscriber registry, the
//! per-connection subscription protocol, and the session task.

pub mod connection;
pub mod protocol;
pub mod registry;
pub mod session;
