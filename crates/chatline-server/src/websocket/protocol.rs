//! Per-connection subscription protocol.
//!
//! A connection starts `Unsubscribed` and moves to `Subscribed(id)` only on
//! an explicit `subscribe` frame; a later subscribe replaces the earlier one.
//! Every valid subscribe is acknowledged on the same connection. Malformed
//! frames are logged and dropped without closing the connection.
//!
//! Dropping the protocol value unsubscribes the connection, so registry
//! cleanup runs however the session ends.

use std::sync::Arc;

use chatline_core::{ClientFrame, ConversationId, ServerEnvelope};
use metrics::counter;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use super::registry::ConnectionRegistry;
use crate::metrics::MALFORMED_FRAMES_TOTAL;

/// Subscription held by one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No conversation followed yet.
    Unsubscribed,
    /// Following one conversation.
    Subscribed(ConversationId),
}

/// What happened to an inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Registered for the conversation; the acknowledgment was queued if
    /// `acked` is true.
    Subscribed {
        /// Conversation now followed.
        conversation_id: ConversationId,
        /// Whether the `subscribed` reply was enqueued.
        acked: bool,
    },
    /// Valid frame of a type this server does not act on.
    Ignored,
    /// Not JSON, or missing required fields.
    Malformed,
}

/// Subscription state machine for one connection.
pub struct SubscriptionProtocol {
    connection: Arc<ClientConnection>,
    registry: Arc<ConnectionRegistry>,
    state: SubscriptionState,
    closed: bool,
}

impl SubscriptionProtocol {
    /// Start in `Unsubscribed`.
    pub fn new(connection: Arc<ClientConnection>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            connection,
            registry,
            state: SubscriptionState::Unsubscribed,
            closed: false,
        }
    }

    /// Current subscription.
    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    /// Handle one inbound text frame.
    pub fn handle_text(&mut self, text: &str) -> InboundOutcome {
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                counter!(MALFORMED_FRAMES_TOTAL).increment(1);
                warn!(conn_id = %self.connection.id, len = text.len(), error = %e, "dropping malformed frame");
                return InboundOutcome::Malformed;
            }
        };

        match frame {
            ClientFrame::Subscribe {
                conversation_id,
                client_info,
            } => {
                if let Some(info) = &client_info {
                    debug!(conn_id = %self.connection.id, client_info = %info, "subscribe with client info");
                }
                let ack = self
                    .registry
                    .subscribe(conversation_id.clone(), &self.connection);
                self.state = SubscriptionState::Subscribed(ack.conversation_id.clone());

                let reply = ServerEnvelope::Subscribed {
                    conversation_id: ack.conversation_id,
                };
                let acked = match reply.to_json() {
                    Ok(json) => self.connection.send(Arc::new(json)),
                    Err(e) => {
                        warn!(conn_id = %self.connection.id, error = %e, "failed to serialize ack");
                        false
                    }
                };
                if !acked {
                    warn!(conn_id = %self.connection.id, "failed to enqueue subscribe ack");
                }
                InboundOutcome::Subscribed {
                    conversation_id,
                    acked,
                }
            }
            ClientFrame::Unknown => {
                debug!(conn_id = %self.connection.id, "ignoring unknown frame type");
                InboundOutcome::Ignored
            }
        }
    }

    /// Release the subscription. Safe to call more than once.
    pub fn close(&mut self) -> Option<ConversationId> {
        if self.closed {
            return None;
        }
        self.closed = true;
        self.state = SubscriptionState::Unsubscribed;
        self.registry.unsubscribe(&self.connection.id)
    }
}

impl Drop for SubscriptionProtocol {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ReadyState;
    use chatline_core::logging::capture_logs;
    use tokio::sync::mpsc;
    use tracing::Level;

    fn setup() -> (
        SubscriptionProtocol,
        Arc<ConnectionRegistry>,
        mpsc::Receiver<Arc<String>>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new("c1".into(), tx));
        conn.set_ready_state(ReadyState::Open);
        let registry = Arc::new(ConnectionRegistry::new());
        let protocol = SubscriptionProtocol::new(conn, Arc::clone(&registry));
        (protocol, registry, rx)
    }

    fn ack_for(rx: &mut mpsc::Receiver<Arc<String>>) -> ServerEnvelope {
        ServerEnvelope::parse(&rx.try_recv().expect("ack queued")).unwrap()
    }

    #[test]
    fn subscribe_registers_and_acks() {
        let (mut protocol, registry, mut rx) = setup();
        let outcome = protocol.handle_text(r#"{"type":"subscribe","conversationId":"abc"}"#);

        assert_eq!(
            outcome,
            InboundOutcome::Subscribed {
                conversation_id: "abc".into(),
                acked: true
            }
        );
        assert_eq!(protocol.state(), &SubscriptionState::Subscribed("abc".into()));
        assert_eq!(registry.subscriber_count(&"abc".into()), 1);
        assert_eq!(
            ack_for(&mut rx),
            ServerEnvelope::Subscribed {
                conversation_id: "abc".into()
            }
        );
    }

    #[test]
    fn second_subscribe_replaces_first() {
        let (mut protocol, registry, mut rx) = setup();
        let _ = protocol.handle_text(r#"{"type":"subscribe","conversationId":"x"}"#);
        let _ = protocol.handle_text(r#"{"type":"subscribe","conversationId":"y"}"#);

        assert_eq!(protocol.state(), &SubscriptionState::Subscribed("y".into()));
        assert_eq!(registry.subscriber_count(&"x".into()), 0);
        assert_eq!(registry.subscriber_count(&"y".into()), 1);
        let _ = ack_for(&mut rx);
        assert_eq!(ack_for(&mut rx).conversation_id().as_str(), "y");
    }

    #[test]
    fn resubscribe_same_conversation_acks_again() {
        let (mut protocol, registry, mut rx) = setup();
        let frame = r#"{"type":"subscribe","conversationId":"same"}"#;
        let _ = protocol.handle_text(frame);
        let _ = protocol.handle_text(frame);
        assert_eq!(registry.subscriber_count(&"same".into()), 1);
        let _ = ack_for(&mut rx);
        assert_eq!(ack_for(&mut rx).conversation_id().as_str(), "same");
    }

    #[test]
    fn malformed_frame_is_logged_and_dropped() {
        let (logs, _guard) = capture_logs();
        let (mut protocol, registry, mut rx) = setup();

        assert_eq!(protocol.handle_text("{not json"), InboundOutcome::Malformed);
        assert_eq!(
            protocol.handle_text(r#"{"type":"subscribe"}"#),
            InboundOutcome::Malformed
        );
        assert_eq!(protocol.state(), &SubscriptionState::Unsubscribed);
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(logs.count_at_level(Level::WARN), 2);
        assert!(logs.has_event(Level::WARN, "dropping malformed frame"));
    }

    #[test]
    fn malformed_frame_keeps_existing_subscription() {
        let (mut protocol, registry, _rx) = setup();
        let _ = protocol.handle_text(r#"{"type":"subscribe","conversationId":"keep"}"#);
        let _ = protocol.handle_text("garbage");
        assert_eq!(protocol.state(), &SubscriptionState::Subscribed("keep".into()));
        assert_eq!(registry.subscriber_count(&"keep".into()), 1);
    }

    #[test]
    fn unknown_type_is_ignored() {
        let (mut protocol, registry, mut rx) = setup();
        assert_eq!(
            protocol.handle_text(r#"{"type":"typing","conversationId":"abc"}"#),
            InboundOutcome::Ignored
        );
        assert!(registry.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_unsubscribes_once() {
        let (mut protocol, registry, _rx) = setup();
        let _ = protocol.handle_text(r#"{"type":"subscribe","conversationId":"abc"}"#);
        assert_eq!(protocol.close().as_deref(), Some("abc"));
        assert!(protocol.close().is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.conversation_count(), 0);
    }

    #[test]
    fn drop_unsubscribes() {
        let (mut protocol, registry, _rx) = setup();
        let _ = protocol.handle_text(r#"{"type":"subscribe","conversationId":"abc"}"#);
        drop(protocol);
        assert!(registry.is_empty());
    }

    #[test]
    fn ack_not_enqueued_when_queue_full() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Arc::new(ClientConnection::new("c".into(), tx));
        conn.set_ready_state(ReadyState::Open);
        assert!(conn.send(Arc::new("filler".into())));
        let registry = Arc::new(ConnectionRegistry::new());
        let mut protocol = SubscriptionProtocol::new(conn, Arc::clone(&registry));

        let outcome = protocol.handle_text(r#"{"type":"subscribe","conversationId":"abc"}"#);
        assert_eq!(
            outcome,
            InboundOutcome::Subscribed {
                conversation_id: "abc".into(),
                acked: false
            }
        );
        assert_eq!(registry.subscriber_count(&"abc".into()), 1);
    }
}
