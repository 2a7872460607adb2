//! Conversation subscriber registry and notification fan-out.
//!
//! Maps each conversation to the set of connections following it. A
//! connection follows at most one conversation, and a conversation key only
//! exists while it has at least one subscriber.

use std::collections::HashMap;
use std::sync::Arc;

use chatline_core::{ConnectionId, ConversationId, NotificationData, ServerEnvelope};
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::metrics::{NOTIFICATIONS_PUBLISHED_TOTAL, WS_BROADCAST_DROPS_TOTAL};

/// Result of [`ConnectionRegistry::subscribe`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeAck {
    /// The conversation now followed.
    pub conversation_id: ConversationId,
    /// The conversation followed before, if any (may equal the new one).
    pub previous: Option<ConversationId>,
}

/// Outcome of a fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers found for the conversation.
    pub recipients: usize,
    /// Frames enqueued.
    pub delivered: usize,
    /// Subscribers skipped (not open, queue full, or writer gone).
    pub skipped: usize,
}

#[derive(Default)]
struct RegistryState {
    conversations: HashMap<ConversationId, HashMap<ConnectionId, Arc<ClientConnection>>>,
    subscriptions: HashMap<ConnectionId, ConversationId>,
}

impl RegistryState {
    fn detach(&mut self, connection_id: &ConnectionId) -> Option<ConversationId> {
        let conversation_id = self.subscriptions.remove(connection_id)?;
        if let Some(set) = self.conversations.get_mut(&conversation_id) {
            let _ = set.remove(connection_id);
            if set.is_empty() {
                let _ = self.conversations.remove(&conversation_id);
            }
        }
        Some(conversation_id)
    }

    fn invariants_hold(&self) -> bool {
        let members: usize = self.conversations.values().map(HashMap::len).sum();
        members == self.subscriptions.len()
            && self.conversations.values().all(|set| !set.is_empty())
            && self.subscriptions.iter().all(|(conn, conv)| {
                self.conversations
                    .get(conv)
                    .is_some_and(|set| set.contains_key(conn))
            })
    }
}

/// Registry of live subscriptions, shared by every session task.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `connection` to `conversation_id`, dropping any previous
    /// subscription it held. Calling it again with the same pair changes
    /// nothing.
    pub fn subscribe(
        &self,
        conversation_id: ConversationId,
        connection: &Arc<ClientConnection>,
    ) -> SubscribeAck {
        let mut state = self.state.lock();
        let previous = state.detach(&connection.id);
        let _ = state
            .conversations
            .entry(conversation_id.clone())
            .or_default()
            .insert(connection.id.clone(), Arc::clone(connection));
        let _ = state
            .subscriptions
            .insert(connection.id.clone(), conversation_id.clone());
        debug_assert!(state.invariants_hold(), "registry invariant violated");
        drop(state);

        debug!(
            conn_id = %connection.id,
            conversation_id = %conversation_id,
            previous = previous.as_deref(),
            "connection subscribed"
        );
        SubscribeAck {
            conversation_id,
            previous,
        }
    }

    /// Remove whatever subscription `connection_id` holds.
    ///
    /// Returns the conversation it was removed from, or `None` if it held none.
    pub fn unsubscribe(&self, connection_id: &ConnectionId) -> Option<ConversationId> {
        let mut state = self.state.lock();
        let removed = state.detach(connection_id);
        debug_assert!(state.invariants_hold(), "registry invariant violated");
        drop(state);

        if let Some(conversation_id) = &removed {
            debug!(conn_id = %connection_id, conversation_id = %conversation_id, "connection unsubscribed");
        }
        removed
    }

    /// Deliver one `update` envelope to every open subscriber of
    /// `conversation_id`.
    ///
    /// A conversation without subscribers is a no-op. Subscribers that are not
    /// open or whose queue rejects the frame are skipped; the set itself is
    /// left untouched and cleaned up by each connection's close path.
    pub fn publish(&self, conversation_id: &ConversationId, data: NotificationData) -> PublishReport {
        let kind = data.kind();
        let envelope = ServerEnvelope::Update {
            conversation_id: conversation_id.clone(),
            data,
        };
        let json = match envelope.to_json() {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(conversation_id = %conversation_id, kind, error = %e, "failed to serialize envelope");
                return PublishReport::default();
            }
        };

        // Enqueue under the lock so concurrent publishes reach each
        // recipient in lock-acquisition order. `try_send` never blocks.
        let state = self.state.lock();
        let Some(set) = state.conversations.get(conversation_id) else {
            debug!(conversation_id = %conversation_id, kind, "no subscribers, skipping publish");
            return PublishReport::default();
        };
        let mut report = PublishReport {
            recipients: set.len(),
            ..PublishReport::default()
        };
        for conn in set.values() {
            if conn.is_open() && conn.send(Arc::clone(&json)) {
                report.delivered += 1;
            } else {
                report.skipped += 1;
                debug!(conn_id = %conn.id, conversation_id = %conversation_id, "skipped subscriber");
            }
        }
        drop(state);

        counter!(NOTIFICATIONS_PUBLISHED_TOTAL, "kind" => kind).increment(1);
        if report.skipped > 0 {
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(report.skipped as u64);
            warn!(
                conversation_id = %conversation_id,
                kind,
                skipped = report.skipped,
                "some subscribers did not receive the update"
            );
        }
        debug!(
            conversation_id = %conversation_id,
            kind,
            recipients = report.recipients,
            delivered = report.delivered,
            "published update"
        );
        report
    }

    /// Conversation currently followed by `connection_id`.
    pub fn subscription_of(&self, connection_id: &ConnectionId) -> Option<ConversationId> {
        self.state.lock().subscriptions.get(connection_id).cloned()
    }

    /// Number of subscribers of `conversation_id`.
    pub fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        self.state
            .lock()
            .conversations
            .get(conversation_id)
            .map_or(0, HashMap::len)
    }

    /// Number of conversations with at least one subscriber.
    pub fn conversation_count(&self) -> usize {
        self.state.lock().conversations.len()
    }

    /// Number of subscribed connections.
    pub fn len(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Whether no connection is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verify the structural invariants: one set per connection, no empty
    /// sets, and the reverse index agreeing with the sets.
    pub fn invariants_hold(&self) -> bool {
        self.state.lock().invariants_hold()
    }
}
