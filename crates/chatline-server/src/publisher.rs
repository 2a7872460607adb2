//! Typed notification helpers over [`ConnectionRegistry::publish`].
//!
//! Callers invoke these only after the matching record has been persisted.
//! Delivery is best-effort: there is no retry and no outbox.

use std::sync::Arc;

use chatline_core::{
    ContextRecord, ConversationId, ConversationMetadata, MessageRecord, MessageStatus,
    NotificationData,
};

use crate::websocket::registry::{ConnectionRegistry, PublishReport};

/// Builds `update` payloads and fans them out to a conversation's subscribers.
#[derive(Clone)]
pub struct NotificationPublisher {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationPublisher {
    /// Publish through `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The user's message was stored.
    pub fn user_message_sent(
        &self,
        conversation_id: &ConversationId,
        message: MessageRecord,
    ) -> PublishReport {
        self.publish(
            conversation_id,
            NotificationData::NewMessage {
                message,
                status: MessageStatus::UserMessageSent,
                metadata: None,
            },
        )
    }

    /// The assistant's reply was stored.
    pub fn ai_response_complete(
        &self,
        conversation_id: &ConversationId,
        message: MessageRecord,
        metadata: Option<ConversationMetadata>,
    ) -> PublishReport {
        self.publish(
            conversation_id,
            NotificationData::NewMessage {
                message,
                status: MessageStatus::AiResponseComplete,
                metadata: metadata.filter(|m| !m.is_empty()),
            },
        )
    }

    /// The conversation context was replaced.
    pub fn context_updated(
        &self,
        conversation_id: &ConversationId,
        context: ContextRecord,
    ) -> PublishReport {
        self.publish(conversation_id, NotificationData::ContextUpdated { context })
    }

    /// Publish an arbitrary payload.
    pub fn publish(&self, conversation_id: &ConversationId, data: NotificationData) -> PublishReport {
        self.registry.publish(conversation_id, data)
    }
}
