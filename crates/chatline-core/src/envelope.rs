//! The wire contract between the server and subscribed clients.
//!
//! All frames are JSON text tagged by a `type` field.
//!
//! Client → server:
//! ```text
//! { "type": "subscribe", "conversationId": "...", "clientInfo"?: {...} }
//! ```
//!
//! Server → client:
//! ```text
//! { "type": "subscribed", "conversationId": "..." }
//! { "type": "update", "conversationId": "...", "data": NotificationData }
//! ```

use serde::{Deserialize, Serialize};

use crate::conversation::{ContextRecord, ConversationMetadata, MessageRecord};
use crate::errors::{EnvelopeError, Result};
use crate::ids::ConversationId;

/// A frame sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Register this connection for updates on one conversation.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// Conversation to follow.
        conversation_id: ConversationId,
        /// Opaque client description, logged but otherwise unused.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_info: Option<serde_json::Value>,
    },
    /// Any frame type this server does not understand.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Build a subscribe frame without client info.
    pub fn subscribe(conversation_id: ConversationId) -> Self {
        Self::Subscribe {
            conversation_id,
            client_info: None,
        }
    }

    /// Parse and validate an inbound text frame.
    ///
    /// A `subscribe` frame with an empty `conversationId` is rejected the
    /// same way as one missing the field.
    pub fn parse(text: &str) -> Result<Self> {
        let frame: Self = serde_json::from_str(text)?;
        if let Self::Subscribe {
            conversation_id, ..
        } = &frame
        {
            if conversation_id.is_empty() {
                return Err(EnvelopeError::MissingField("conversationId"));
            }
        }
        Ok(frame)
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Which step of a message exchange produced a `new_message` update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// The user's message has been stored.
    UserMessageSent,
    /// The assistant's reply has been stored.
    AiResponseComplete,
}

/// Payload of an `update` envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationData {
    /// A message was appended to the conversation.
    NewMessage {
        /// The persisted message.
        message: MessageRecord,
        /// Which side of the exchange this is.
        status: MessageStatus,
        /// Metadata derived alongside an assistant reply.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<ConversationMetadata>,
    },
    /// The conversation context was replaced.
    ContextUpdated {
        /// The persisted context.
        context: ContextRecord,
    },
}

impl NotificationData {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage { .. } => "new_message",
            Self::ContextUpdated { .. } => "context_updated",
        }
    }
}

/// A frame sent by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEnvelope {
    /// Acknowledges a subscribe request.
    #[serde(rename_all = "camelCase")]
    Subscribed {
        /// The conversation now followed.
        conversation_id: ConversationId,
    },
    /// A state change in a followed conversation.
    #[serde(rename_all = "camelCase")]
    Update {
        /// The conversation that changed.
        conversation_id: ConversationId,
        /// What changed.
        data: NotificationData,
    },
}

impl ServerEnvelope {
    /// Parse an outbound frame (client side).
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The conversation this envelope concerns.
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Subscribed { conversation_id } | Self::Update { conversation_id, .. } => {
                conversation_id
            }
        }
    }
}
