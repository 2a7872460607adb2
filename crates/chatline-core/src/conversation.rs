//! Conversation records shared by storage, routes and notifications.
//!
//! The same record that is persisted is the one placed on the wire, so these
//! types serialize in the camelCase shape the client expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId};

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Written by the end user.
    User,
    /// Produced by the AI backend.
    Assistant,
    /// Injected instructions.
    System,
}

/// A single chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Message ID.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl MessageRecord {
    /// Create a message stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Free-form context attached to a conversation (notes the assistant sees).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    /// Context text.
    pub content: String,
    /// When the context was last edited.
    pub updated_at: DateTime<Utc>,
}

impl ContextRecord {
    /// Create a context record stamped with the current time.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Derived conversation metadata, usually produced alongside an AI reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    /// Short title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Bullet-point highlights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_points: Option<Vec<String>>,
    /// Prose summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Classification tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl ConversationMetadata {
    /// Whether every field is unset.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.key_points.is_none()
            && self.summary.is_none()
            && self.tags.is_none()
    }

    /// Overlay the set fields of `other` onto `self`.
    pub fn merge(&mut self, other: ConversationMetadata) {
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.key_points.is_some() {
            self.key_points = other.key_points;
        }
        if other.summary.is_some() {
            self.summary = other.summary;
        }
        if other.tags.is_some() {
            self.tags = other.tags;
        }
    }
}

/// A persisted conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation ID.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Messages in append order.
    pub messages: Vec<MessageRecord>,
    /// Optional user-edited context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextRecord>,
    /// Derived metadata.
    #[serde(default)]
    pub metadata: ConversationMetadata,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            title: title.into(),
            messages: Vec::new(),
            context: None,
            metadata: ConversationMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message and bump `updated_at`.
    pub fn push_message(&mut self, message: MessageRecord) {
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    /// Replace the context and bump `updated_at`.
    pub fn set_context(&mut self, context: ContextRecord) {
        self.updated_at = context.updated_at.max(self.updated_at);
        self.context = Some(context);
    }
}
