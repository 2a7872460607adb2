//! Conversation storage collaborator.
//!
//! Route handlers publish only after a write succeeds, so a storage failure
//! never produces a notification. Handlers mutate through
//! [`ConversationStore::modify_conversation`], which applies the edit to the
//! stored copy atomically; a read followed by a later write would drop any
//! change stored in between.

use std::collections::HashMap;

use async_trait::async_trait;
use chatline_core::{Conversation, ConversationId};
use parking_lot::RwLock;
use thiserror::Error;

/// Storage failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No conversation with this ID.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// The backing store failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// In-place edit applied by [`ConversationStore::modify_conversation`].
pub type ConversationEdit = Box<dyn FnOnce(&mut Conversation) + Send>;

/// Persistence for conversations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch a conversation by ID.
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation>;
    /// Replace a stored conversation. Fails with `NotFound` if it was never created.
    async fn update_conversation(&self, conversation: Conversation) -> Result<()>;
    /// Apply `edit` to the stored conversation with no other write in
    /// between, and return the updated copy.
    async fn modify_conversation(
        &self,
        id: &ConversationId,
        edit: ConversationEdit,
    ) -> Result<Conversation>;
    /// Create and store an empty conversation.
    async fn create_conversation(&self, title: String) -> Result<Conversation>;
    /// All conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

impl InMemoryConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.conversations
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update_conversation(&self, conversation: Conversation) -> Result<()> {
        let mut conversations = self.conversations.write();
        match conversations.get_mut(&conversation.id) {
            Some(slot) => {
                *slot = conversation;
                Ok(())
            }
            None => Err(StoreError::NotFound(conversation.id)),
        }
    }

    async fn modify_conversation(
        &self,
        id: &ConversationId,
        edit: ConversationEdit,
    ) -> Result<Conversation> {
        let mut conversations = self.conversations.write();
        let slot = conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        edit(slot);
        Ok(slot.clone())
    }

    async fn create_conversation(&self, title: String) -> Result<Conversation> {
        let conversation = Conversation::new(title);
        let _ = self
            .conversations
            .write()
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut all: Vec<Conversation> = self.conversations.read().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}
