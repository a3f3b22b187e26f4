//! Conversation Persistence
//!
//! Durable conversation storage plus the small key-value cache the engine
//! mirrors its state into for fast restores.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AssistantError, Result};
use crate::message::Message;

/// Local cache key for the mirrored message list
pub const MESSAGES_KEY: &str = "assistant.messages";
/// Local cache key for the cached conversation id
pub const CONVERSATION_ID_KEY: &str = "assistant.conversation_id";

/// Store-assigned conversation identifier. Opaque to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredConversation {
    pub id: ConversationId,
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for the first persist of a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewConversation {
    pub messages: Vec<Message>,
}

/// Partial update of an existing conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationUpdate {
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationUpdate {
    pub fn messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            updated_at: Utc::now(),
        }
    }
}

/// Durable conversation storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recently updated conversation, if any
    async fn get_latest(&self) -> Result<Option<StoredConversation>>;

    /// Create a conversation; the store assigns its id
    async fn insert(&self, conversation: NewConversation) -> Result<StoredConversation>;

    /// Replace the messages of an existing conversation
    async fn update(&self, id: &ConversationId, update: ConversationUpdate) -> Result<()>;
}

/// Fast string key-value cache
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

fn poisoned() -> AssistantError {
    AssistantError::Persistence("store lock poisoned".into())
}

/// In-memory conversation store (for development/testing)
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, StoredConversation>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations
    pub fn len(&self) -> usize {
        self.conversations.read().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get_latest(&self) -> Result<Option<StoredConversation>> {
        let conversations = self.conversations.read().map_err(|_| poisoned())?;
        Ok(conversations
            .values()
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn insert(&self, conversation: NewConversation) -> Result<StoredConversation> {
        let stored = StoredConversation {
            id: ConversationId::generate(),
            messages: conversation.messages,
            updated_at: Utc::now(),
        };
        let mut conversations = self.conversations.write().map_err(|_| poisoned())?;
        conversations.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: &ConversationId, update: ConversationUpdate) -> Result<()> {
        let mut conversations = self.conversations.write().map_err(|_| poisoned())?;
        let existing = conversations
            .get_mut(id)
            .ok_or_else(|| AssistantError::Persistence(format!("conversation {id} not found")))?;
        existing.messages = update.messages;
        existing.updated_at = update.updated_at;
        Ok(())
    }
}

/// In-memory local cache
#[derive(Default)]
pub struct MemoryLocalCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryLocalCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for MemoryLocalCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}
