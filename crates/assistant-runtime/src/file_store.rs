//! File-backed persistence
//!
//! `FileConversationStore` keeps one JSON document per conversation in a
//! directory. `JsonFileCache` keeps the local cache as a single JSON map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use assistant_core::{
    error::{AssistantError, Result},
    store::{
        ConversationId, ConversationStore, ConversationUpdate, LocalCache, NewConversation,
        StoredConversation,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

/// Conversation store writing `<id>.json` files
pub struct FileConversationStore {
    dir: PathBuf,
}

impl FileConversationStore {
    /// Open (and create if needed) a store directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "Opened conversation store");
        Ok(Self { dir })
    }

    fn path_for(&self, id: &ConversationId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn write(&self, conversation: &StoredConversation) -> Result<()> {
        let json = serde_json::to_vec_pretty(conversation)?;
        let path = self.path_for(&conversation.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(path: &Path) -> Result<StoredConversation> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn get_latest(&self) -> Result<Option<StoredConversation>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut latest: Option<StoredConversation> = None;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let conversation = match Self::read(&path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable conversation");
                    continue;
                }
            };
            if latest
                .as_ref()
                .is_none_or(|l| conversation.updated_at > l.updated_at)
            {
                latest = Some(conversation);
            }
        }

        Ok(latest)
    }

    async fn insert(&self, conversation: NewConversation) -> Result<StoredConversation> {
        let stored = StoredConversation {
            id: ConversationId::generate(),
            messages: conversation.messages,
            updated_at: Utc::now(),
        };
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn update(&self, id: &ConversationId, update: ConversationUpdate) -> Result<()> {
        let path = self.path_for(id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(AssistantError::Persistence(format!("conversation {id} not found")));
        }
        let mut stored = Self::read(&path).await?;
        stored.messages = update.messages;
        stored.updated_at = update.updated_at;
        self.write(&stored).await
    }
}

/// Local cache persisted as one JSON object.
///
/// Every write replaces the file through a temp file and rename, holding the
/// entry lock so writes land in order.
pub struct JsonFileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileCache {
    /// Load the cache file. A missing file starts empty, and so does an
    /// unreadable one after logging it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Discarding unreadable local cache");
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalCache for JsonFileCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_some() {
            self.flush(&entries).await?;
        }
        Ok(())
    }
}
