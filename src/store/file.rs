//! JSON-file conversation store: one `<id>.json` per conversation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::is_valid_conversation_id;
use crate::store::traits::{ConversationRecord, ConversationStore};

/// File-backed store rooted at a directory.
///
/// Writes go to a hidden temporary file that is renamed over the target,
/// so readers only ever see a complete record.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store in `dir`.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        info!(path = %dir.display(), "Conversation file store opened");
        Ok(Self { dir })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        is_valid_conversation_id(id).then(|| self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn put(&self, id: &str, record: &ConversationRecord) -> Result<(), StoreError> {
        let path = self
            .path_for(id)
            .ok_or_else(|| StoreError::InvalidId(id.to_string()))?;
        let json = serde_json::to_vec_pretty(record)?;

        let tmp = self.dir.join(format!(".{id}.{}.tmp", Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, &json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(conversation_id = id, bytes = json.len(), "Conversation written");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        let Some(path) = self.path_for(id) else {
            debug!(conversation_id = id, "Rejected invalid conversation id");
            return Ok(None);
        };

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }

            let path = entry.path();
            let record = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<ConversationRecord>(&bytes),
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable conversation file");
                    continue;
                }
            };
            match record {
                Ok(record) if record.user_id == user_id => records.push(record),
                Ok(_) => {}
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping corrupt conversation file");
                }
            }
        }

        Ok(records)
    }
}
