//! Conversation data model and the `ConversationStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Free-form interaction metadata (task type, components used, ...).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One recorded user-query/assistant-response pair. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub assistant_response: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Interaction {
    /// Create a new interaction stamped with a fresh id and the current time.
    pub fn new(
        user_query: impl Into<String>,
        assistant_response: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_query: user_query.into(),
            assistant_response: assistant_response.into(),
            metadata,
        }
    }

    /// The `task_type` recorded in metadata, if any.
    pub fn task_type(&self) -> Option<&str> {
        self.metadata.get("task_type").and_then(|v| v.as_str())
    }
}

/// Full snapshot of a conversation as persisted by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

impl ConversationRecord {
    /// Create an empty conversation.
    pub fn new(id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            interactions: Vec::new(),
        }
    }

    /// Append an interaction and advance `updated_at`.
    ///
    /// `updated_at` never moves before `created_at` or backwards, even if the
    /// wall clock does.
    pub fn append(&mut self, interaction: Interaction) {
        let now = Utc::now();
        self.updated_at = now.max(self.updated_at).max(self.created_at);
        self.interactions.push(interaction);
    }
}

/// Lightweight listing entry for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub interaction_count: usize,
}

impl From<&ConversationRecord> for ConversationSummary {
    fn from(record: &ConversationRecord) -> Self {
        Self {
            id: record.id.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            interaction_count: record.interactions.len(),
        }
    }
}

/// Durable key-value persistence of conversation snapshots.
///
/// Backends must make `put` all-or-nothing and must keep scanning past a
/// single unreadable record in `list_by_owner`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Overwrite the record stored under `id`.
    async fn put(&self, id: &str, record: &ConversationRecord) -> Result<(), StoreError>;

    /// Fetch a record. `Ok(None)` when the id is unknown.
    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError>;

    /// All records owned by `user_id`, in no particular order.
    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<ConversationRecord>, StoreError>;
}
