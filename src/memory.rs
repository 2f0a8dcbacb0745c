//! Conversation memory: lifecycle and bounded history on top of a store.
//!
//! This is the only component that mutates a `ConversationRecord`. Appends
//! are read-modify-write of the full record, so they are serialized per
//! conversation id; appends to different conversations never contend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::store::{
    ConversationRecord, ConversationStore, ConversationSummary, Interaction, Metadata,
};

/// Default number of interactions returned by `get_history`.
pub const DEFAULT_MAX_HISTORY: usize = 20;

/// Maximum number of matches returned by `search`.
pub const SEARCH_LIMIT: usize = 10;

/// A search hit: one interaction and the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub interaction: Interaction,
}

/// Conversation lifecycle manager.
pub struct ConversationMemory {
    store: Arc<dyn ConversationStore>,
    max_history: usize,
    append_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self::with_max_history(store, DEFAULT_MAX_HISTORY)
    }

    pub fn with_max_history(store: Arc<dyn ConversationStore>, max_history: usize) -> Self {
        Self {
            store,
            max_history,
            append_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Default history window.
    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Create an empty conversation for `user_id` and return its id.
    pub async fn create_conversation(&self, user_id: &str) -> Result<String, MemoryError> {
        let id = Uuid::new_v4().to_string();
        let record = ConversationRecord::new(&id, user_id);

        self.store
            .put(&id, &record)
            .await
            .map_err(|source| MemoryError::Persist {
                id: id.clone(),
                source,
            })?;

        info!(conversation_id = %id, user_id, "Created conversation");
        Ok(id)
    }

    /// Full snapshot of a conversation, or `None` if it does not exist or
    /// cannot be read.
    pub async fn get_conversation(&self, conversation_id: &str) -> Option<ConversationRecord> {
        match self.store.get(conversation_id).await {
            Ok(record) => record,
            Err(e) => {
                error!(conversation_id, error = %e, "Failed to load conversation");
                None
            }
        }
    }

    /// The last `limit` interactions (default: the configured maximum),
    /// oldest first.
    ///
    /// An unknown conversation yields an empty history; a store failure is
    /// an error so callers can tell the two apart.
    pub async fn get_history(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Interaction>, MemoryError> {
        let limit = limit.unwrap_or(self.max_history);
        let Some(record) = self.store.get(conversation_id).await? else {
            warn!(conversation_id, "Conversation not found");
            return Ok(Vec::new());
        };

        let start = record.interactions.len().saturating_sub(limit);
        Ok(record.interactions[start..].to_vec())
    }

    /// Append an interaction. Returns `false` (and writes nothing) when the
    /// conversation is unknown or the record cannot be read or written.
    pub async fn add_interaction(
        &self,
        conversation_id: &str,
        user_query: &str,
        assistant_response: &str,
        metadata: Metadata,
    ) -> bool {
        let lock = self.append_lock(conversation_id).await;
        let appended = {
            let _guard = lock.lock().await;
            self.append_locked(conversation_id, user_query, assistant_response, metadata)
                .await
        };
        drop(lock);
        self.release_append_lock(conversation_id).await;
        appended
    }

    async fn append_locked(
        &self,
        conversation_id: &str,
        user_query: &str,
        assistant_response: &str,
        metadata: Metadata,
    ) -> bool {
        let mut record = match self.store.get(conversation_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(conversation_id, "Cannot add interaction: conversation not found");
                return false;
            }
            Err(e) => {
                error!(conversation_id, error = %e, "Cannot add interaction: load failed");
                return false;
            }
        };

        record.append(Interaction::new(user_query, assistant_response, metadata));

        match self.store.put(conversation_id, &record).await {
            Ok(()) => {
                debug!(
                    conversation_id,
                    interactions = record.interactions.len(),
                    "Added interaction"
                );
                true
            }
            Err(e) => {
                error!(conversation_id, error = %e, "Failed to persist interaction");
                false
            }
        }
    }

    /// Case-insensitive substring search over every interaction of every
    /// conversation owned by `user_id`. Most recent first, at most
    /// `SEARCH_LIMIT` matches.
    pub async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SearchMatch>, MemoryError> {
        let needle = query.to_lowercase();
        let conversations = self.store.list_by_owner(user_id).await?;

        // Position in the conversation breaks timestamp ties: later appends
        // sort first.
        let mut hits: Vec<(usize, SearchMatch)> = conversations
            .iter()
            .flat_map(|conversation| {
                conversation
                    .interactions
                    .iter()
                    .enumerate()
                    .filter(|(_, i)| {
                        i.user_query.to_lowercase().contains(&needle)
                            || i.assistant_response.to_lowercase().contains(&needle)
                    })
                    .map(|(position, i)| {
                        let hit = SearchMatch {
                            conversation_id: conversation.id.clone(),
                            timestamp: i.timestamp,
                            interaction: i.clone(),
                        };
                        (position, hit)
                    })
            })
            .collect();

        hits.sort_by(|(pa, a), (pb, b)| (b.timestamp, pb).cmp(&(a.timestamp, pa)));
        let matches: Vec<SearchMatch> = hits
            .into_iter()
            .take(SEARCH_LIMIT)
            .map(|(_, hit)| hit)
            .collect();
        debug!(user_id, query, hits = matches.len(), "Conversation search");
        Ok(matches)
    }

    /// Conversations owned by `user_id`, most recently updated first.
    pub async fn list_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, MemoryError> {
        let mut records = self.store.list_by_owner(user_id).await?;
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records.iter().map(ConversationSummary::from).collect())
    }

    async fn append_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.append_locks.lock().await;
        Arc::clone(locks.entry(conversation_id.to_string()).or_default())
    }

    /// Drop the per-id lock once nobody else holds or waits on it.
    async fn release_append_lock(&self, conversation_id: &str) {
        let mut locks = self.append_locks.lock().await;
        if locks
            .get(conversation_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(conversation_id);
        }
    }
}
