//! libSQL conversation store.
//!
//! One row per conversation; the full record lives in a JSON `payload`
//! column, with `user_id` broken out for owner scans.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::{ConversationRecord, ConversationStore};

/// libSQL-backed conversation store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Conversation database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let store = Self::from_database(db)?;
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

#[async_trait]
impl ConversationStore for LibSqlStore {
    async fn put(&self, id: &str, record: &ConversationRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        self.conn
            .execute(
                "INSERT INTO conversations (id, user_id, created_at, updated_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    user_id = excluded.user_id,
                    updated_at = excluded.updated_at,
                    payload = excluded.payload",
                params![
                    id,
                    record.user_id.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                    payload,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("put: {e}")))?;
        debug!(conversation_id = id, "Conversation row upserted");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT payload FROM conversations WHERE id = ?1", params![id])
            .await
            .map_err(|e| StoreError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let payload: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get row parse: {e}")))?;
                Ok(Some(serde_json::from_str(&payload)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get: {e}"))),
        }
    }

    async fn list_by_owner(&self, user_id: &str) -> Result<Vec<ConversationRecord>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, payload FROM conversations WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_by_owner: {e}")))?;

        let mut records = Vec::new();
        loop {
            let row = match rows.next().await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(StoreError::Query(format!("list_by_owner: {e}"))),
            };
            let id: String = row.get(0).unwrap_or_default();
            let parsed = row
                .get::<String>(1)
                .map_err(|e| e.to_string())
                .and_then(|p| {
                    serde_json::from_str::<ConversationRecord>(&p).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(conversation_id = %id, error = %e, "Skipping corrupt conversation row"),
            }
        }
        Ok(records)
    }
}
