//! Persistence layer: durable conversation records keyed by id.

pub mod file;
pub mod libsql_backend;
pub(crate) mod migrations;
pub mod traits;

use std::sync::LazyLock;

use regex::Regex;

pub use file::FileStore;
pub use libsql_backend::LibSqlStore;
pub use traits::{ConversationRecord, ConversationStore, ConversationSummary, Interaction, Metadata};

static CONVERSATION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("conversation id pattern is valid")
});

/// Whether `id` is safe to use as a storage key (and file name).
pub fn is_valid_conversation_id(id: &str) -> bool {
    CONVERSATION_ID.is_match(id)
}
