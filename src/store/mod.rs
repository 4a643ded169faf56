//! Durable chat history.
//!
//! History grows without bound: nothing here deduplicates, expires or
//! deletes stored messages.

mod memory;
mod sqlite;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::types::ChatMessage;

pub use memory::InMemoryMessageStore;
pub use sqlite::SqliteMessageStore;

/// Number of messages returned when a caller does not ask for a limit
pub const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only message persistence
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably persist one message
    async fn append(&self, message: ChatMessage) -> Result<(), StoreError>;

    /// Up to `limit` messages, newest `date_time` first.
    ///
    /// Messages sharing a timestamp come back most recently appended first.
    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Open the backend selected by `DATABASE_PATH`
pub fn open_store(config: &RelayConfig) -> Result<Arc<dyn MessageStore>, StoreError> {
    if config.uses_in_memory_store() {
        tracing::warn!("Using in-memory message store, history is lost on restart");
        return Ok(Arc::new(InMemoryMessageStore::new()));
    }

    let store = SqliteMessageStore::open(&config.database_path)?;
    Ok(Arc::new(store))
}
