use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MessageStore, StoreError};
use crate::types::ChatMessage;

/// Volatile store for tests and database-less runs
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: ChatMessage) -> Result<(), StoreError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.read().await;

        // Newest-appended first, so the stable sort keeps that order for ties
        let mut recent: Vec<ChatMessage> = messages.iter().rev().cloned().collect();
        recent.sort_by(|a, b| b.date_time.cmp(&a.date_time));
        recent.truncate(limit);
        Ok(recent)
    }
}
