use std::collections::HashMap;

use tokio::sync::RwLock;

use super::ProgressStore;
use crate::domain::ReadingProgress;

/// Process-local store, used by tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    rows: RwLock<HashMap<String, ReadingProgress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait::async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn save(&self, progress: &ReadingProgress) -> anyhow::Result<()> {
        self.rows
            .write()
            .await
            .insert(progress.book_id.clone(), progress.clone());
        Ok(())
    }

    async fn load(&self, book_id: &str) -> anyhow::Result<Option<ReadingProgress>> {
        Ok(self.rows.read().await.get(book_id).cloned())
    }
}
