// Persistence collaborators: reading progress stores and the on-disk chapter tier

mod disk_cache;
mod memory;
mod progress_db;

pub use disk_cache::{DiskCache, DiskEntry};
pub use memory::MemoryProgressStore;
pub use progress_db::SeaOrmProgressStore;

use crate::domain::ReadingProgress;

/// Key-value persistence of the single active progress record per book.
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    /// Last-write-wins upsert of the full record.
    async fn save(&self, progress: &ReadingProgress) -> anyhow::Result<()>;
    async fn load(&self, book_id: &str) -> anyhow::Result<Option<ReadingProgress>>;
}
