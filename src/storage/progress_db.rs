use std::sync::Arc;

use anyhow::Context;
use entities::reading_progress;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait, sea_query::OnConflict};

use super::ProgressStore;
use crate::domain::{PagePosition, ReadingProgress};

/// Progress rows in the `reading_progress` table, one per book.
#[derive(Clone, Debug)]
pub struct SeaOrmProgressStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmProgressStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn to_active_model(progress: &ReadingProgress) -> reading_progress::ActiveModel {
    reading_progress::ActiveModel {
        book_id: Set(progress.book_id.clone()),
        chapter_id: Set(progress.chapter_id.clone()),
        page_index: Set(progress.position.to_stored()),
        global_page_index: Set(i64::try_from(progress.global_page_index).unwrap_or(i64::MAX)),
        chapter_progress: Set(progress.chapter_progress),
        global_progress: Set(progress.global_progress),
        updated_at: Set(progress.updated_at),
    }
}

fn from_model(model: reading_progress::Model) -> ReadingProgress {
    ReadingProgress {
        book_id: model.book_id,
        chapter_id: model.chapter_id,
        position: PagePosition::from_stored(model.page_index),
        global_page_index: usize::try_from(model.global_page_index).unwrap_or(0),
        chapter_progress: model.chapter_progress.clamp(0.0, 1.0),
        global_progress: model.global_progress.clamp(0.0, 1.0),
        updated_at: model.updated_at,
    }
}

#[async_trait::async_trait]
impl ProgressStore for SeaOrmProgressStore {
    #[tracing::instrument(level = "debug", skip(self, progress), fields(book_id = %progress.book_id))]
    async fn save(&self, progress: &ReadingProgress) -> anyhow::Result<()> {
        // Single upsert statement: the row is replaced as a whole or not at all.
        reading_progress::Entity::insert(to_active_model(progress))
            .on_conflict(
                OnConflict::column(reading_progress::Column::BookId)
                    .update_columns([
                        reading_progress::Column::ChapterId,
                        reading_progress::Column::PageIndex,
                        reading_progress::Column::GlobalPageIndex,
                        reading_progress::Column::ChapterProgress,
                        reading_progress::Column::GlobalProgress,
                        reading_progress::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .with_context(|| format!("Failed to save progress for book {}", progress.book_id))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn load(&self, book_id: &str) -> anyhow::Result<Option<ReadingProgress>> {
        let row = reading_progress::Entity::find_by_id(book_id.to_string())
            .one(self.db.as_ref())
            .await
            .with_context(|| format!("Failed to load progress for book {}", book_id))?;
        Ok(row.map(from_model))
    }
}
