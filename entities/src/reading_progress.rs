use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Last committed reading position of a book. One row per book, overwritten on
/// every page change.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reading_progress")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub book_id: String,
    pub chapter_id: String,
    /// `-1` marks the book detail pseudo-page.
    pub page_index: i32,
    pub global_page_index: i64,
    pub chapter_progress: f64,
    pub global_progress: f64,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
