// Domain models shared by the reader core, the persistence layer and the HTTP facade

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chapter as listed in a book's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterMeta {
    pub id: String,
    pub name: String,
    pub ordinal: String,
    pub is_premium: bool,
}

/// Raw chapter payload as handed back by the repository layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResult {
    pub chapter_id: String,
    pub title: Option<String>,
    pub content: String,
}

/// Screen description supplied by the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width_px: f32,
    pub height_px: f32,
    pub font_size_pt: f32,
    pub line_height: f32,
    pub density: f32,
}

impl Viewport {
    pub fn is_valid(&self) -> bool {
        [
            self.width_px,
            self.height_px,
            self.font_size_pt,
            self.line_height,
            self.density,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width_px: 1080.0,
            height_px: 1920.0,
            font_size_pt: 18.0,
            line_height: 1.5,
            density: 2.75,
        }
    }
}

/// Text grid a viewport resolves to: display columns per row and rows per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageLayout {
    pub columns: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Zero-based position within its chapter.
    pub index: usize,
    pub text: String,
}

/// Session cache entry. `raw_content` is never empty; `pages`, when present,
/// are contiguous slices of it produced for `layout`.
#[derive(Debug, Clone)]
pub struct CachedChapter {
    pub meta: ChapterMeta,
    pub raw_content: Arc<str>,
    pub pages: Arc<Vec<Page>>,
    pub layout: Option<PageLayout>,
}

impl CachedChapter {
    /// Returns `None` for empty content, which is never cached.
    pub fn new(meta: ChapterMeta, raw_content: impl Into<Arc<str>>) -> Option<Self> {
        let raw_content = raw_content.into();
        if raw_content.is_empty() {
            return None;
        }
        Some(Self {
            meta,
            raw_content,
            pages: Arc::new(Vec::new()),
            layout: None,
        })
    }

    pub fn has_pages(&self) -> bool {
        !self.pages.is_empty()
    }

    /// Whether the pages were produced for `layout`. `None` is the single page
    /// kept for a viewport that cannot hold text.
    pub fn is_paginated_for(&self, layout: Option<PageLayout>) -> bool {
        self.has_pages() && self.layout == layout
    }
}

/// Inclusive global page span owned by one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRange {
    pub chapter_id: String,
    pub start_global_index: usize,
    pub end_global_index: usize,
}

impl PageRange {
    pub fn page_count(&self) -> usize {
        self.end_global_index + 1 - self.start_global_index
    }

    pub fn contains(&self, global_index: usize) -> bool {
        (self.start_global_index..=self.end_global_index).contains(&global_index)
    }
}

/// Where the reader is inside a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PagePosition {
    /// The book detail pseudo-page shown before the first chapter page.
    DetailPage,
    Page(usize),
}

impl PagePosition {
    const DETAIL_SENTINEL: i32 = -1;

    pub fn from_stored(value: i32) -> Self {
        match usize::try_from(value) {
            Ok(index) => PagePosition::Page(index),
            Err(_) => PagePosition::DetailPage,
        }
    }

    pub fn to_stored(self) -> i32 {
        match self {
            PagePosition::DetailPage => Self::DETAIL_SENTINEL,
            PagePosition::Page(index) => i32::try_from(index).unwrap_or(i32::MAX),
        }
    }

    pub fn page_index(self) -> Option<usize> {
        match self {
            PagePosition::DetailPage => None,
            PagePosition::Page(index) => Some(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub book_id: String,
    pub chapter_id: String,
    pub position: PagePosition,
    pub global_page_index: usize,
    /// 0.0 - 1.0 fraction
    pub chapter_progress: f64,
    /// 0.0 - 1.0 fraction
    pub global_progress: f64,
    pub updated_at: DateTime<Utc>,
}
