use poem_openapi::{ApiResponse, Object, payload::Json};
use uuid::Uuid;

use crate::domain::{ChapterMeta, PagePosition, PageRange, ReadingProgress};
use crate::reader::{CacheStats, OpenedChapter};

#[derive(Debug, Clone, Object)]
pub struct ErrorDto {
    /// Human-readable error message
    pub message: String,
}

impl ErrorDto {
    pub fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ChapterMetaDto {
    pub id: String,
    pub name: String,
    pub ordinal: String,
    pub is_premium: bool,
}

impl From<ChapterMeta> for ChapterMetaDto {
    fn from(meta: ChapterMeta) -> Self {
        Self {
            id: meta.id,
            name: meta.name,
            ordinal: meta.ordinal,
            is_premium: meta.is_premium,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct SessionDto {
    pub session_id: Uuid,
    pub book_id: String,
    pub chapters: Vec<ChapterMetaDto>,
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct PageRangeDto {
    pub chapter_id: String,
    pub start_global_index: u64,
    pub end_global_index: u64,
}

impl From<PageRange> for PageRangeDto {
    fn from(range: PageRange) -> Self {
        Self {
            chapter_id: range.chapter_id,
            start_global_index: range.start_global_index as u64,
            end_global_index: range.end_global_index as u64,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ChapterPagesDto {
    pub chapter: ChapterMetaDto,
    pub pages: Vec<String>,
    pub range: Option<PageRangeDto>,
    pub is_first: bool,
    pub is_last: bool,
    pub estimated_total_pages: u64,
}

impl From<OpenedChapter> for ChapterPagesDto {
    fn from(opened: OpenedChapter) -> Self {
        Self {
            chapter: opened.meta.into(),
            pages: opened.pages.iter().map(|p| p.text.clone()).collect(),
            range: opened.range.map(Into::into),
            is_first: opened.is_first,
            is_last: opened.is_last,
            estimated_total_pages: opened.estimated_total_pages as u64,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ProgressUpdateDto {
    pub chapter_id: String,
    /// Page within the chapter; omitted or negative means the book detail page
    pub page_index: Option<i64>,
}

impl ProgressUpdateDto {
    pub fn position(&self) -> PagePosition {
        match self.page_index.map(usize::try_from) {
            Some(Ok(index)) => PagePosition::Page(index),
            _ => PagePosition::DetailPage,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct ProgressDto {
    pub book_id: String,
    pub chapter_id: String,
    /// -1 for the book detail page
    pub page_index: i32,
    pub global_page_index: u64,
    pub chapter_progress: f64,
    pub global_progress: f64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ReadingProgress> for ProgressDto {
    fn from(progress: ReadingProgress) -> Self {
        Self {
            book_id: progress.book_id,
            chapter_id: progress.chapter_id,
            page_index: progress.position.to_stored(),
            global_page_index: progress.global_page_index as u64,
            chapter_progress: progress.chapter_progress,
            global_progress: progress.global_progress,
            updated_at: progress.updated_at,
        }
    }
}

#[derive(Debug, Clone, Object)]
#[oai(rename_all = "camelCase")]
pub struct CacheReportDto {
    pub size: u64,
    pub max_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
    pub estimated_total_pages: u64,
    pub page_ranges: Vec<PageRangeDto>,
}

impl CacheReportDto {
    pub fn new(stats: CacheStats, estimated_total_pages: usize, ranges: Vec<PageRange>) -> Self {
        Self {
            size: stats.size as u64,
            max_size: stats.max_size as u64,
            hits: stats.hits,
            misses: stats.misses,
            hit_rate: stats.hit_rate,
            eviction_count: stats.eviction_count,
            estimated_total_pages: estimated_total_pages as u64,
            page_ranges: ranges.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(ApiResponse)]
pub enum SessionOpenResponse {
    /// Session open; chapter list attached
    #[oai(status = 200)]
    Ok(Json<SessionDto>),
}

#[derive(ApiResponse)]
pub enum SessionCloseResponse {
    /// Session closed
    #[oai(status = 204)]
    NoContent,

    /// No session was open for the book
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum ChapterResponse {
    /// Chapter paginated for the requested viewport
    #[oai(status = 200)]
    Ok(Json<ChapterPagesDto>),

    /// Malformed chapter id
    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),

    /// The chapter does not exist
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),

    /// Every content tier failed; retry later
    #[oai(status = 502)]
    BadGateway(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum ProgressPutResponse {
    /// Progress computed and saved
    #[oai(status = 200)]
    Ok(Json<ProgressDto>),

    /// Invalid request body
    #[oai(status = 400)]
    BadRequest(Json<ErrorDto>),

    /// Progress could not be persisted
    #[oai(status = 500)]
    InternalError(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum ProgressGetResponse {
    /// Last saved progress
    #[oai(status = 200)]
    Ok(Json<ProgressDto>),

    /// Nothing saved for the book
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),

    /// Progress store failure
    #[oai(status = 500)]
    InternalError(Json<ErrorDto>),
}

#[derive(ApiResponse)]
pub enum CacheReportResponse {
    /// Session cache statistics and page index state
    #[oai(status = 200)]
    Ok(Json<CacheReportDto>),

    /// No session is open for the book
    #[oai(status = 404)]
    NotFound(Json<ErrorDto>),
}
