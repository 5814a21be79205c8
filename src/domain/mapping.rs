// Mapping from remote DTOs to domain models, plus content normalization

use super::models::{ChapterMeta, ContentResult};
use crate::content_client::{ChapterDto, ContentDto};

/// `position` is the zero-based slot in the listing, used when the service
/// omits an ordinal.
pub fn map_chapter(position: usize, dto: &ChapterDto) -> ChapterMeta {
    let ordinal = dto
        .ordinal
        .clone()
        .unwrap_or_else(|| (position + 1).to_string());
    let name = dto
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Chapter {}", ordinal));
    ChapterMeta {
        id: dto.id.clone(),
        name,
        ordinal,
        is_premium: dto.is_premium,
    }
}

pub fn map_content(requested_id: &str, dto: ContentDto) -> ContentResult {
    // Trust the id we asked for; some services echo a numeric id in another format.
    if let Some(echoed) = dto.chapter_id.as_deref()
        && echoed != requested_id
    {
        tracing::debug!(requested_id, echoed, "content payload echoed a different chapter id");
    }
    ContentResult {
        chapter_id: requested_id.to_string(),
        title: dto.title.filter(|t| !t.trim().is_empty()),
        content: dto.content,
    }
}

/// Unify line endings and strip trailing whitespace. Returns an empty string
/// when nothing readable is left.
pub fn normalize_content(raw: &str) -> String {
    let unified = if raw.contains('\r') {
        raw.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        raw.to_string()
    };
    let trimmed_len = unified.trim_end().len();
    let mut out = unified;
    out.truncate(trimmed_len);
    out
}

/// Metadata for a fetched chapter: the listing entry wins, the payload title
/// fills in when the chapter was never listed.
pub fn merge_meta(result: &ContentResult, listed: Option<&ChapterMeta>) -> ChapterMeta {
    match listed {
        Some(meta) => meta.clone(),
        None => ChapterMeta {
            id: result.chapter_id.clone(),
            name: result
                .title
                .clone()
                .unwrap_or_else(|| result.chapter_id.clone()),
            ordinal: String::new(),
            is_premium: false,
        },
    }
}
