use std::sync::Arc;

use chrono::Utc;

use super::pagination::ChapterLocation;
use crate::domain::{Page, PagePosition, ReadingProgress};
use crate::storage::ProgressStore;

/// Computes the reader's position in the book and persists it through a
/// [`ProgressStore`].
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
}

fn fraction(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 || !numerator.is_finite() {
        return 0.0;
    }
    (numerator / denominator).clamp(0.0, 1.0)
}

/// Fraction of the chapter read. The detail page and chapters without pages
/// count as not started.
pub fn chapter_fraction(position: PagePosition, pages: Option<&[Page]>) -> f64 {
    match (position, pages) {
        (PagePosition::Page(index), Some(pages)) if !pages.is_empty() => {
            fraction(index as f64 + 1.0, pages.len() as f64)
        }
        _ => 0.0,
    }
}

/// Global page index: exact when the chapter's range is known, otherwise the
/// chapter-local index.
pub fn global_page_index(position: PagePosition, location: Option<&ChapterLocation>) -> usize {
    let local = position.page_index().unwrap_or(0);
    match location.and_then(|l| l.range.as_ref()) {
        Some(range) => range.start_global_index + local,
        None => local,
    }
}

/// Fraction of the book read. Uses the exact page total when every chapter is
/// counted and this chapter's range is known, otherwise chapter granularity.
/// The detail page counts as not started.
pub fn global_fraction(
    position: PagePosition,
    chapter_fraction: f64,
    global_index: usize,
    location: Option<&ChapterLocation>,
) -> f64 {
    let (PagePosition::Page(_), Some(location)) = (position, location) else {
        return 0.0;
    };
    if let (Some(total), Some(_)) = (location.exact_total_pages, &location.range) {
        return fraction(global_index as f64 + 1.0, total as f64);
    }
    match location.position {
        Some(chapter) => fraction(
            chapter as f64 + chapter_fraction,
            location.chapter_count as f64,
        ),
        None => 0.0,
    }
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }

    pub fn compute(
        book_id: &str,
        chapter_id: &str,
        position: PagePosition,
        location: Option<&ChapterLocation>,
        pages: Option<&[Page]>,
    ) -> ReadingProgress {
        let chapter_progress = chapter_fraction(position, pages);
        let global_index = global_page_index(position, location);
        ReadingProgress {
            book_id: book_id.to_string(),
            chapter_id: chapter_id.to_string(),
            position,
            global_page_index: global_index,
            chapter_progress,
            global_progress: global_fraction(position, chapter_progress, global_index, location),
            updated_at: Utc::now(),
        }
    }

    /// Computes the record and upserts it as a whole. Later calls for the same
    /// book replace earlier ones.
    #[tracing::instrument(level = "debug", skip(self, location, pages))]
    pub async fn compute_and_save(
        &self,
        book_id: &str,
        chapter_id: &str,
        position: PagePosition,
        location: Option<&ChapterLocation>,
        pages: Option<&[Page]>,
    ) -> anyhow::Result<ReadingProgress> {
        let progress = Self::compute(book_id, chapter_id, position, location, pages);
        self.store.save(&progress).await?;
        tracing::debug!(
            global_page_index = progress.global_page_index,
            chapter_progress = progress.chapter_progress,
            global_progress = progress.global_progress,
            "progress saved"
        );
        Ok(progress)
    }

    pub async fn load(&self, book_id: &str) -> anyhow::Result<Option<ReadingProgress>> {
        self.store.load(book_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PageRange;
    use crate::storage::MemoryProgressStore;

    fn pages(n: usize) -> Vec<Page> {
        (0..n)
            .map(|index| Page {
                index,
                text: format!("page {index}"),
            })
            .collect()
    }

    fn location(position: usize, range: Option<(usize, usize)>, total: Option<usize>) -> ChapterLocation {
        ChapterLocation {
            position: Some(position),
            chapter_count: 4,
            range: range.map(|(start, end)| PageRange {
                chapter_id: "ch".into(),
                start_global_index: start,
                end_global_index: end,
            }),
            exact_total_pages: total,
            estimated_total_pages: total.unwrap_or(4),
        }
    }

    #[test]
    fn detail_page_is_zero() {
        let pages = pages(5);
        for loc in [
            location(0, Some((0, 4)), Some(20)),
            location(2, Some((10, 14)), Some(20)),
            location(2, None, None),
        ] {
            let progress = ProgressTracker::compute(
                "b",
                "ch",
                PagePosition::DetailPage,
                Some(&loc),
                Some(pages.as_slice()),
            );
            assert_eq!(progress.chapter_progress, 0.0);
            assert_eq!(progress.global_progress, 0.0);
        }
        let first = location(0, Some((0, 4)), Some(20));
        assert_eq!(global_page_index(PagePosition::DetailPage, Some(&first)), 0);
    }

    #[test]
    fn chapter_fraction_counts_current_page() {
        let pages = pages(4);
        assert_eq!(chapter_fraction(PagePosition::Page(0), Some(pages.as_slice())), 0.25);
        assert_eq!(chapter_fraction(PagePosition::Page(3), Some(pages.as_slice())), 1.0);
        assert_eq!(chapter_fraction(PagePosition::Page(2), Some(&[][..])), 0.0);
        assert_eq!(chapter_fraction(PagePosition::Page(2), None), 0.0);
    }

    #[test]
    fn global_index_uses_known_range() {
        let known = location(1, Some((10, 19)), None);
        assert_eq!(global_page_index(PagePosition::Page(3), Some(&known)), 13);
        let unknown = location(1, None, None);
        assert_eq!(global_page_index(PagePosition::Page(3), Some(&unknown)), 3);
        assert_eq!(global_page_index(PagePosition::DetailPage, Some(&known)), 10);
    }

    #[test]
    fn global_fraction_prefers_exact_total() {
        let pages = pages(10);
        let exact = ProgressTracker::compute(
            "b",
            "ch",
            PagePosition::Page(4),
            Some(&location(1, Some((10, 19)), Some(40))),
            Some(pages.as_slice()),
        );
        assert_eq!(exact.global_page_index, 14);
        assert_eq!(exact.global_progress, 15.0 / 40.0);

        let estimated = ProgressTracker::compute(
            "b",
            "ch",
            PagePosition::Page(4),
            Some(&location(1, None, None)),
            Some(pages.as_slice()),
        );
        assert_eq!(estimated.global_progress, (1.0 + 0.5) / 4.0);
    }

    #[test]
    fn fractions_stay_in_bounds() {
        let pages = pages(3);
        for index in 0..10 {
            for position in [PagePosition::DetailPage, PagePosition::Page(index)] {
                for loc in [
                    None,
                    Some(location(3, Some((90, 92)), Some(50))),
                    Some(location(7, None, None)),
                ] {
                    let p = ProgressTracker::compute("b", "ch", position, loc.as_ref(), Some(pages.as_slice()));
                    assert!((0.0..=1.0).contains(&p.chapter_progress));
                    assert!((0.0..=1.0).contains(&p.global_progress));
                }
            }
        }
    }

    #[tokio::test]
    async fn saves_last_write_per_book() -> anyhow::Result<()> {
        let store = Arc::new(MemoryProgressStore::new());
        let tracker = ProgressTracker::new(store.clone());
        let pages = pages(2);

        tracker
            .compute_and_save("b", "ch-1", PagePosition::Page(0), None, Some(pages.as_slice()))
            .await?;
        let latest = tracker
            .compute_and_save("b", "ch-2", PagePosition::Page(1), None, Some(pages.as_slice()))
            .await?;

        assert_eq!(store.len().await, 1);
        assert_eq!(tracker.load("b").await?, Some(latest));
        assert_eq!(tracker.load("other").await?, None);
        Ok(())
    }
}
