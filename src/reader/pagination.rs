use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use unicode_width::UnicodeWidthChar;

use crate::domain::{Page, PageLayout, PageRange, Viewport};

/// Splits raw chapter text into viewport-sized pages.
///
/// Implementations must be pure: the same content and layout always give the
/// same pages, and the pages are contiguous slices of the content.
pub trait TextPaginator: Send + Sync {
    /// Text grid for a viewport, `None` when the viewport cannot hold text.
    fn layout(&self, viewport: &Viewport) -> Option<PageLayout>;

    fn split(&self, content: &str, layout: PageLayout) -> Vec<Page>;
}

/// Paginates with a fixed-width cell model: one column is half an em, so
/// wide (CJK) characters take two columns. Lines wrap after whitespace when
/// possible, otherwise mid-word.
#[derive(Debug, Default, Clone, Copy)]
pub struct CellPaginator;

impl TextPaginator for CellPaginator {
    fn layout(&self, viewport: &Viewport) -> Option<PageLayout> {
        if !viewport.is_valid() {
            return None;
        }
        let font_px = viewport.font_size_pt * viewport.density;
        let column_px = font_px / 2.0;
        let line_px = font_px * viewport.line_height;
        let columns = (viewport.width_px / column_px).floor() as usize;
        let rows = (viewport.height_px / line_px).floor() as usize;
        Some(PageLayout {
            columns: columns.max(1),
            rows: rows.max(1),
        })
    }

    fn split(&self, content: &str, layout: PageLayout) -> Vec<Page> {
        let columns = layout.columns.max(1);
        let rows = layout.rows.max(1);
        let mut pages = Vec::new();
        let mut page_start = 0;
        let mut row = 0;
        let mut col = 0;
        // Byte offset just past the last whitespace on the current row, and the
        // display width of what follows it.
        let mut soft_break: Option<usize> = None;
        let mut tail_width = 0;

        for (offset, ch) in content.char_indices() {
            if ch == '\n' {
                row += 1;
                col = 0;
                soft_break = None;
                tail_width = 0;
                if row >= rows {
                    let end = offset + 1;
                    push_page(&mut pages, content, page_start, end);
                    page_start = end;
                    row = 0;
                }
                continue;
            }

            let width = ch.width().unwrap_or(0);
            if col > 0 && col + width > columns {
                row += 1;
                if row >= rows {
                    let cut = match soft_break {
                        Some(at) if at > page_start => at,
                        _ => offset,
                    };
                    push_page(&mut pages, content, page_start, cut);
                    page_start = cut;
                    row = 0;
                    col = if cut == offset { 0 } else { tail_width };
                } else {
                    // The unfinished word moves down to the new row.
                    col = if soft_break.is_some() { tail_width } else { 0 };
                }
                soft_break = None;
                tail_width = col;
            }

            col += width;
            if ch.is_whitespace() {
                soft_break = Some(offset + ch.len_utf8());
                tail_width = 0;
            } else {
                tail_width += width;
            }
        }

        if page_start < content.len() {
            push_page(&mut pages, content, page_start, content.len());
        }
        pages
    }
}

fn push_page(pages: &mut Vec<Page>, content: &str, start: usize, end: usize) {
    pages.push(Page {
        index: pages.len(),
        text: content[start..end].to_string(),
    });
}

/// Paginate with the defensive rules shared by every caller: empty content has
/// no pages, and a viewport that cannot hold text yields the whole content as
/// a single page.
pub fn paginate_with(
    paginator: &dyn TextPaginator,
    content: &str,
    viewport: &Viewport,
) -> (Vec<Page>, Option<PageLayout>) {
    if content.is_empty() {
        return (Vec::new(), None);
    }
    let Some(layout) = paginator.layout(viewport) else {
        tracing::warn!(?viewport, "unusable viewport, keeping chapter on a single page");
        return (
            vec![Page {
                index: 0,
                text: content.to_string(),
            }],
            None,
        );
    };
    let mut pages = paginator.split(content, layout);
    if pages.is_empty() {
        pages.push(Page {
            index: 0,
            text: content.to_string(),
        });
    }
    (pages, Some(layout))
}

/// Where a chapter sits in the book's global page numbering.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterLocation {
    /// Zero-based slot in the chapter list, if the chapter is listed.
    pub position: Option<usize>,
    pub chapter_count: usize,
    pub range: Option<PageRange>,
    pub exact_total_pages: Option<usize>,
    pub estimated_total_pages: usize,
}

/// Turns chapter text into pages and keeps the chapter → global page range
/// table for the book.
///
/// Ranges are laid out over the chapters whose page counts are known, in list
/// order: the first known chapter starts at 0 and each later one right after
/// the previous known chapter. A present range always starts at the sum of the
/// known counts before it. When a chapter's count appears, changes or goes
/// away, every later range is dropped rather than shifted; it comes back the
/// next time that chapter's count is recorded.
pub struct PaginationCoordinator {
    paginator: Arc<dyn TextPaginator>,
    index: Mutex<PageIndex>,
}

#[derive(Debug, Default)]
struct PageIndex {
    order: Vec<String>,
    positions: HashMap<String, usize>,
    counts: Vec<Option<usize>>,
    /// One slot per chapter in `order`; `None` while unknown or invalidated.
    ranges: Vec<Option<PageRange>>,
    known_pages: usize,
    known_chapters: usize,
    high_water: usize,
    /// Layout the counts were produced for.
    layout: Option<PageLayout>,
}

impl PageIndex {
    /// Where the chapter at `position` goes given the ranges already laid out.
    /// `None` when its count is unknown or the previous known chapter has no
    /// range to follow.
    fn placement(&self, position: usize) -> Option<PageRange> {
        let count = self.counts[position]?;
        let start = match self.counts[..position].iter().rposition(Option::is_some) {
            Some(previous) => self.ranges[previous].as_ref()?.end_global_index + 1,
            None => 0,
        };
        Some(PageRange {
            chapter_id: self.order[position].clone(),
            start_global_index: start,
            end_global_index: start + count - 1,
        })
    }

    fn invalidate_after(&mut self, position: usize) {
        let dropped = self.ranges[position + 1..]
            .iter_mut()
            .filter_map(Option::take)
            .count();
        if dropped > 0 {
            tracing::debug!(dropped, after = position, "invalidating shifted page ranges");
        }
    }

    fn refresh(&mut self, position: usize) {
        let range = self.placement(position);
        if self.ranges[position] != range {
            self.ranges[position] = range;
            self.invalidate_after(position);
        }
    }

    /// Lays out every known chapter from scratch.
    fn rebuild(&mut self) {
        let mut next = 0;
        self.ranges = self
            .order
            .iter()
            .zip(&self.counts)
            .map(|(chapter_id, count)| {
                count.map(|count| {
                    let range = PageRange {
                        chapter_id: chapter_id.clone(),
                        start_global_index: next,
                        end_global_index: next + count - 1,
                    };
                    next += count;
                    range
                })
            })
            .collect();
    }

    fn set_count(&mut self, position: usize, count: Option<usize>) {
        if let Some(old) = self.counts[position].take() {
            self.known_pages -= old;
            self.known_chapters -= 1;
        }
        if let Some(new) = count {
            self.known_pages += new;
            self.known_chapters += 1;
        }
        self.counts[position] = count;
        self.refresh(position);
    }

    fn record(&mut self, chapter_id: &str, page_count: usize) -> Option<PageRange> {
        let Some(&position) = self.positions.get(chapter_id) else {
            tracing::debug!(chapter_id, "page count for unlisted chapter ignored");
            return None;
        };
        if page_count == 0 {
            self.set_count(position, None);
            return None;
        }
        if self.counts[position] == Some(page_count) {
            self.refresh(position);
        } else {
            self.set_count(position, Some(page_count));
        }
        self.ranges[position].clone()
    }

    fn range_at(&self, position: usize) -> Option<PageRange> {
        self.ranges.get(position).cloned().flatten()
    }

    fn clear_counts(&mut self) {
        self.counts = vec![None; self.order.len()];
        self.ranges = vec![None; self.order.len()];
        self.known_pages = 0;
        self.known_chapters = 0;
        self.high_water = 0;
    }

    fn estimated_total(&mut self) -> usize {
        // Every unresolved chapter has at least one page.
        let lower_bound = self.known_pages + (self.order.len() - self.known_chapters);
        self.high_water = self.high_water.max(lower_bound);
        self.high_water
    }

    fn exact_total(&self) -> Option<usize> {
        (self.known_chapters == self.order.len()).then_some(self.known_pages)
    }
}

impl PaginationCoordinator {
    pub fn new(paginator: Arc<dyn TextPaginator>) -> Self {
        Self {
            paginator,
            index: Mutex::new(PageIndex::default()),
        }
    }

    pub fn paginator(&self) -> Arc<dyn TextPaginator> {
        Arc::clone(&self.paginator)
    }

    fn index(&self) -> MutexGuard<'_, PageIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn layout(&self, viewport: &Viewport) -> Option<PageLayout> {
        self.paginator.layout(viewport)
    }

    /// Pure split of `content` for `viewport`; never empty for non-empty content.
    pub fn paginate(&self, content: &str, viewport: &Viewport) -> Vec<Page> {
        paginate_with(self.paginator.as_ref(), content, viewport).0
    }

    /// Installs the book's chapter order. Known counts of chapters that are
    /// still listed survive and are laid out again from 0.
    pub fn set_chapter_order(&self, chapter_ids: Vec<String>) {
        let mut index = self.index();
        if index.order == chapter_ids {
            return;
        }
        let previous: HashMap<String, usize> = index
            .order
            .iter()
            .zip(index.counts.iter())
            .filter_map(|(id, count)| count.map(|c| (id.clone(), c)))
            .collect();
        let counts: Vec<Option<usize>> = chapter_ids
            .iter()
            .map(|id| previous.get(id).copied())
            .collect();
        *index = PageIndex {
            positions: chapter_ids
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), i))
                .collect(),
            known_pages: counts.iter().flatten().sum(),
            known_chapters: counts.iter().flatten().count(),
            counts,
            ranges: vec![None; chapter_ids.len()],
            order: chapter_ids,
            high_water: 0,
            layout: index.layout,
        };
        index.rebuild();
    }

    /// Records how many pages a chapter has and returns its range when it can
    /// be laid out. Recording an unchanged count restores a dropped range.
    pub fn record_page_count(&self, chapter_id: &str, page_count: usize) -> Option<PageRange> {
        self.index().record(chapter_id, page_count)
    }

    /// Like [`Self::record_page_count`], but only when the pages were produced
    /// for the index's current layout.
    pub fn record_pages(
        &self,
        chapter_id: &str,
        page_count: usize,
        layout: Option<PageLayout>,
    ) -> Option<PageRange> {
        let mut index = self.index();
        if index.layout != layout {
            tracing::debug!(chapter_id, "page count for an outdated layout ignored");
            return None;
        }
        index.record(chapter_id, page_count)
    }

    /// Switches the layout page counts refer to. Every count is dropped when
    /// it changes.
    pub fn set_layout(&self, layout: Option<PageLayout>) -> bool {
        let mut index = self.index();
        if index.layout == layout {
            return false;
        }
        index.layout = layout;
        index.clear_counts();
        true
    }

    /// Marks a chapter's page count unknown; every later range is dropped.
    pub fn forget(&self, chapter_id: &str) {
        let mut index = self.index();
        if let Some(&position) = index.positions.get(chapter_id) {
            index.set_count(position, None);
        }
    }

    /// Drops every count, e.g. after the viewport changed.
    pub fn reset_counts(&self) {
        self.index().clear_counts();
    }

    pub fn range(&self, chapter_id: &str) -> Option<PageRange> {
        let index = self.index();
        let position = *index.positions.get(chapter_id)?;
        index.range_at(position)
    }

    /// Known ranges in chapter order.
    pub fn ranges(&self) -> Vec<PageRange> {
        self.index().ranges.iter().flatten().cloned().collect()
    }

    pub fn page_count(&self, chapter_id: &str) -> Option<usize> {
        let index = self.index();
        let position = *index.positions.get(chapter_id)?;
        index.counts[position]
    }

    /// Lower-bound estimate of the book's page total. Never decreases while the
    /// chapter order and layout stay the same, and equals the exact total once
    /// every chapter is counted.
    pub fn estimated_total_pages(&self) -> usize {
        self.index().estimated_total()
    }

    pub fn exact_total_pages(&self) -> Option<usize> {
        self.index().exact_total()
    }

    pub fn locate(&self, chapter_id: &str) -> ChapterLocation {
        let mut index = self.index();
        let position = index.positions.get(chapter_id).copied();
        ChapterLocation {
            position,
            chapter_count: index.order.len(),
            range: position.and_then(|p| index.range_at(p)),
            exact_total_pages: index.exact_total(),
            estimated_total_pages: index.estimated_total(),
        }
    }
}
