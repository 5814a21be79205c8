use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use super::content_service::ChapterContentService;
use super::pagination::PaginationCoordinator;
use crate::domain::{ChapterMeta, Viewport};

/// Which neighbors of the current chapter to warm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchDirection {
    /// The next two chapters.
    Forward,
    /// The previous two chapters.
    Backward,
    /// One chapter on each side.
    Both,
}

impl PrefetchDirection {
    fn neighbors(self, position: usize, len: usize) -> Vec<usize> {
        let candidates = match self {
            PrefetchDirection::Forward => [position.checked_add(1), position.checked_add(2)],
            PrefetchDirection::Backward => [position.checked_sub(1), position.checked_sub(2)],
            PrefetchDirection::Both => [position.checked_sub(1), position.checked_add(1)],
        };
        candidates.into_iter().flatten().filter(|&i| i < len).collect()
    }
}

struct InFlight {
    generation: u64,
    handle: JoinHandle<()>,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

fn lock(map: &InFlightMap) -> MutexGuard<'_, HashMap<String, InFlight>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Warms neighboring chapters on background tasks.
///
/// One task per chapter; a chapter already cached or already being fetched is
/// skipped. Tasks fail independently, and all of them are aborted by
/// [`Self::cancel_all`] or when the scheduler is dropped.
pub struct PrefetchScheduler {
    service: Arc<ChapterContentService>,
    pagination: Arc<PaginationCoordinator>,
    in_flight: InFlightMap,
    generation: AtomicU64,
}

impl PrefetchScheduler {
    pub fn new(service: Arc<ChapterContentService>, pagination: Arc<PaginationCoordinator>) -> Self {
        Self {
            service,
            pagination,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Starts prefetching the neighbors of `current_chapter_id` and returns the
    /// ids that got a new task. Never waits for the tasks.
    pub fn schedule(
        &self,
        direction: PrefetchDirection,
        chapters: &[ChapterMeta],
        current_chapter_id: &str,
        viewport: Option<Viewport>,
    ) -> Vec<String> {
        let Some(position) = chapters.iter().position(|c| c.id == current_chapter_id) else {
            tracing::debug!(current_chapter_id, "current chapter not listed, nothing to prefetch");
            return Vec::new();
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(error = %e, "no async runtime, prefetch skipped");
                return Vec::new();
            }
        };
        let layout = viewport.as_ref().and_then(|v| self.pagination.layout(v));

        let mut in_flight = lock(&self.in_flight);
        let mut scheduled = Vec::new();
        for index in direction.neighbors(position, chapters.len()) {
            let chapter_id = &chapters[index].id;
            if in_flight.contains_key(chapter_id) {
                continue;
            }
            if let Some(cached) = self.service.peek_cached(chapter_id)
                && (viewport.is_none() || cached.is_paginated_for(layout))
            {
                continue;
            }

            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            let task = prefetch_task(
                Arc::clone(&self.service),
                Arc::clone(&self.pagination),
                Arc::clone(&self.in_flight),
                chapter_id.clone(),
                viewport,
                generation,
            );
            let span = tracing::debug_span!("prefetch", chapter_id = %chapter_id);
            let handle = runtime.spawn(task.instrument(span));
            in_flight.insert(chapter_id.clone(), InFlight { generation, handle });
            scheduled.push(chapter_id.clone());
        }

        if !scheduled.is_empty() {
            tracing::debug!(?direction, ?scheduled, "prefetch scheduled");
        }
        scheduled
    }

    /// Aborts every outstanding prefetch. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = lock(&self.in_flight).drain().collect();
        for (_, task) in &drained {
            task.handle.abort();
        }
        if !drained.is_empty() {
            tracing::debug!(cancelled = drained.len(), "prefetch tasks cancelled");
        }
        drained.len()
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Resolves once no prefetch is running.
    pub async fn wait_idle(&self) {
        while self.in_flight_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Removes a task's in-flight entry however the task ends, unless a newer
/// task for the same chapter has taken the slot.
struct InFlightGuard {
    in_flight: InFlightMap,
    chapter_id: String,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(&self.chapter_id)
            .is_some_and(|task| task.generation == self.generation)
        {
            in_flight.remove(&self.chapter_id);
        }
    }
}

async fn prefetch_task(
    service: Arc<ChapterContentService>,
    pagination: Arc<PaginationCoordinator>,
    in_flight: InFlightMap,
    chapter_id: String,
    viewport: Option<Viewport>,
    generation: u64,
) {
    let _guard = InFlightGuard {
        in_flight,
        chapter_id: chapter_id.clone(),
        generation,
    };
    match service.preload(&chapter_id, viewport.as_ref()).await {
        Some(chapter) if chapter.has_pages() => {
            pagination.record_pages(&chapter_id, chapter.pages.len(), chapter.layout);
            tracing::debug!(pages = chapter.pages.len(), "prefetched and paginated");
        }
        Some(_) => tracing::debug!("prefetched"),
        None => tracing::warn!("prefetch did not load the chapter"),
    }
}
