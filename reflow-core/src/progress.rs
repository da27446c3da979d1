//! Turns relocation events into chapter tracking and persisted progress.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::adapter::RenderSurfaceAdapter;
use crate::events::SessionEvent;
use crate::location::{self, strip_fragment, Chapter};
use crate::session::ActiveBook;
use crate::store::BookStore;
use crate::surface::Relocation;
use crate::BookId;

pub struct ProgressTracker {
    store: Arc<dyn BookStore>,
    last_saved: Mutex<Option<SavedProgress>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedProgress {
    book_id: BookId,
    location: String,
    chapter: Option<String>,
}

/// Everything the session needs to finish handling one relocation once the
/// state lock has been released.
pub(crate) struct ProgressUpdate {
    pub(crate) book_id: BookId,
    pub(crate) location: String,
    pub(crate) chapter_name: Option<String>,
    pub(crate) chapter_event: Option<SessionEvent>,
    pub(crate) adapter: Arc<RenderSurfaceAdapter>,
    pub(crate) has_prev: bool,
    pub(crate) has_next: bool,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self {
            store,
            last_saved: Mutex::new(None),
        }
    }

    pub(crate) fn observe(&self, active: &mut ActiveBook, relocation: &Relocation) -> ProgressUpdate {
        active.location = Some(relocation.cfi.clone());
        active.progress = active.adapter.compute_progress_percentage(relocation);

        let href = relocation
            .href
            .clone()
            .or_else(|| active.book.spine_href(&relocation.cfi));
        let resolved = href
            .as_deref()
            .and_then(|href| resolve_chapter(&active.chapters, active.current_chapter, href));

        let mut chapter_event = None;
        if let Some(index) = resolved {
            let chapter = &active.chapters[index];
            let changed = active.current_chapter != Some(index)
                || active.chapter_name.as_deref() != Some(chapter.label.as_str());
            if changed {
                chapter_event = Some(SessionEvent::ChapterChanged {
                    book_id: active.book_id,
                    chapter_id: chapter.href.clone(),
                    chapter_name: chapter.label.clone(),
                });
            }
            active.current_chapter = Some(index);
            active.chapter_name = Some(chapter.label.clone());
        } else {
            debug!(cfi = %relocation.cfi, "relocation outside any listed chapter");
        }

        let (has_prev, has_next) = match active.current_chapter {
            Some(index) => (index > 0, index + 1 < active.chapters.len()),
            None => (false, false),
        };

        ProgressUpdate {
            book_id: active.book_id,
            location: relocation.cfi.clone(),
            chapter_name: active.chapter_name.clone(),
            chapter_event,
            adapter: Arc::clone(&active.adapter),
            has_prev,
            has_next,
        }
    }

    /// Writes the position unless it equals the last one written. Returns
    /// whether a write happened.
    pub async fn persist(
        &self,
        book_id: BookId,
        location: &str,
        chapter: Option<&str>,
    ) -> Result<bool> {
        let record = SavedProgress {
            book_id,
            location: location.to_string(),
            chapter: chapter.map(str::to_string),
        };
        if self.last_saved.lock().as_ref() == Some(&record) {
            return Ok(false);
        }
        self.store.save_progress(book_id, location, chapter).await?;
        debug!(book = %book_id, location, "progress saved");
        *self.last_saved.lock() = Some(record);
        Ok(true)
    }
}

/// Keeps the tracked chapter when it still contains `href`, so that several
/// entries pointing into one document do not pull the index back to the first.
pub fn resolve_chapter(chapters: &[Chapter], current: Option<usize>, href: &str) -> Option<usize> {
    if let Some(chapter) = current.and_then(|idx| chapters.get(idx)) {
        let candidate = strip_fragment(&chapter.href);
        let target = strip_fragment(href);
        if !candidate.is_empty()
            && !target.is_empty()
            && (candidate.contains(target) || target.contains(candidate))
        {
            return current;
        }
    }
    location::match_chapter_by_location(chapters, href).map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{flatten, TocEntry};
    use crate::store::MemoryBookStore;

    fn chapters() -> Vec<Chapter> {
        flatten(&[
            TocEntry::new("Part One", "part1.xhtml"),
            TocEntry::new("Section Two", "part1.xhtml#two"),
            TocEntry::new("Part Two", "part2.xhtml"),
        ])
    }

    #[test]
    fn resolve_keeps_current_chapter_inside_shared_document() {
        let chapters = chapters();
        assert_eq!(resolve_chapter(&chapters, Some(1), "part1.xhtml"), Some(1));
        assert_eq!(resolve_chapter(&chapters, None, "part1.xhtml"), Some(0));
        assert_eq!(resolve_chapter(&chapters, Some(1), "part2.xhtml"), Some(2));
        assert_eq!(resolve_chapter(&chapters, Some(0), "appendix.xhtml"), None);
    }

    #[tokio::test]
    async fn persist_skips_identical_writes() {
        let store = Arc::new(MemoryBookStore::new());
        let id = BookId::from_u128(5);
        store.insert(id, b"book".to_vec());
        let tracker = ProgressTracker::new(store.clone());

        assert!(tracker.persist(id, "a@0", Some("One")).await.unwrap());
        assert!(!tracker.persist(id, "a@0", Some("One")).await.unwrap());
        assert!(tracker.persist(id, "a@100", Some("One")).await.unwrap());

        let (location, chapter) = store.progress(id).unwrap();
        assert_eq!(location.as_deref(), Some("a@100"));
        assert_eq!(chapter.as_deref(), Some("One"));
    }

    #[tokio::test]
    async fn failed_write_is_retried_next_time() {
        let store = Arc::new(MemoryBookStore::new());
        let id = BookId::from_u128(6);
        let tracker = ProgressTracker::new(store.clone());

        assert!(tracker.persist(id, "a@0", None).await.is_err());
        store.insert(id, b"book".to_vec());
        assert!(tracker.persist(id, "a@0", None).await.unwrap());
    }
}
