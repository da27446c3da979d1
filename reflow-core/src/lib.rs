//! Reading-session core: flow modes, position tracking and chapter resolution
//! for reflowable books rendered through an external rendering surface.

use std::path::Path;

use once_cell::sync::Lazy;
use uuid::Uuid;

pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod location;
pub mod progress;
pub mod session;
pub mod store;
pub mod surface;
pub mod switch;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AdvanceOutcome, Direction, RenderSurfaceAdapter, CHAPTER_NAV_ID};
pub use config::{AppConfig, ReaderConfig, StorageConfig, ViewportConfig};
pub use error::{SessionError, SessionResult};
pub use events::{EventLog, SessionEvent, SessionObserver};
pub use flow::{
    ContinuousConfig, FlowDirection, FlowKind, FlowMode, Padding, PaginatedConfig,
    RenderConfiguration, Spread, Theme, ThemeRules, Typography, Viewport, FONT_SIZE_DEFAULT,
    FONT_SIZE_MAX, FONT_SIZE_MIN,
};
pub use location::{Chapter, TocEntry};
pub use progress::ProgressTracker;
pub use session::{Gesture, ReadingSession, SessionState};
pub use store::{
    BookStore, FileBookStore, FileSettingsStore, MemoryBookStore, MemorySettingsStore,
    Preferences, SettingsStore, StoredBook,
};
pub use surface::{
    BookDecoder, BookMetadata, ContentView, DecodedBook, Relocation, RelocationListener,
    RenderSurface,
};

pub type BookId = Uuid;

static BOOK_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f1d6c0a-52b4-5e8e-9a43-7c1be0d2a915").expect("valid namespace UUID")
});

/// Stable id for a book file, so re-importing the same path keeps its progress.
pub fn book_id_for_path(path: &Path) -> BookId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&BOOK_NAMESPACE, rendered.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn book_id_is_stable_for_same_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sample.json");
        std::fs::write(&file_path, b"{}").unwrap();

        assert_eq!(book_id_for_path(&file_path), book_id_for_path(&file_path));
    }

    #[test]
    fn book_id_differs_between_paths() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");
        std::fs::write(&first, b"{}").unwrap();
        std::fs::write(&second, b"{}").unwrap();

        assert_ne!(book_id_for_path(&first), book_id_for_path(&second));
    }
}
