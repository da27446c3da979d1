use thiserror::Error;

use crate::BookId;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The decoder or the render surface could not open the book.
    #[error("failed to load book: {0:#}")]
    BookLoad(#[source] anyhow::Error),

    #[error("book {0} not found in library")]
    NotFound(BookId),

    #[error("invalid flow mode {0:?}; expected \"continuous\" or \"paginated\"")]
    InvalidMode(String),

    /// The render surface rejected a display request. Never fatal to the session.
    #[error("navigation to {target} failed: {source:#}")]
    Navigation {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    /// A later open() or close() replaced this open attempt before it finished.
    #[error("open of book {0} was superseded")]
    Superseded(BookId),
}

impl SessionError {
    pub fn is_fatal_to_open(&self) -> bool {
        matches!(
            self,
            SessionError::BookLoad(_) | SessionError::NotFound(_) | SessionError::Storage(_)
        )
    }
}
