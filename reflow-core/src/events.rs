use std::sync::Arc;

use parking_lot::Mutex;

use crate::flow::FlowKind;
use crate::location::Chapter;
use crate::BookId;

/// Outbound notifications for UI collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    BookOpening { title: String },
    TocReady { chapters: Vec<Chapter> },
    FlowModeChanged { mode: FlowKind },
    ChapterChanged {
        book_id: BookId,
        chapter_id: String,
        chapter_name: String,
    },
    StatusMessage { text: String },
    MenuRequested,
    BookClosed,
}

pub trait SessionObserver: Send + Sync {
    fn notify(&self, event: &SessionEvent);
}

impl<F> SessionObserver for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn notify(&self, event: &SessionEvent) {
        self(event)
    }
}

/// Observer that queues every event for the caller to drain.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }
}

impl SessionObserver for EventLog {
    fn notify(&self, event: &SessionEvent) {
        self.events.lock().push(event.clone());
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    inner: Mutex<Vec<Arc<dyn SessionObserver>>>,
}

impl Observers {
    pub(crate) fn add(&self, observer: Arc<dyn SessionObserver>) {
        self.inner.lock().push(observer);
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // Snapshot first so an observer may subscribe others while being notified.
        let observers = self.inner.lock().clone();
        for observer in observers {
            observer.notify(&event);
        }
    }

    pub(crate) fn status(&self, text: impl Into<String>) {
        self.emit(SessionEvent::StatusMessage { text: text.into() });
    }
}
