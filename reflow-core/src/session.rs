//! The open-book state machine: `Closed → Opening → Ready → Closed`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{AdvanceOutcome, Direction, RenderSurfaceAdapter};
use crate::error::{SessionError, SessionResult};
use crate::events::{Observers, SessionEvent, SessionObserver};
use crate::flow::{
    FlowKind, FlowMode, RenderConfiguration, Theme, Viewport, DEFAULT_SPREAD_MIN_WIDTH,
    FONT_SIZE_MAX, FONT_SIZE_MIN,
};
use crate::location::{self, Chapter};
use crate::progress::ProgressTracker;
use crate::store::{BookStore, Preferences};
use crate::surface::{BookDecoder, DecodedBook, Relocation, RelocationListener};
use crate::BookId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Ready,
}

/// Input events as delivered by the gesture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    TapLeft,
    TapRight,
    TapCenter,
    DoubleTap,
}

pub(crate) struct ActiveBook {
    pub(crate) book_id: BookId,
    pub(crate) title: String,
    pub(crate) book: Arc<dyn DecodedBook>,
    pub(crate) adapter: Arc<RenderSurfaceAdapter>,
    pub(crate) chapters: Vec<Chapter>,
    pub(crate) current_chapter: Option<usize>,
    pub(crate) progress: u8,
    pub(crate) location: Option<String>,
    pub(crate) chapter_name: Option<String>,
}

pub(crate) enum Lifecycle {
    Closed,
    Opening {
        book_id: BookId,
        attempt: u64,
        pending: PendingOpen,
    },
    Ready(ActiveBook),
}

/// What an in-flight open has acquired so far. Whoever takes it out of the
/// lifecycle releases it, exactly once.
#[derive(Default)]
pub(crate) struct PendingOpen {
    book: Option<Arc<dyn DecodedBook>>,
    adapter: Option<Arc<RenderSurfaceAdapter>>,
}

impl PendingOpen {
    fn release(self) {
        if let Some(adapter) = self.adapter {
            adapter.destroy();
        }
        if let Some(book) = self.book {
            book.destroy();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReaderSettings {
    pub(crate) flow: FlowKind,
    pub(crate) font_size: u16,
    pub(crate) theme: Theme,
    pub(crate) viewport: Viewport,
    pub(crate) spread_min_width: u32,
}

impl ReaderSettings {
    pub(crate) fn mode(&self) -> FlowMode {
        FlowMode::for_kind(self.flow).with_spread_min_width(self.spread_min_width)
    }

    pub(crate) fn configuration(&self) -> RenderConfiguration {
        self.mode()
            .configure(self.viewport, self.font_size, self.theme)
    }
}

struct StampedRelocation {
    generation: u64,
    relocation: Relocation,
}

/// Clears the navigation-in-flight flag when dropped, whatever the outcome.
pub(crate) struct NavigationGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for NavigationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct ReadingSession {
    decoder: Arc<dyn BookDecoder>,
    store: Arc<dyn BookStore>,
    preferences: Preferences,
    pub(crate) observers: Observers,
    tracker: ProgressTracker,
    pub(crate) lifecycle: Mutex<Lifecycle>,
    pub(crate) settings: Mutex<ReaderSettings>,
    navigating: AtomicBool,
    generation: AtomicU64,
    relocation_tx: mpsc::UnboundedSender<StampedRelocation>,
    relocation_rx: Mutex<mpsc::UnboundedReceiver<StampedRelocation>>,
}

impl ReadingSession {
    pub fn new(
        decoder: Arc<dyn BookDecoder>,
        store: Arc<dyn BookStore>,
        preferences: Preferences,
    ) -> Self {
        let settings = ReaderSettings {
            flow: preferences.flow(),
            font_size: preferences.font_size(),
            theme: preferences.theme(),
            viewport: Viewport::default(),
            spread_min_width: DEFAULT_SPREAD_MIN_WIDTH,
        };
        let (relocation_tx, relocation_rx) = mpsc::unbounded_channel();
        Self {
            decoder,
            tracker: ProgressTracker::new(Arc::clone(&store)),
            store,
            preferences,
            observers: Observers::default(),
            lifecycle: Mutex::new(Lifecycle::Closed),
            settings: Mutex::new(settings),
            navigating: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            relocation_tx,
            relocation_rx: Mutex::new(relocation_rx),
        }
    }

    pub fn with_viewport(self, viewport: Viewport) -> Self {
        self.settings.lock().viewport = viewport;
        self
    }

    pub fn with_spread_min_width(self, width: u32) -> Self {
        self.settings.lock().spread_min_width = width;
        self
    }

    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
        self.observers.add(observer);
    }

    pub fn state(&self) -> SessionState {
        match &*self.lifecycle.lock() {
            Lifecycle::Closed => SessionState::Closed,
            Lifecycle::Opening { .. } => SessionState::Opening,
            Lifecycle::Ready(_) => SessionState::Ready,
        }
    }

    pub fn book_id(&self) -> Option<BookId> {
        match &*self.lifecycle.lock() {
            Lifecycle::Closed => None,
            Lifecycle::Opening { book_id, .. } => Some(*book_id),
            Lifecycle::Ready(active) => Some(active.book_id),
        }
    }

    pub fn title(&self) -> Option<String> {
        self.with_active(|active| active.title.clone())
    }

    pub fn flow_kind(&self) -> FlowKind {
        self.settings.lock().flow
    }

    pub fn font_size(&self) -> u16 {
        self.settings.lock().font_size
    }

    pub fn theme(&self) -> Theme {
        self.settings.lock().theme
    }

    pub fn viewport(&self) -> Viewport {
        self.settings.lock().viewport
    }

    pub fn chapters(&self) -> Vec<Chapter> {
        self.with_active(|active| active.chapters.clone())
            .unwrap_or_default()
    }

    pub fn current_chapter(&self) -> Option<usize> {
        self.with_active(|active| active.current_chapter).flatten()
    }

    pub fn current_chapter_name(&self) -> Option<String> {
        self.with_active(|active| active.chapter_name.clone())
            .flatten()
    }

    pub fn progress(&self) -> Option<u8> {
        self.with_active(|active| active.progress)
    }

    /// The live surface's position, falling back to the last settled one.
    pub fn current_location(&self) -> Option<String> {
        self.with_active(|active| {
            active
                .adapter
                .current_location()
                .or_else(|| active.location.clone())
        })
        .flatten()
    }

    pub fn render_configuration(&self) -> Option<RenderConfiguration> {
        self.with_active(|active| active.adapter.configuration())
    }

    fn with_active<R>(&self, f: impl FnOnce(&ActiveBook) -> R) -> Option<R> {
        match &*self.lifecycle.lock() {
            Lifecycle::Ready(active) => Some(f(active)),
            _ => None,
        }
    }

    pub(crate) fn active_adapter(&self) -> Option<Arc<RenderSurfaceAdapter>> {
        self.with_active(|active| Arc::clone(&active.adapter))
    }

    /// Whether `adapter` still belongs to the open book; false once a close,
    /// reopen or surface rebuild has replaced it.
    pub(crate) fn is_live(&self, adapter: &Arc<RenderSurfaceAdapter>) -> bool {
        self.with_active(|active| Arc::ptr_eq(&active.adapter, adapter))
            .unwrap_or(false)
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn begin_navigation(&self) -> Option<NavigationGuard<'_>> {
        self.navigating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| NavigationGuard {
                flag: &self.navigating,
            })
    }

    pub(crate) fn relocation_listener(&self, generation: u64) -> RelocationListener {
        let tx = self.relocation_tx.clone();
        Arc::new(move |relocation| {
            let _ = tx.send(StampedRelocation {
                generation,
                relocation,
            });
        })
    }

    pub(crate) fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    fn is_current_attempt(&self, attempt: u64) -> bool {
        matches!(
            &*self.lifecycle.lock(),
            Lifecycle::Opening { attempt: current, .. } if *current == attempt
        )
    }

    fn ensure_current_attempt(&self, book_id: BookId, attempt: u64) -> SessionResult<()> {
        if self.is_current_attempt(attempt) {
            Ok(())
        } else {
            Err(SessionError::Superseded(book_id))
        }
    }

    /// Hands a resource of the current attempt to the lifecycle so that a close
    /// superseding the attempt can release it. `None` once superseded.
    fn track_pending<R>(&self, attempt: u64, f: impl FnOnce(&mut PendingOpen) -> R) -> Option<R> {
        match &mut *self.lifecycle.lock() {
            Lifecycle::Opening {
                attempt: current,
                pending,
                ..
            } if *current == attempt => Some(f(pending)),
            _ => None,
        }
    }

    #[instrument(skip_all, fields(book = %book_id))]
    pub async fn open(&self, book_id: BookId) -> SessionResult<()> {
        if self.state() != SessionState::Closed {
            self.close();
        }
        let attempt = self.next_generation();
        *self.lifecycle.lock() = Lifecycle::Opening {
            book_id,
            attempt,
            pending: PendingOpen::default(),
        };
        info!("opening book");

        match self.open_attempt(book_id, attempt).await {
            Ok(active) => {
                let chapters = active.chapters.clone();
                {
                    let mut lifecycle = self.lifecycle.lock();
                    let still_current = matches!(
                        &*lifecycle,
                        Lifecycle::Opening { attempt: current, .. } if *current == attempt
                    );
                    // Whoever superseded the attempt already released its resources.
                    if !still_current {
                        return Err(SessionError::Superseded(book_id));
                    }
                    *lifecycle = Lifecycle::Ready(active);
                }
                info!(chapters = chapters.len(), "book ready");
                self.observers.emit(SessionEvent::TocReady { chapters });
                self.process_relocations().await;
                Ok(())
            }
            Err(err) => {
                let abandoned = {
                    let mut lifecycle = self.lifecycle.lock();
                    let current = matches!(
                        &*lifecycle,
                        Lifecycle::Opening { attempt: current, .. } if *current == attempt
                    );
                    if current {
                        match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
                            Lifecycle::Opening { pending, .. } => Some(pending),
                            _ => None,
                        }
                    } else {
                        None
                    }
                };
                let rolled_back = abandoned.is_some();
                if let Some(pending) = abandoned {
                    pending.release();
                }
                match &err {
                    SessionError::Superseded(_) => debug!("open superseded"),
                    SessionError::NotFound(_) => {
                        warn!("book not in library");
                        self.observers.status("Book not found");
                    }
                    other => {
                        warn!(error = %other, "failed to open book");
                        self.observers.status("Could not open this book");
                        if rolled_back {
                            self.observers.emit(SessionEvent::BookClosed);
                        }
                    }
                }
                Err(err)
            }
        }
    }

    async fn open_attempt(&self, book_id: BookId, attempt: u64) -> SessionResult<ActiveBook> {
        let stored = self
            .store
            .get(book_id)
            .await
            .map_err(SessionError::Storage)?
            .ok_or(SessionError::NotFound(book_id))?;
        self.ensure_current_attempt(book_id, attempt)?;

        let book = self
            .decoder
            .decode(&stored.content)
            .await
            .map_err(SessionError::BookLoad)?;
        if self
            .track_pending(attempt, |pending| pending.book = Some(Arc::clone(&book)))
            .is_none()
        {
            book.destroy();
            return Err(SessionError::Superseded(book_id));
        }

        book.opened().await.map_err(SessionError::BookLoad)?;
        self.ensure_current_attempt(book_id, attempt)?;
        let title = book
            .metadata()
            .title
            .unwrap_or_else(|| "Untitled".to_string());
        self.observers.emit(SessionEvent::BookOpening {
            title: title.clone(),
        });

        // The table of contents only exists once navigation data is ready.
        book.ready().await.map_err(SessionError::BookLoad)?;
        self.ensure_current_attempt(book_id, attempt)?;
        let toc = book.toc();

        let settings = *self.settings.lock();
        let mode = settings.mode();
        let config = settings.configuration();
        let fallback = location::default_start(&toc).map(str::to_string);
        let saved = stored.last_location.clone().filter(|loc| !loc.is_empty());
        let start = saved.clone().or_else(|| fallback.clone());
        debug!(start = ?start, mode = %mode.kind(), "resolved start location");

        let adapter = match self
            .start_surface(book_id, attempt, mode, &book, config, start.as_deref())
            .await
        {
            Ok(adapter) => adapter,
            Err(err @ SessionError::Superseded(_)) => return Err(err),
            Err(err) if saved.is_some() => {
                warn!(error = %err, "saved location unusable, starting from the beginning");
                self.start_surface(book_id, attempt, mode, &book, config, fallback.as_deref())
                    .await?
            }
            Err(err) => return Err(err),
        };
        adapter.prepare_locations().await;
        self.ensure_current_attempt(book_id, attempt)?;

        let chapters = location::flatten(&toc);
        let current_chapter = if chapters.is_empty() { None } else { Some(0) };

        Ok(ActiveBook {
            book_id,
            title,
            book,
            adapter,
            chapters,
            current_chapter,
            progress: 0,
            location: stored.last_location,
            chapter_name: stored.last_chapter,
        })
    }

    /// Builds a surface for the current attempt and displays `start`. The
    /// surface is tracked before its first display, replacing (and releasing)
    /// any surface an earlier try left behind.
    async fn start_surface(
        &self,
        book_id: BookId,
        attempt: u64,
        mode: FlowMode,
        book: &Arc<dyn DecodedBook>,
        config: RenderConfiguration,
        start: Option<&str>,
    ) -> SessionResult<Arc<RenderSurfaceAdapter>> {
        let adapter = Arc::new(RenderSurfaceAdapter::new(
            mode,
            Arc::clone(book),
            config,
            attempt,
        )?);
        match self.track_pending(attempt, |pending| pending.adapter.replace(Arc::clone(&adapter))) {
            Some(replaced) => {
                if let Some(replaced) = replaced {
                    replaced.destroy();
                }
            }
            None => {
                adapter.destroy();
                return Err(SessionError::Superseded(book_id));
            }
        }
        adapter.subscribe(self.relocation_listener(attempt));
        let displayed = adapter.display(start).await;
        self.ensure_current_attempt(book_id, attempt)?;
        displayed.map_err(SessionError::BookLoad)?;
        Ok(adapter)
    }

    /// Tears down the open book, if any. Closing a closed session does nothing.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Closed);
        match previous {
            Lifecycle::Closed => return,
            Lifecycle::Opening {
                book_id, pending, ..
            } => {
                pending.release();
                info!(book = %book_id, "cancelled opening book");
            }
            Lifecycle::Ready(active) => {
                active.adapter.destroy();
                active.book.destroy();
                info!(book = %active.book_id, "closed book");
            }
        }
        self.observers.emit(SessionEvent::BookClosed);
    }

    /// Applies every relocation reported since the last call. Events from a
    /// surface that has since been replaced are dropped.
    pub async fn process_relocations(&self) {
        let pending: Vec<StampedRelocation> = {
            let mut rx = self.relocation_rx.lock();
            let mut pending = Vec::new();
            while let Ok(stamped) = rx.try_recv() {
                pending.push(stamped);
            }
            pending
        };
        for stamped in pending {
            self.apply_relocation(stamped).await;
        }
    }

    async fn apply_relocation(&self, stamped: StampedRelocation) {
        let update = {
            let mut lifecycle = self.lifecycle.lock();
            let Lifecycle::Ready(active) = &mut *lifecycle else {
                debug!("relocation while no book is ready");
                return;
            };
            if active.adapter.generation() != stamped.generation {
                debug!(
                    stale = stamped.generation,
                    live = active.adapter.generation(),
                    "ignoring relocation from a replaced surface"
                );
                return;
            }
            self.tracker.observe(active, &stamped.relocation)
        };

        if let Some(event) = update.chapter_event {
            self.observers.emit(event);
        }
        update
            .adapter
            .inject_end_of_chapter_controls(update.has_prev, update.has_next);
        if let Err(err) = self
            .tracker
            .persist(
                update.book_id,
                &update.location,
                update.chapter_name.as_deref(),
            )
            .await
        {
            warn!(?err, "failed to save reading position");
            self.observers.status("Could not save reading position");
        }
    }

    #[instrument(skip(self))]
    pub async fn go_to_chapter(&self, href: &str) -> SessionResult<()> {
        if href.is_empty() {
            return Ok(());
        }
        let Some(_guard) = self.begin_navigation() else {
            debug!("navigation already in flight, dropping go_to_chapter");
            return Ok(());
        };
        let index = self.with_active(|active| location::index_of_href(&active.chapters, href));
        match index {
            Some(Some(index)) => self.navigate_to_chapter(index).await,
            Some(None) => {
                debug!(href, "not a listed chapter");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn next_chapter(&self) -> SessionResult<()> {
        self.step_chapter(1).await
    }

    pub async fn prev_chapter(&self) -> SessionResult<()> {
        self.step_chapter(-1).await
    }

    async fn step_chapter(&self, delta: isize) -> SessionResult<()> {
        let Some(_guard) = self.begin_navigation() else {
            debug!("navigation already in flight, dropping chapter step");
            return Ok(());
        };
        let target = self
            .with_active(|active| {
                let current = active.current_chapter? as isize;
                let target = current + delta;
                if target < 0 || target >= active.chapters.len() as isize {
                    None
                } else {
                    Some(target as usize)
                }
            })
            .flatten();
        match target {
            Some(index) => self.navigate_to_chapter(index).await,
            None => Ok(()),
        }
    }

    /// Caller holds the navigation guard.
    async fn navigate_to_chapter(&self, index: usize) -> SessionResult<()> {
        let Some((adapter, href, previous)) = self.enter_chapter(index) else {
            return Ok(());
        };

        if let Err(source) = adapter.display(Some(&href)).await {
            warn!(href = %href, ?source, "chapter navigation failed");
            if self.is_live(&adapter) {
                self.restore_chapter(previous);
            }
            self.observers.status("Could not open that chapter");
            return Err(SessionError::Navigation {
                target: href,
                source,
            });
        }
        if !self.is_live(&adapter) {
            return Ok(());
        }
        adapter.reapply_typography();
        adapter.scroll_to_top();
        self.process_relocations().await;
        Ok(())
    }

    /// Marks `index` as current before the display starts, so the index is
    /// already right while navigation is in flight.
    fn enter_chapter(
        &self,
        index: usize,
    ) -> Option<(Arc<RenderSurfaceAdapter>, String, Option<usize>)> {
        let mut lifecycle = self.lifecycle.lock();
        let Lifecycle::Ready(active) = &mut *lifecycle else {
            return None;
        };
        let href = active.chapters.get(index)?.href.clone();
        let previous = active.current_chapter.replace(index);
        Some((Arc::clone(&active.adapter), href, previous))
    }

    fn restore_chapter(&self, previous: Option<usize>) {
        if let Lifecycle::Ready(active) = &mut *self.lifecycle.lock() {
            active.current_chapter = previous;
        }
    }

    pub async fn next_page(&self) -> SessionResult<()> {
        self.turn_page(Direction::Forward).await
    }

    pub async fn prev_page(&self) -> SessionResult<()> {
        self.turn_page(Direction::Backward).await
    }

    async fn turn_page(&self, direction: Direction) -> SessionResult<()> {
        let Some(_guard) = self.begin_navigation() else {
            debug!("navigation already in flight, dropping page turn");
            return Ok(());
        };
        let Some(adapter) = self.active_adapter() else {
            return Ok(());
        };
        match adapter.advance(direction).await {
            Ok(AdvanceOutcome::Moved) => {
                if self.is_live(&adapter) {
                    self.process_relocations().await;
                }
                Ok(())
            }
            Ok(AdvanceOutcome::Unsupported) => {
                debug!(?direction, "page turns are not available in continuous flow");
                Ok(())
            }
            Err(source) => {
                warn!(?direction, ?source, "page turn failed");
                self.observers.status("Could not turn the page");
                Err(SessionError::Navigation {
                    target: format!("{direction:?} page"),
                    source,
                })
            }
        }
    }

    /// Changes the font size by `delta` percentage points, clamped to the
    /// supported range. Returns the resulting size.
    pub async fn change_font_size(&self, delta: i32) -> u16 {
        let size = {
            let mut settings = self.settings.lock();
            let next = (i32::from(settings.font_size) + delta)
                .clamp(i32::from(FONT_SIZE_MIN), i32::from(FONT_SIZE_MAX));
            settings.font_size = next as u16;
            settings.font_size
        };
        if let Err(err) = self.preferences.set_font_size(size) {
            warn!(?err, "failed to persist font size");
        }
        self.restyle().await;
        size
    }

    pub async fn set_theme(&self, theme: Theme) {
        self.settings.lock().theme = theme;
        if let Err(err) = self.preferences.set_theme(theme) {
            warn!(?err, "failed to persist theme");
        }
        self.restyle().await;
    }

    async fn restyle(&self) {
        let typography = self.settings.lock().configuration().typography;
        if let Some(adapter) = self.active_adapter() {
            adapter.apply_typography(typography);
            self.process_relocations().await;
        }
    }

    /// Records a new viewport. A change in the spread decision rebuilds the
    /// surface at the current location; anything else is a plain resize.
    pub async fn resize(&self, viewport: Viewport) -> SessionResult<()> {
        let (before, after) = {
            let mut settings = self.settings.lock();
            let before = settings.configuration().spread;
            settings.viewport = viewport;
            (before, settings.configuration().spread)
        };
        let Some(adapter) = self.active_adapter() else {
            return Ok(());
        };
        if before == after {
            adapter.resize(viewport);
            self.process_relocations().await;
            return Ok(());
        }
        let Some(_guard) = self.begin_navigation() else {
            debug!("navigation in flight, deferring spread change to the next resize");
            adapter.resize(viewport);
            return Ok(());
        };
        let captured = self.current_location();
        self.rebuild_surface(captured).await
    }

    /// Replaces the live surface with one built from the current settings and
    /// shows `start` on it. Caller holds the navigation guard.
    pub(crate) async fn rebuild_surface(&self, start: Option<String>) -> SessionResult<()> {
        let Some((book, old_adapter)) =
            self.with_active(|active| (Arc::clone(&active.book), Arc::clone(&active.adapter)))
        else {
            return Ok(());
        };
        let settings = *self.settings.lock();
        let generation = self.next_generation();
        let adapter = match RenderSurfaceAdapter::new(
            settings.mode(),
            Arc::clone(&book),
            settings.configuration(),
            generation,
        ) {
            Ok(adapter) => Arc::new(adapter),
            Err(err) => {
                warn!(error = %err, "could not rebuild render surface, keeping the old one");
                self.observers.status("Could not change the layout");
                return Err(err);
            }
        };
        adapter.subscribe(self.relocation_listener(generation));
        old_adapter.destroy();

        let swapped = {
            let mut lifecycle = self.lifecycle.lock();
            match &mut *lifecycle {
                Lifecycle::Ready(active) if Arc::ptr_eq(&active.adapter, &old_adapter) => {
                    active.adapter = Arc::clone(&adapter);
                    true
                }
                _ => false,
            }
        };
        if !swapped {
            adapter.destroy();
            return Ok(());
        }

        if let Err(err) = adapter.display(start.as_deref()).await {
            warn!(?err, start = ?start, "captured location unusable, showing the start");
            if let Err(err) = adapter.display(None).await {
                warn!(?err, "rebuilt surface cannot display the book");
                self.close();
                return Err(SessionError::BookLoad(err));
            }
        }
        adapter.prepare_locations().await;
        if !self.is_live(&adapter) {
            return Ok(());
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            if let Lifecycle::Ready(active) = &mut *lifecycle {
                let chapters = location::flatten(&active.book.toc());
                let previous_href = active
                    .current_chapter
                    .and_then(|idx| active.chapters.get(idx))
                    .map(|chapter| chapter.href.clone());
                active.current_chapter = previous_href
                    .and_then(|href| location::index_of_href(&chapters, &href))
                    .or(if chapters.is_empty() { None } else { Some(0) });
                active.chapters = chapters;
            }
        }
        self.process_relocations().await;
        Ok(())
    }

    pub async fn handle_gesture(&self, gesture: Gesture) -> SessionResult<()> {
        match (gesture, self.flow_kind()) {
            (Gesture::TapLeft, FlowKind::Paginated) => self.prev_page().await,
            (Gesture::TapRight, FlowKind::Paginated) => self.next_page().await,
            (Gesture::TapLeft, FlowKind::Continuous) => self.prev_chapter().await,
            (Gesture::TapRight, FlowKind::Continuous) => self.next_chapter().await,
            (Gesture::TapCenter, _) => {
                self.observers.emit(SessionEvent::MenuRequested);
                Ok(())
            }
            (Gesture::DoubleTap, _) => self.toggle_flow().await,
        }
    }
}

impl Drop for ReadingSession {
    fn drop(&mut self) {
        match std::mem::replace(self.lifecycle.get_mut(), Lifecycle::Closed) {
            Lifecycle::Closed => {}
            Lifecycle::Opening { pending, .. } => pending.release(),
            Lifecycle::Ready(active) => {
                active.adapter.destroy();
                active.book.destroy();
            }
        }
    }
}
