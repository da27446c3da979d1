//! Uniform navigation contract over a live render surface, whatever the flow mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::flow::{FlowKind, FlowMode, RenderConfiguration, Typography, Viewport};
use crate::surface::{DecodedBook, Relocation, RelocationListener, RenderSurface};

/// Element id of the injected end-of-chapter navigation block.
pub const CHAPTER_NAV_ID: &str = "reflow-chapter-nav";

/// Granularity of the book-wide location index used for paginated progress.
pub const CHARS_PER_LOCATION: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Moved,
    /// The flow mode has no notion of pages; use chapter navigation instead.
    Unsupported,
}

pub struct RenderSurfaceAdapter {
    mode: FlowMode,
    config: Mutex<RenderConfiguration>,
    book: Arc<dyn DecodedBook>,
    surface: Box<dyn RenderSurface>,
    generation: u64,
    locations_ready: AtomicBool,
    destroyed: AtomicBool,
}

impl RenderSurfaceAdapter {
    /// Binds a new surface to `config` and applies its typography. Nothing is
    /// displayed until [`display`](Self::display) is called.
    pub fn new(
        mode: FlowMode,
        book: Arc<dyn DecodedBook>,
        config: RenderConfiguration,
        generation: u64,
    ) -> SessionResult<Self> {
        let surface = book.render_to(&config).map_err(SessionError::BookLoad)?;
        let adapter = Self {
            mode,
            config: Mutex::new(config),
            book,
            surface,
            generation,
            locations_ready: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        };
        adapter.register_typography(&config.typography);
        debug!(mode = %mode.kind(), generation, spread = ?config.spread, "render surface created");
        Ok(adapter)
    }

    pub fn kind(&self) -> FlowKind {
        self.mode.kind()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn configuration(&self) -> RenderConfiguration {
        *self.config.lock()
    }

    pub fn subscribe(&self, listener: RelocationListener) {
        self.surface.on_relocated(listener);
    }

    pub async fn display(&self, target: Option<&str>) -> Result<()> {
        self.surface.display(target).await
    }

    pub async fn advance(&self, direction: Direction) -> Result<AdvanceOutcome> {
        match self.mode {
            FlowMode::Continuous(_) => Ok(AdvanceOutcome::Unsupported),
            FlowMode::Paginated(_) => {
                match direction {
                    Direction::Forward => self.surface.next().await?,
                    Direction::Backward => self.surface.prev().await?,
                }
                Ok(AdvanceOutcome::Moved)
            }
        }
    }

    /// Paginated progress is read from the book-wide location index, so it is
    /// generated before the first relocation is reported.
    pub async fn prepare_locations(&self) {
        if !matches!(self.mode, FlowMode::Paginated(_)) {
            return;
        }
        match self.book.generate_locations(CHARS_PER_LOCATION).await {
            Ok(total) => {
                debug!(total, "location index generated");
                self.locations_ready.store(true, Ordering::Release);
            }
            Err(err) => {
                warn!(?err, "location index unavailable, using surface-reported progress");
            }
        }
    }

    pub fn compute_progress_percentage(&self, relocation: &Relocation) -> u8 {
        let fraction = match self.mode {
            FlowMode::Paginated(_) if self.locations_ready.load(Ordering::Acquire) => self
                .book
                .percentage_from_location(&relocation.cfi)
                .unwrap_or(relocation.percentage),
            _ => relocation.percentage,
        };
        percent_from_fraction(fraction)
    }

    /// Appends previous/next chapter controls to every rendered section that
    /// does not carry them yet. Returns whether anything was appended.
    pub fn inject_end_of_chapter_controls(&self, has_prev: bool, has_next: bool) -> bool {
        if !has_prev && !has_next {
            return false;
        }
        let html = chapter_nav_html(has_prev, has_next);
        let mut injected = false;
        for content in self.surface.contents() {
            if content.has_element(CHAPTER_NAV_ID) {
                continue;
            }
            content.append_html(&html);
            injected = true;
        }
        injected
    }

    pub fn apply_typography(&self, typography: Typography) {
        self.config.lock().typography = typography;
        self.register_typography(&typography);
    }

    /// New content resets inline styling, so the current ruleset is pushed again.
    pub fn reapply_typography(&self) {
        let typography = self.config.lock().typography;
        self.register_typography(&typography);
    }

    fn register_typography(&self, typography: &Typography) {
        let name = typography.theme_name();
        self.surface.register_theme(&name, &typography.theme_rules());
        self.surface.select_theme(&name);
    }

    pub fn resize(&self, viewport: Viewport) {
        self.config.lock().viewport = viewport;
        self.surface.resize(viewport);
    }

    pub fn scroll_to_top(&self) {
        if matches!(self.mode, FlowMode::Continuous(_)) {
            self.surface.scroll_to_top();
        }
    }

    pub fn current_location(&self) -> Option<String> {
        self.surface.current_location().map(|relocation| relocation.cfi)
    }

    /// Unsubscribes listeners and releases the surface. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.surface.clear_listeners();
        self.surface.destroy();
        debug!(generation = self.generation, "render surface destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Drop for RenderSurfaceAdapter {
    fn drop(&mut self) {
        self.destroy();
    }
}

pub fn percent_from_fraction(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}

fn chapter_nav_html(has_prev: bool, has_next: bool) -> String {
    let mut html = format!("<nav id=\"{CHAPTER_NAV_ID}\" class=\"{CHAPTER_NAV_ID}\">");
    if has_prev {
        html.push_str("<button data-action=\"prev-chapter\">&lsaquo; Previous chapter</button>");
    }
    if has_next {
        html.push_str("<button data-action=\"next-chapter\">Next chapter &rsaquo;</button>");
    }
    html.push_str("</nav>");
    html
}
