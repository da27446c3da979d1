//! Headless rendering backend: decodes a JSON book manifest and lays its
//! sections out as plain-text pages for a character-cell viewport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use reflow_core::location::strip_fragment;
use reflow_core::{
    BookDecoder, BookMetadata, ContentView, DecodedBook, FlowDirection, Relocation,
    RelocationListener, RenderConfiguration, RenderSurface, ThemeRules, TocEntry, Viewport,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub mod cfi;
pub mod layout;

pub use cfi::Cfi;
pub use layout::{Layout, Line, CELL_HEIGHT, CELL_WIDTH};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid book manifest: {0}")]
    InvalidManifest(#[from] serde_json::Error),
    #[error("book has no readable sections")]
    EmptySpine,
    #[error("spine lists {0:?} more than once")]
    DuplicateSection(String),
    #[error("malformed location {0:?}")]
    MalformedLocation(String),
    #[error("no section matches {0:?}")]
    UnknownTarget(String),
    #[error("render surface has been destroyed")]
    Destroyed,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    title: Option<String>,
    author: Option<String>,
    #[serde(default)]
    toc: Vec<TocEntry>,
    spine: Vec<SpineItem>,
}

#[derive(Debug, Deserialize)]
struct SpineItem {
    href: String,
    #[serde(default)]
    text: String,
}

/// What the terminal paints: the visible page of the live surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub title: String,
    pub href: String,
    pub location: String,
    pub percentage: f64,
    /// One entry per column; two when a spread is shown.
    pub columns: Vec<Vec<String>>,
    pub footer: Option<String>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

pub type FrameSink = Arc<Mutex<Frame>>;

struct Section {
    href: String,
    chars: Vec<char>,
}

struct BookContent {
    metadata: BookMetadata,
    toc: Vec<TocEntry>,
    sections: Vec<Section>,
    /// Book-wide character offset of each section's first character.
    starts: Vec<usize>,
    total_chars: usize,
}

impl BookContent {
    fn from_manifest(manifest: Manifest) -> Result<Self, ManifestError> {
        if manifest.spine.is_empty() {
            return Err(ManifestError::EmptySpine);
        }
        let mut sections: Vec<Section> = Vec::with_capacity(manifest.spine.len());
        let mut starts = Vec::with_capacity(manifest.spine.len());
        let mut total_chars = 0;
        for item in manifest.spine {
            if sections.iter().any(|section| section.href == item.href) {
                return Err(ManifestError::DuplicateSection(item.href));
            }
            let chars: Vec<char> = item.text.chars().collect();
            starts.push(total_chars);
            total_chars += chars.len();
            sections.push(Section {
                href: item.href,
                chars,
            });
        }
        Ok(Self {
            metadata: BookMetadata {
                title: manifest.title,
                author: manifest.author,
            },
            toc: manifest.toc,
            sections,
            starts,
            total_chars,
        })
    }

    fn section_by_href(&self, href: &str) -> Option<usize> {
        let href = strip_fragment(href);
        self.sections.iter().position(|section| section.href == href)
    }

    /// Resolves a location reference or href to `(section, offset)`.
    fn resolve(&self, target: &str) -> Result<(usize, usize), ManifestError> {
        if Cfi::is_cfi(target) {
            let cfi = Cfi::parse(target)?;
            let section = self
                .section_by_href(&cfi.href)
                .ok_or_else(|| ManifestError::UnknownTarget(target.to_string()))?;
            let offset = cfi.offset.min(self.sections[section].chars.len());
            return Ok((section, offset));
        }
        self.section_by_href(target)
            .map(|section| (section, 0))
            .ok_or_else(|| ManifestError::UnknownTarget(target.to_string()))
    }

    fn cfi(&self, section: usize, offset: usize) -> Cfi {
        Cfi::new(section, self.sections[section].href.clone(), offset)
    }

    fn fraction(&self, section: usize, offset: usize) -> f64 {
        if self.total_chars == 0 {
            return 0.0;
        }
        (self.starts[section] + offset) as f64 / self.total_chars as f64
    }
}

#[derive(Clone, Default)]
pub struct ManifestDecoder {
    sink: Option<FrameSink>,
}

impl ManifestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surfaces created from decoded books paint their visible page here.
    pub fn with_frame_sink(sink: FrameSink) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<HeadlessBook, ManifestError> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        let content = BookContent::from_manifest(manifest)?;
        Ok(HeadlessBook {
            content: Arc::new(content),
            sink: self.sink.clone(),
            locations: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BookDecoder for ManifestDecoder {
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    async fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn DecodedBook>> {
        let book = self.parse(bytes)?;
        debug!(
            sections = book.content.sections.len(),
            chars = book.content.total_chars,
            "decoded book manifest"
        );
        Ok(Arc::new(book))
    }
}

pub struct HeadlessBook {
    content: Arc<BookContent>,
    sink: Option<FrameSink>,
    /// `(section, offset)` of every location entry, in book order.
    locations: Mutex<Option<Vec<(usize, usize)>>>,
    destroyed: AtomicBool,
}

impl HeadlessBook {
    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ManifestError::Destroyed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl DecodedBook for HeadlessBook {
    async fn opened(&self) -> Result<()> {
        self.ensure_live()
    }

    async fn ready(&self) -> Result<()> {
        self.ensure_live()
    }

    fn metadata(&self) -> BookMetadata {
        self.content.metadata.clone()
    }

    fn toc(&self) -> Vec<TocEntry> {
        self.content.toc.clone()
    }

    fn spine_href(&self, location: &str) -> Option<String> {
        let (section, _) = self.content.resolve(location).ok()?;
        Some(self.content.sections[section].href.clone())
    }

    fn render_to(&self, config: &RenderConfiguration) -> Result<Box<dyn RenderSurface>> {
        self.ensure_live()?;
        Ok(Box::new(HeadlessSurface::new(
            Arc::clone(&self.content),
            *config,
            self.sink.clone(),
        )))
    }

    async fn generate_locations(&self, chars_per_location: usize) -> Result<usize> {
        self.ensure_live()?;
        let chunk = chars_per_location.max(1);
        let mut index = Vec::new();
        for (section, content) in self.content.sections.iter().enumerate() {
            let len = content.chars.len().max(1);
            index.extend((0..len).step_by(chunk).map(|offset| (section, offset)));
        }
        let total = index.len();
        *self.locations.lock() = Some(index);
        Ok(total)
    }

    fn percentage_from_location(&self, location: &str) -> Option<f64> {
        let locations = self.locations.lock();
        let index = locations.as_ref()?;
        if index.is_empty() {
            return None;
        }
        let position = self.content.resolve(location).ok()?;
        let entry = index
            .partition_point(|entry| *entry <= position)
            .saturating_sub(1);
        Some(entry as f64 / index.len() as f64)
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            *self.locations.lock() = None;
            debug!("book released");
        }
    }
}

/// Fragments appended to one section, kept for the surface's lifetime.
struct SectionContent {
    href: String,
    fragments: Mutex<Vec<String>>,
}

impl ContentView for SectionContent {
    fn href(&self) -> String {
        self.href.clone()
    }

    fn has_element(&self, id: &str) -> bool {
        let needle = format!("id=\"{id}\"");
        self.fragments
            .lock()
            .iter()
            .any(|html| html.contains(&needle))
    }

    fn append_html(&self, html: &str) {
        self.fragments.lock().push(html.to_string());
    }
}

struct SurfaceState {
    config: RenderConfiguration,
    foreground: Option<String>,
    background: Option<String>,
    /// Anchor as `(section, offset)`; `None` until something is displayed.
    position: Option<(usize, usize)>,
}

pub struct HeadlessSurface {
    content: Arc<BookContent>,
    sink: Option<FrameSink>,
    state: Mutex<SurfaceState>,
    listeners: Mutex<Vec<RelocationListener>>,
    themes: Mutex<HashMap<String, ThemeRules>>,
    attachments: Mutex<HashMap<usize, Arc<SectionContent>>>,
    destroyed: AtomicBool,
}

impl HeadlessSurface {
    fn new(content: Arc<BookContent>, config: RenderConfiguration, sink: Option<FrameSink>) -> Self {
        Self {
            content,
            sink,
            state: Mutex::new(SurfaceState {
                config,
                foreground: None,
                background: None,
                position: None,
            }),
            listeners: Mutex::new(Vec::new()),
            themes: Mutex::new(HashMap::new()),
            attachments: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ManifestError::Destroyed.into());
        }
        Ok(())
    }

    fn layout(&self) -> Layout {
        Layout::from_config(&self.state.lock().config)
    }

    fn lines(&self, section: usize, layout: &Layout) -> Vec<Line> {
        layout::wrap(&self.content.sections[section].chars, layout.chars_per_line)
    }

    fn position(&self) -> Option<(usize, usize)> {
        self.state.lock().position
    }

    fn move_to(&self, section: usize, offset: usize) {
        self.state.lock().position = Some((section, offset));
        self.paint();
        self.fire();
    }

    fn relocation(&self) -> Option<Relocation> {
        let (section, offset) = self.position()?;
        Some(Relocation {
            cfi: self.content.cfi(section, offset).to_string(),
            href: Some(self.content.sections[section].href.clone()),
            percentage: self.content.fraction(section, offset),
        })
    }

    fn fire(&self) {
        let Some(relocation) = self.relocation() else {
            return;
        };
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(relocation.clone());
        }
    }

    fn attachment(&self, section: usize) -> Arc<SectionContent> {
        let mut attachments = self.attachments.lock();
        let entry = attachments.entry(section).or_insert_with(|| {
            Arc::new(SectionContent {
                href: self.content.sections[section].href.clone(),
                fragments: Mutex::new(Vec::new()),
            })
        });
        Arc::clone(entry)
    }

    fn paint(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let Some((section, offset)) = self.position() else {
            return;
        };
        let layout = self.layout();
        let lines = self.lines(section, &layout);
        let page_start = layout.page_start(layout::line_of(&lines, offset));
        let columns: Vec<Vec<String>> = layout
            .columns_of(&lines, page_start)
            .into_iter()
            .map(|column| column.iter().map(|line| line.text.clone()).collect())
            .collect();
        let shows_end = page_start + layout.step() >= lines.len();
        let footer = if shows_end {
            self.attachments
                .lock()
                .get(&section)
                .map(|content| content.fragments.lock().join(" "))
                .filter(|html| !html.is_empty())
                .map(|html| strip_tags(&html))
        } else {
            None
        };
        let (foreground, background) = {
            let state = self.state.lock();
            (state.foreground.clone(), state.background.clone())
        };

        *sink.lock() = Frame {
            title: self
                .content
                .metadata
                .title
                .clone()
                .unwrap_or_default(),
            href: self.content.sections[section].href.clone(),
            location: self.content.cfi(section, offset).to_string(),
            percentage: self.content.fraction(section, offset),
            columns,
            footer,
            foreground,
            background,
        };
    }
}

#[async_trait]
impl RenderSurface for HeadlessSurface {
    async fn display(&self, target: Option<&str>) -> Result<()> {
        self.ensure_live()?;
        let (section, offset) = match target {
            None => (0, 0),
            Some(target) => self.content.resolve(target)?,
        };
        self.move_to(section, offset);
        Ok(())
    }

    async fn prev(&self) -> Result<()> {
        self.ensure_live()?;
        let Some((section, offset)) = self.position() else {
            return Ok(());
        };
        let layout = self.layout();
        let lines = self.lines(section, &layout);
        let page_start = layout.page_start(layout::line_of(&lines, offset));
        if page_start > 0 {
            let target = page_start.saturating_sub(layout.step());
            self.move_to(section, lines[target].start);
        } else if section > 0 {
            let previous = self.lines(section - 1, &layout);
            let target = layout.last_page_start(previous.len());
            self.move_to(section - 1, previous[target].start);
        } else {
            debug!("already at the start of the book");
        }
        Ok(())
    }

    async fn next(&self) -> Result<()> {
        self.ensure_live()?;
        let Some((section, offset)) = self.position() else {
            return Ok(());
        };
        let layout = self.layout();
        let lines = self.lines(section, &layout);
        let next_start = layout.page_start(layout::line_of(&lines, offset)) + layout.step();
        if next_start < lines.len() {
            self.move_to(section, lines[next_start].start);
        } else if section + 1 < self.content.sections.len() {
            self.move_to(section + 1, 0);
        } else {
            debug!("already at the end of the book");
        }
        Ok(())
    }

    fn on_relocated(&self, listener: RelocationListener) {
        self.listeners.lock().push(listener);
    }

    fn clear_listeners(&self) {
        self.listeners.lock().clear();
    }

    fn current_location(&self) -> Option<Relocation> {
        self.relocation()
    }

    fn register_theme(&self, name: &str, rules: &ThemeRules) {
        self.themes.lock().insert(name.to_string(), rules.clone());
    }

    fn select_theme(&self, name: &str) {
        let Some(rules) = self.themes.lock().get(name).cloned() else {
            warn!(theme = name, "selected theme was never registered");
            return;
        };
        {
            let mut state = self.state.lock();
            let typography = &mut state.config.typography;
            if let Some(size) = rules.numeric("body", "font-size") {
                typography.font_size = u16::try_from(size).unwrap_or(typography.font_size);
            }
            let padding = &mut typography.padding;
            padding.top = rules.numeric("body", "padding-top").unwrap_or(padding.top);
            padding.right = rules
                .numeric("body", "padding-right")
                .unwrap_or(padding.right);
            padding.bottom = rules
                .numeric("body", "padding-bottom")
                .unwrap_or(padding.bottom);
            padding.left = rules.numeric("body", "padding-left").unwrap_or(padding.left);
            state.foreground = rules.get("body", "color").map(str::to_string);
            state.background = rules.get("body", "background").map(str::to_string);
        }
        self.paint();
    }

    fn resize(&self, viewport: Viewport) {
        self.state.lock().config.viewport = viewport;
        self.paint();
        self.fire();
    }

    fn scroll_to_top(&self) {
        let (flow, position) = {
            let state = self.state.lock();
            (state.config.flow, state.position)
        };
        if let (FlowDirection::ScrolledDoc, Some((section, offset))) = (flow, position) {
            if offset != 0 {
                self.move_to(section, 0);
            }
        }
    }

    fn contents(&self) -> Vec<Arc<dyn ContentView>> {
        match self.position() {
            Some((section, _)) if !self.destroyed.load(Ordering::Acquire) => {
                vec![self.attachment(section) as Arc<dyn ContentView>]
            }
            _ => Vec::new(),
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.listeners.lock().clear();
        self.attachments.lock().clear();
        debug!("headless surface destroyed");
    }
}

/// Plain-text rendering of an HTML fragment: tags become spaces, runs of
/// whitespace collapse, and the few entities the reader emits are decoded.
pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    let decoded = text
        .replace("&lsaquo;", "‹")
        .replace("&rsaquo;", "›")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
