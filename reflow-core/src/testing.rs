//! Scripted decoder and surface doubles that record every call in order.
//!
//! Location references produced by the fake surface have the form
//! `<href>@<offset>`; pages are 100 offsets long.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::flow::{RenderConfiguration, ThemeRules, Viewport};
use crate::location::{flatten, strip_fragment, TocEntry};
use crate::surface::{
    BookDecoder, BookMetadata, ContentView, DecodedBook, Relocation, RelocationListener,
    RenderSurface,
};

const PAGE: usize = 100;

#[derive(Clone, Default)]
pub(crate) struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(crate) fn push(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn contains(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub(crate) fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == call)
    }

    pub(crate) fn count_prefix(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

pub(crate) struct FakeDecoder {
    books: Mutex<HashMap<Vec<u8>, Arc<FakeBook>>>,
    recorder: Recorder,
}

impl FakeDecoder {
    pub(crate) fn new(recorder: Recorder) -> Self {
        Self {
            books: Mutex::new(HashMap::new()),
            recorder,
        }
    }

    pub(crate) fn add(&self, book: Arc<FakeBook>) {
        self.books
            .lock()
            .insert(book.name.as_bytes().to_vec(), book);
    }
}

#[async_trait]
impl BookDecoder for FakeDecoder {
    async fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn DecodedBook>> {
        let name = String::from_utf8_lossy(bytes).to_string();
        self.recorder.push(format!("decode:{name}"));
        let book = self
            .books
            .lock()
            .get(bytes)
            .cloned()
            .ok_or_else(|| anyhow!("unreadable container {name:?}"))?;
        Ok(book)
    }
}

pub(crate) struct FakeBook {
    pub(crate) name: String,
    toc: Vec<TocEntry>,
    spine: Vec<String>,
    recorder: Recorder,
    pub(crate) yield_on_display: AtomicBool,
    pub(crate) fail_ready: AtomicBool,
    pub(crate) fail_render: AtomicBool,
    fail_targets: Mutex<HashSet<String>>,
    locations: AtomicBool,
    surfaces: Mutex<Vec<FakeSurface>>,
}

impl FakeBook {
    pub(crate) fn new(name: &str, toc: Vec<TocEntry>, recorder: Recorder) -> Self {
        let mut spine: Vec<String> = Vec::new();
        for chapter in flatten(&toc) {
            let href = strip_fragment(&chapter.href).to_string();
            if !spine.contains(&href) {
                spine.push(href);
            }
        }
        if spine.is_empty() {
            spine.push("content.xhtml".to_string());
        }
        Self {
            name: name.to_string(),
            toc,
            spine,
            recorder,
            yield_on_display: AtomicBool::new(false),
            fail_ready: AtomicBool::new(false),
            fail_render: AtomicBool::new(false),
            fail_targets: Mutex::new(HashSet::new()),
            locations: AtomicBool::new(false),
            surfaces: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_display_of(&self, target: &str) {
        self.fail_targets.lock().insert(target.to_string());
    }

    pub(crate) fn surfaces(&self) -> Vec<FakeSurface> {
        self.surfaces.lock().clone()
    }

    fn spine_index(&self, location: &str) -> Option<usize> {
        let href = location.split('@').next().unwrap_or_default();
        let href = strip_fragment(href);
        self.spine.iter().position(|item| item == href)
    }
}

#[async_trait]
impl DecodedBook for FakeBook {
    async fn opened(&self) -> Result<()> {
        Ok(())
    }

    async fn ready(&self) -> Result<()> {
        if self.fail_ready.load(Ordering::SeqCst) {
            return Err(anyhow!("navigation document missing"));
        }
        Ok(())
    }

    fn metadata(&self) -> BookMetadata {
        BookMetadata {
            title: Some(self.name.clone()),
            author: None,
        }
    }

    fn toc(&self) -> Vec<TocEntry> {
        self.toc.clone()
    }

    fn spine_href(&self, location: &str) -> Option<String> {
        self.spine_index(location).map(|idx| self.spine[idx].clone())
    }

    fn render_to(&self, config: &RenderConfiguration) -> Result<Box<dyn RenderSurface>> {
        self.recorder
            .push(format!("render_to:{}:{:?}", self.name, config.flow));
        if self.fail_render.load(Ordering::SeqCst) {
            return Err(anyhow!("cannot lay out {}", self.name));
        }
        let surface = FakeSurface {
            inner: Arc::new(SurfaceInner {
                name: self.name.clone(),
                spine: self.spine.clone(),
                recorder: self.recorder.clone(),
                yield_on_display: self.yield_on_display.load(Ordering::SeqCst),
                fail_targets: self.fail_targets.lock().clone(),
                listeners: Mutex::new(Vec::new()),
                retained: Mutex::new(Vec::new()),
                position: Mutex::new(None),
                contents: Mutex::new(Vec::new()),
                themes: Mutex::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
            }),
        };
        self.surfaces.lock().push(surface.clone());
        Ok(Box::new(surface))
    }

    async fn generate_locations(&self, _chars_per_location: usize) -> Result<usize> {
        self.recorder.push(format!("generate:{}", self.name));
        self.locations.store(true, Ordering::SeqCst);
        Ok(self.spine.len())
    }

    fn percentage_from_location(&self, location: &str) -> Option<f64> {
        if !self.locations.load(Ordering::SeqCst) {
            return None;
        }
        let idx = self.spine_index(location)?;
        Some(idx as f64 / self.spine.len() as f64)
    }

    fn destroy(&self) {
        self.recorder.push(format!("book_destroy:{}", self.name));
    }
}

#[derive(Clone)]
pub(crate) struct FakeSurface {
    inner: Arc<SurfaceInner>,
}

struct SurfaceInner {
    name: String,
    spine: Vec<String>,
    recorder: Recorder,
    yield_on_display: bool,
    fail_targets: HashSet<String>,
    listeners: Mutex<Vec<RelocationListener>>,
    retained: Mutex<Vec<RelocationListener>>,
    position: Mutex<Option<(String, usize)>>,
    contents: Mutex<Vec<Arc<FakeContent>>>,
    themes: Mutex<HashMap<String, ThemeRules>>,
    destroyed: AtomicBool,
}

impl FakeSurface {
    fn relocation(&self) -> Option<Relocation> {
        let position = self.inner.position.lock().clone()?;
        let (href, offset) = position;
        let idx = self
            .inner
            .spine
            .iter()
            .position(|item| *item == href)
            .unwrap_or(0);
        Some(Relocation {
            cfi: format!("{href}@{offset}"),
            href: Some(href),
            percentage: idx as f64 / self.inner.spine.len() as f64,
        })
    }

    fn fire(&self) {
        let Some(relocation) = self.relocation() else {
            return;
        };
        let listeners = self.inner.listeners.lock().clone();
        for listener in listeners {
            listener(relocation.clone());
        }
    }

    /// Emits a relocation through every listener ever registered, even after
    /// they were cleared, as a torn-down surface with a late callback would.
    pub(crate) fn fire_late(&self, cfi: &str) {
        let href = cfi.split('@').next().unwrap_or_default().to_string();
        let relocation = Relocation {
            cfi: cfi.to_string(),
            href: Some(href),
            percentage: 0.9,
        };
        let listeners = self.inner.retained.lock().clone();
        for listener in listeners {
            listener(relocation.clone());
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn set_position(&self, href: String, offset: usize) {
        let changed_section = self
            .inner
            .position
            .lock()
            .as_ref()
            .map(|(current, _)| *current != href)
            .unwrap_or(true);
        if changed_section {
            *self.inner.contents.lock() = vec![Arc::new(FakeContent {
                surface: self.inner.name.clone(),
                href: href.clone(),
                recorder: self.inner.recorder.clone(),
                appended: Mutex::new(Vec::new()),
            })];
        }
        *self.inner.position.lock() = Some((href, offset));
    }
}

#[async_trait]
impl RenderSurface for FakeSurface {
    async fn display(&self, target: Option<&str>) -> Result<()> {
        let name = &self.inner.name;
        self.inner
            .recorder
            .push(format!("display:{name}:{}", target.unwrap_or("<start>")));
        if self.inner.yield_on_display {
            tokio::task::yield_now().await;
        }
        let (href, offset) = match target {
            None => (self.inner.spine[0].clone(), 0),
            Some(target) if self.inner.fail_targets.contains(target) => {
                return Err(anyhow!("cannot display {target}"));
            }
            Some(target) => {
                let mut parts = target.splitn(2, '@');
                let href = strip_fragment(parts.next().unwrap_or_default()).to_string();
                if !self.inner.spine.contains(&href) {
                    return Err(anyhow!("no section {href}"));
                }
                let offset = parts
                    .next()
                    .and_then(|raw| raw.parse().ok())
                    .unwrap_or(0);
                (href, offset)
            }
        };
        self.set_position(href, offset);
        self.fire();
        Ok(())
    }

    async fn prev(&self) -> Result<()> {
        self.inner.recorder.push(format!("prev:{}", self.inner.name));
        let Some((href, offset)) = self.inner.position.lock().clone() else {
            return Ok(());
        };
        self.set_position(href, offset.saturating_sub(PAGE));
        self.fire();
        Ok(())
    }

    async fn next(&self) -> Result<()> {
        self.inner.recorder.push(format!("next:{}", self.inner.name));
        let Some((href, offset)) = self.inner.position.lock().clone() else {
            return Ok(());
        };
        self.set_position(href, offset + PAGE);
        self.fire();
        Ok(())
    }

    fn on_relocated(&self, listener: RelocationListener) {
        self.inner.retained.lock().push(Arc::clone(&listener));
        self.inner.listeners.lock().push(listener);
    }

    fn clear_listeners(&self) {
        self.inner.listeners.lock().clear();
    }

    fn current_location(&self) -> Option<Relocation> {
        self.relocation()
    }

    fn register_theme(&self, name: &str, rules: &ThemeRules) {
        self.inner
            .themes
            .lock()
            .insert(name.to_string(), rules.clone());
    }

    fn select_theme(&self, name: &str) {
        let font = self
            .inner
            .themes
            .lock()
            .get(name)
            .and_then(|rules| rules.get("body", "font-size").map(str::to_string))
            .unwrap_or_default();
        self.inner
            .recorder
            .push(format!("theme:{}:{name}:{font}", self.inner.name));
    }

    fn resize(&self, viewport: Viewport) {
        self.inner.recorder.push(format!(
            "resize:{}:{}x{}",
            self.inner.name, viewport.width, viewport.height
        ));
    }

    fn scroll_to_top(&self) {
        self.inner
            .recorder
            .push(format!("scroll_top:{}", self.inner.name));
    }

    fn contents(&self) -> Vec<Arc<dyn ContentView>> {
        self.inner
            .contents
            .lock()
            .iter()
            .map(|content| Arc::clone(content) as Arc<dyn ContentView>)
            .collect()
    }

    fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
        self.inner
            .recorder
            .push(format!("destroy:{}", self.inner.name));
    }
}

struct FakeContent {
    surface: String,
    href: String,
    recorder: Recorder,
    appended: Mutex<Vec<String>>,
}

impl ContentView for FakeContent {
    fn href(&self) -> String {
        self.href.clone()
    }

    fn has_element(&self, id: &str) -> bool {
        let needle = format!("id=\"{id}\"");
        self.appended.lock().iter().any(|html| html.contains(&needle))
    }

    fn append_html(&self, html: &str) {
        self.recorder
            .push(format!("append:{}:{}", self.surface, self.href));
        self.appended.lock().push(html.to_string());
    }
}
