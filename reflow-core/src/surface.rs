//! Contracts of the external collaborators: the container decoder and the
//! rendering surface it produces.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::flow::{RenderConfiguration, ThemeRules, Viewport};
use crate::location::TocEntry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Position reported by the surface after a navigation settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relocation {
    /// Layout-independent location reference.
    pub cfi: String,
    /// Document href of the section holding `cfi`, if the surface knows it.
    pub href: Option<String>,
    /// Fraction of the book before this position, in `0.0..=1.0`.
    pub percentage: f64,
}

pub type RelocationListener = Arc<dyn Fn(Relocation) + Send + Sync>;

#[async_trait]
pub trait BookDecoder: Send + Sync {
    async fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn DecodedBook>>;
}

#[async_trait]
pub trait DecodedBook: Send + Sync {
    /// Resolves once structural metadata (package, spine) is available.
    async fn opened(&self) -> Result<()>;
    /// Resolves once navigation data is available; `toc()` is empty before this.
    async fn ready(&self) -> Result<()>;
    fn metadata(&self) -> BookMetadata;
    fn toc(&self) -> Vec<TocEntry>;
    /// Href of the spine item a location reference points into.
    fn spine_href(&self, location: &str) -> Option<String>;
    fn render_to(&self, config: &RenderConfiguration) -> Result<Box<dyn RenderSurface>>;
    /// Builds the book-wide location index, one entry per `chars_per_location`.
    async fn generate_locations(&self, chars_per_location: usize) -> Result<usize>;
    /// Fraction through the location index, `None` until it has been generated.
    fn percentage_from_location(&self, location: &str) -> Option<f64>;
    fn destroy(&self);
}

/// A rendered section as exposed to content hooks.
pub trait ContentView: Send + Sync {
    fn href(&self) -> String;
    fn has_element(&self, id: &str) -> bool;
    fn append_html(&self, html: &str);
}

#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Displays a location reference or href; `None` shows the natural start.
    async fn display(&self, target: Option<&str>) -> Result<()>;
    async fn prev(&self) -> Result<()>;
    async fn next(&self) -> Result<()>;
    fn on_relocated(&self, listener: RelocationListener);
    fn clear_listeners(&self);
    fn current_location(&self) -> Option<Relocation>;
    fn register_theme(&self, name: &str, rules: &ThemeRules);
    fn select_theme(&self, name: &str);
    fn resize(&self, viewport: Viewport);
    fn scroll_to_top(&self);
    fn contents(&self) -> Vec<Arc<dyn ContentView>>;
    fn destroy(&self);
}
