//! Mapping between a book's table of contents and the flat chapter list the
//! session navigates by.

use serde::{Deserialize, Serialize};

/// Labels that mark a table-of-contents entry as real reading content rather
/// than front matter. Matched case-insensitively as substrings.
const CHAPTER_MARKERS: &[&str] = &["chapter", "chapitre", "capítulo", "capitulo", "kapitel"];

/// A node of the hierarchical table of contents as reported by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub label: String,
    pub href: String,
    #[serde(default)]
    pub subitems: Vec<TocEntry>,
}

impl TocEntry {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            href: href.into(),
            subitems: Vec::new(),
        }
    }

    pub fn with_subitems(mut self, subitems: Vec<TocEntry>) -> Self {
        self.subitems = subitems;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub label: String,
    pub href: String,
    pub level: usize,
}

fn is_chapter_label(label: &str) -> bool {
    let lowered = label.to_lowercase();
    CHAPTER_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Depth-first search for the first entry whose label looks like a chapter.
/// Sub-items are searched before the next sibling.
pub fn find_first_real_chapter(toc: &[TocEntry]) -> Option<&str> {
    for entry in toc {
        if is_chapter_label(&entry.label) {
            return Some(entry.href.as_str());
        }
        if let Some(found) = find_first_real_chapter(&entry.subitems) {
            return Some(found);
        }
    }
    None
}

/// Where to start a book with no usable saved position: the first real
/// chapter, else the first table-of-contents entry, else the natural start.
pub fn default_start(toc: &[TocEntry]) -> Option<&str> {
    find_first_real_chapter(toc).or_else(|| toc.first().map(|entry| entry.href.as_str()))
}

/// Depth-first flattening in document order; top-level entries have level 0.
pub fn flatten(toc: &[TocEntry]) -> Vec<Chapter> {
    let mut out = Vec::new();
    collect_chapters(toc, 0, &mut out);
    out
}

fn collect_chapters(entries: &[TocEntry], level: usize, out: &mut Vec<Chapter>) {
    for entry in entries {
        out.push(Chapter {
            label: entry.label.trim().to_string(),
            href: entry.href.clone(),
            level,
        });
        collect_chapters(&entry.subitems, level + 1, out);
    }
}

pub fn index_of_href(chapters: &[Chapter], href: &str) -> Option<usize> {
    chapters.iter().position(|chapter| chapter.href == href)
}

/// Finds the chapter containing a document href. A TOC entry may address a
/// whole document while the location points into a fragment of it (or the
/// other way round), so both sides are compared without their fragment and
/// containment is accepted in either direction. First match in document order
/// wins.
pub fn match_chapter_by_location<'a>(
    chapters: &'a [Chapter],
    current_href: &str,
) -> Option<(usize, &'a Chapter)> {
    let current = strip_fragment(current_href);
    if current.is_empty() {
        return None;
    }
    chapters.iter().enumerate().find(|(_, chapter)| {
        let candidate = strip_fragment(&chapter.href);
        !candidate.is_empty() && (candidate.contains(current) || current.contains(candidate))
    })
}

pub fn strip_fragment(href: &str) -> &str {
    match href.find('#') {
        Some(idx) => &href[..idx],
        None => href,
    }
}
