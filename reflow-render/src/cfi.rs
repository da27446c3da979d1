//! Canonical-fragment-shaped location references.
//!
//! A reference names a spine item and a character offset inside it, so it
//! survives any relayout: `epubcfi(/6/<2*(n+1)>[<href>]!/4/1:<offset>)`.

use crate::ManifestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cfi {
    pub spine_index: usize,
    pub href: String,
    pub offset: usize,
}

impl Cfi {
    pub fn new(spine_index: usize, href: impl Into<String>, offset: usize) -> Self {
        Self {
            spine_index,
            href: href.into(),
            offset,
        }
    }

    pub fn is_cfi(raw: &str) -> bool {
        raw.trim_start().starts_with("epubcfi(")
    }

    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let malformed = || ManifestError::MalformedLocation(raw.to_string());
        let body = raw
            .trim()
            .strip_prefix("epubcfi(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(malformed)?;
        let (package, content) = body.split_once('!').ok_or_else(malformed)?;

        let step = package.strip_prefix("/6/").ok_or_else(malformed)?;
        let (step, href) = step.split_once('[').ok_or_else(malformed)?;
        let href = href.strip_suffix(']').ok_or_else(malformed)?;
        let step: usize = step.parse().map_err(|_| malformed())?;
        if step < 2 || step % 2 != 0 {
            return Err(malformed());
        }

        let (_, offset) = content.rsplit_once(':').ok_or_else(malformed)?;
        let offset = offset.parse().map_err(|_| malformed())?;

        Ok(Self {
            spine_index: step / 2 - 1,
            href: href.to_string(),
            offset,
        })
    }
}

impl std::fmt::Display for Cfi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "epubcfi(/6/{}[{}]!/4/1:{})",
            2 * (self.spine_index + 1),
            self.href,
            self.offset
        )
    }
}
