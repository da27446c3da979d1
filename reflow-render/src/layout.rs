//! Text layout for the headless surface: word wrapping and page geometry.

use reflow_core::{FlowDirection, RenderConfiguration, Spread, Typography, Viewport};

/// Nominal size of one character cell, in viewport units.
pub const CELL_WIDTH: u32 = 8;
pub const CELL_HEIGHT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Character offset of the first character of the line within its section.
    pub start: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub flow: FlowDirection,
    pub chars_per_line: usize,
    pub lines_per_page: usize,
    pub columns: usize,
}

impl Layout {
    pub fn new(
        flow: FlowDirection,
        spread: Spread,
        viewport: Viewport,
        typography: &Typography,
    ) -> Self {
        let columns = match (flow, spread) {
            (FlowDirection::Paginated, Spread::Auto) => 2,
            _ => 1,
        };
        let padding = typography.padding;
        let font = u32::from(typography.font_size.max(1));

        let content_width = viewport
            .width
            .saturating_sub(padding.left + padding.right)
            / columns as u32;
        let content_height = viewport
            .height
            .saturating_sub(padding.top + padding.bottom);

        let chars_per_line = (content_width / CELL_WIDTH) * 100 / font;
        let lines_per_page = (content_height / CELL_HEIGHT) * 100 / font;

        Self {
            flow,
            chars_per_line: (chars_per_line as usize).max(1),
            lines_per_page: (lines_per_page as usize).max(1),
            columns,
        }
    }

    pub fn from_config(config: &RenderConfiguration) -> Self {
        Self::new(config.flow, config.spread, config.viewport, &config.typography)
    }

    /// Lines covered by one page turn.
    pub fn step(&self) -> usize {
        self.lines_per_page * self.columns
    }

    /// First line of the page showing `line`. Continuous flow has no page
    /// boundaries, so the viewport starts at the line itself.
    pub fn page_start(&self, line: usize) -> usize {
        match self.flow {
            FlowDirection::Paginated => line / self.step() * self.step(),
            FlowDirection::ScrolledDoc => line,
        }
    }

    pub fn last_page_start(&self, line_count: usize) -> usize {
        match self.flow {
            FlowDirection::Paginated => self.page_start(line_count.saturating_sub(1)),
            FlowDirection::ScrolledDoc => line_count.saturating_sub(self.lines_per_page),
        }
    }

    /// Splits visible lines into columns of `lines_per_page` each.
    pub fn columns_of<'a>(&self, lines: &'a [Line], page_start: usize) -> Vec<&'a [Line]> {
        let start = page_start.min(lines.len());
        let end = (start + self.step()).min(lines.len());
        lines[start..end]
            .chunks(self.lines_per_page)
            .take(self.columns)
            .collect()
    }
}

/// Word-wraps a section into lines of at most `width` characters. Newlines
/// end paragraphs; an overlong word is broken at the width.
pub fn wrap(chars: &[char], width: usize) -> Vec<Line> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let paragraph_end = chars[start..]
            .iter()
            .position(|c| *c == '\n')
            .map(|idx| start + idx)
            .unwrap_or(chars.len());

        if paragraph_end == start {
            lines.push(Line {
                start,
                text: String::new(),
            });
        }

        let mut line_start = start;
        while line_start < paragraph_end {
            let mut end = (line_start + width).min(paragraph_end);
            if end < paragraph_end {
                if let Some(space) = chars[line_start..=end]
                    .iter()
                    .rposition(|c| c.is_whitespace())
                {
                    if space > 0 {
                        end = line_start + space;
                    }
                }
            }
            let text: String = chars[line_start..end].iter().collect();
            lines.push(Line {
                start: line_start,
                text: text.trim_end().to_string(),
            });
            line_start = end;
            while line_start < paragraph_end && chars[line_start].is_whitespace() {
                line_start += 1;
            }
        }
        start = paragraph_end + 1;
    }

    if lines.is_empty() {
        lines.push(Line {
            start: 0,
            text: String::new(),
        });
    }
    lines
}

/// Index of the line containing character `offset`.
pub fn line_of(lines: &[Line], offset: usize) -> usize {
    lines
        .partition_point(|line| line.start <= offset)
        .saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflow_core::{FlowKind, FlowMode, Theme};

    fn chars(text: &str) -> Vec<char> {
        text.chars().collect()
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap(&chars("the quick brown fox jumps"), 10);
        let texts: Vec<_> = lines.iter().map(|line| line.text.as_str()).collect();
        assert_eq!(texts, ["the quick", "brown fox", "jumps"]);
        assert_eq!(lines[1].start, 10);
        assert_eq!(lines[2].start, 20);
    }

    #[test]
    fn breaks_overlong_words_and_keeps_blank_paragraphs() {
        let lines = wrap(&chars("abcdefghij\n\nxy"), 4);
        let texts: Vec<_> = lines.iter().map(|line| line.text.as_str()).collect();
        assert_eq!(texts, ["abcd", "efgh", "ij", "", "xy"]);
        assert_eq!(line_of(&lines, 13), 4);
        assert_eq!(line_of(&lines, 5), 1);
    }

    #[test]
    fn empty_section_has_one_blank_line() {
        assert_eq!(wrap(&[], 20).len(), 1);
    }

    #[test]
    fn font_size_scales_geometry() {
        let mode = FlowMode::for_kind(FlowKind::Paginated);
        let viewport = Viewport::new(840, 680);
        let normal = Layout::from_config(&mode.configure(viewport, 100, Theme::Light));
        let large = Layout::from_config(&mode.configure(viewport, 200, Theme::Light));
        // 840 - 2*20 = 800 wide, 680 - 2*20 = 640 high.
        assert_eq!(normal.chars_per_line, 100);
        assert_eq!(normal.lines_per_page, 40);
        assert_eq!(large.chars_per_line, 50);
        assert_eq!(large.lines_per_page, 20);
        assert_eq!(normal.columns, 1);
    }

    #[test]
    fn spread_uses_two_columns() {
        let mode = FlowMode::for_kind(FlowKind::Paginated);
        let layout = Layout::from_config(&mode.configure(Viewport::new(1640, 680), 100, Theme::Light));
        assert_eq!(layout.columns, 2);
        assert_eq!(layout.chars_per_line, 100);
        assert_eq!(layout.step(), 80);
        assert_eq!(layout.page_start(85), 80);
    }
}
