//! The chapter picker: a framed box over the page listing the book's contents.

use std::io::Write;

use anyhow::Result;
use crossterm::cursor;
use crossterm::style::{Attribute, Print, SetAttribute};
use reflow_core::{Chapter, ReadingSession};

const MIN_INNER_WIDTH: usize = 24;
const NESTING_CAP: usize = 6;
const EMPTY_MESSAGE: &str = " No chapters in this book";

pub struct ChapterPicker {
    chapters: Vec<Chapter>,
    cursor: usize,
    reading: Option<usize>,
    progress: Option<u8>,
}

/// Rows of equal width, top border first, and the row holding the cursor.
#[derive(Debug)]
struct PickerLayout {
    rows: Vec<String>,
    highlight: Option<usize>,
}

impl ChapterPicker {
    pub fn for_session(session: &ReadingSession) -> Self {
        let reading = session.current_chapter();
        Self {
            chapters: session.chapters(),
            cursor: reading.unwrap_or(0),
            reading,
            progress: session.progress(),
        }
    }

    /// Moves the cursor, stopping at either end. Returns whether it moved.
    pub fn step(&mut self, delta: isize) -> bool {
        let Some(last) = self.chapters.len().checked_sub(1) else {
            return false;
        };
        let target = self.cursor.saturating_add_signed(delta).min(last);
        let moved = target != self.cursor;
        self.cursor = target;
        moved
    }

    pub fn highlighted(&self) -> Option<&Chapter> {
        self.chapters.get(self.cursor)
    }

    pub fn draw(&self, out: &mut impl Write, columns: u16, text_rows: u16) -> Result<()> {
        let columns = usize::from(columns);
        let text_rows = usize::from(text_rows);
        if columns < MIN_INNER_WIDTH + 4 || text_rows < 5 {
            return Ok(());
        }
        let inner = self.preferred_width().min(columns - 4);
        let list_height = self.chapters.len().clamp(1, text_rows - 4);
        let layout = self.layout(inner, list_height);

        let left = ((columns - inner - 2) / 2) as u16;
        let top = (text_rows - layout.rows.len()) / 2;
        for (offset, row) in layout.rows.iter().enumerate() {
            let line = (top + offset) as u16;
            if Some(offset) == layout.highlight {
                crossterm::queue!(
                    out,
                    cursor::MoveTo(left, line),
                    SetAttribute(Attribute::Reverse),
                    Print(row),
                    SetAttribute(Attribute::Reset)
                )?;
            } else {
                crossterm::queue!(out, cursor::MoveTo(left, line), Print(row))?;
            }
        }
        out.flush()?;
        Ok(())
    }

    fn title(&self) -> String {
        match self.progress {
            Some(percent) => format!(" Contents · {percent}% read "),
            None => " Contents ".to_string(),
        }
    }

    fn preferred_width(&self) -> usize {
        (0..self.chapters.len())
            .map(|index| self.entry_text(index).chars().count())
            .chain([self.title().chars().count() + 1, MIN_INNER_WIDTH])
            .max()
            .unwrap_or(MIN_INNER_WIDTH)
    }

    /// Keeps the cursor near the middle of the window unless the list ends first.
    fn first_visible(&self, height: usize) -> usize {
        let overflow = self.chapters.len().saturating_sub(height);
        self.cursor.saturating_sub(height / 2).min(overflow)
    }

    fn entry_text(&self, index: usize) -> String {
        let chapter = &self.chapters[index];
        let mark = if Some(index) == self.reading { '•' } else { ' ' };
        let depth = chapter.level.min(NESTING_CAP);
        let branch = match depth {
            0 => String::new(),
            depth => format!("{}└ ", "  ".repeat(depth - 1)),
        };
        format!("{mark} {branch}{}", chapter.label)
    }

    fn layout(&self, inner: usize, list_height: usize) -> PickerLayout {
        let mut rows = Vec::with_capacity(list_height + 2);
        let mut highlight = None;
        rows.push(rule('┌', &self.title(), '┐', inner));

        if self.chapters.is_empty() {
            rows.push(boxed(EMPTY_MESSAGE, inner));
        } else {
            let first = self.first_visible(list_height);
            let last = (first + list_height).min(self.chapters.len());
            for index in first..last {
                if index == self.cursor {
                    highlight = Some(rows.len());
                }
                rows.push(boxed(&self.entry_text(index), inner));
            }
        }
        while rows.len() < list_height + 1 {
            rows.push(boxed("", inner));
        }

        let position = if self.chapters.is_empty() {
            String::new()
        } else {
            format!(" {}/{} ", self.cursor + 1, self.chapters.len())
        };
        rows.push(rule('└', &position, '┘', inner));
        PickerLayout { rows, highlight }
    }
}

/// A horizontal border carrying `label` after one leading stroke.
fn rule(left: char, label: &str, right: char, inner: usize) -> String {
    let label = clip(label, inner.saturating_sub(1));
    let fill = inner.saturating_sub(1 + label.chars().count());
    format!("{left}─{label}{}{right}", "─".repeat(fill))
}

fn boxed(text: &str, inner: usize) -> String {
    format!("│{:<inner$}│", clip(text, inner))
}

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(1)).collect();
    if width > 0 {
        clipped.push('…');
    }
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(label: &str, level: usize) -> Chapter {
        Chapter {
            label: label.to_string(),
            href: format!("{}.xhtml", label.to_lowercase().replace(' ', "-")),
            level,
        }
    }

    fn listing(chapters: Vec<Chapter>, reading: Option<usize>) -> ChapterPicker {
        ChapterPicker {
            chapters,
            cursor: reading.unwrap_or(0),
            reading,
            progress: None,
        }
    }

    fn numbered(count: usize) -> Vec<Chapter> {
        (1..=count)
            .map(|n| chapter(&format!("Chapter {n}"), 0))
            .collect()
    }

    #[test]
    fn reading_mark_stays_while_the_cursor_moves() {
        let mut picker = listing(
            vec![
                chapter("Part One", 0),
                chapter("Arrival", 1),
                chapter("Departure", 1),
            ],
            Some(1),
        );
        assert!(picker.step(1));

        let layout = picker.layout(24, 3);
        assert!(layout.rows[2].starts_with("│• └ Arrival"));
        assert!(layout.rows[3].starts_with("│  └ Departure"));
        assert_eq!(layout.highlight, Some(3));
        assert_eq!(picker.highlighted().map(|c| c.label.as_str()), Some("Departure"));
    }

    #[test]
    fn window_follows_the_cursor_and_stops_at_the_end() {
        let mut picker = listing(numbered(10), None);
        for _ in 0..5 {
            picker.step(1);
        }
        let layout = picker.layout(24, 4);
        assert!(layout.rows[1].contains("Chapter 4"));
        assert_eq!(layout.highlight, Some(3));

        picker.step(100);
        let layout = picker.layout(24, 4);
        assert!(layout.rows[1].contains("Chapter 7"));
        assert!(layout.rows[4].contains("Chapter 10"));
        assert!(layout.rows[5].contains(" 10/10 "));
    }

    #[test]
    fn every_row_has_the_frame_width() {
        let mut chapters = numbered(2);
        chapters.push(chapter(
            "An exceedingly long chapter title that cannot fit inside the box",
            2,
        ));
        let mut picker = listing(chapters, Some(0));
        picker.progress = Some(42);

        let layout = picker.layout(30, 5);
        assert!(layout.rows[0].contains("Contents · 42% read"));
        assert!(layout.rows[3].ends_with("…│"));
        for row in &layout.rows {
            assert_eq!(row.chars().count(), 32, "{row:?}");
        }
    }

    #[test]
    fn cursor_is_clamped_and_empty_books_show_a_notice() {
        let mut picker = listing(numbered(2), Some(0));
        assert!(!picker.step(-1));
        assert!(picker.step(5));
        assert!(!picker.step(1));

        let mut empty = listing(Vec::new(), None);
        assert!(!empty.step(1));
        assert!(empty.highlighted().is_none());
        let layout = empty.layout(24, 1);
        assert_eq!(layout.rows.len(), 3);
        assert!(layout.rows[1].contains("No chapters"));
        assert_eq!(layout.highlight, None);
    }

    #[test]
    fn tiny_terminals_draw_nothing() {
        let picker = listing(numbered(3), Some(0));
        let mut out = Vec::new();
        picker.draw(&mut out, 20, 30).unwrap();
        assert!(out.is_empty());
        picker.draw(&mut out, 80, 24).unwrap();
        assert!(!out.is_empty());
    }
}
