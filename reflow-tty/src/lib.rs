use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind},
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use reflow_core::{Gesture, Viewport};
use reflow_render::{Frame, CELL_HEIGHT, CELL_WIDTH};
use tracing::debug;

/// Step applied to the font size by `+` and `-`, in percentage points.
pub const FONT_STEP: i32 = 10;

pub struct TextRenderer<W: Write> {
    writer: W,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub columns: u16,
    pub rows: u16,
}

impl DrawParams {
    pub fn clamped(columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }

    /// Rows available for page text; the last row holds the status line.
    pub fn text_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }
}

/// Viewport handed to the session for a terminal of `columns` × `rows` cells,
/// leaving the bottom row for the status line.
pub fn viewport_for(columns: u16, rows: u16) -> Viewport {
    Viewport::new(
        u32::from(columns.max(1)) * CELL_WIDTH,
        u32::from(rows.saturating_sub(1).max(1)) * CELL_HEIGHT,
    )
}

impl<W: Write> TextRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Paints the visible page. Columns of a spread are laid side by side and
    /// the footer, if any, takes the last text row.
    pub fn draw(&mut self, frame: &Frame, params: DrawParams) -> Result<()> {
        let foreground = frame.foreground.as_deref().and_then(parse_hex_color);
        let background = frame.background.as_deref().and_then(parse_hex_color);
        if let Some(color) = foreground {
            crossterm::queue!(self.writer, SetForegroundColor(color))?;
        }
        if let Some(color) = background {
            crossterm::queue!(self.writer, SetBackgroundColor(color))?;
        }
        crossterm::queue!(self.writer, Clear(ClearType::All))?;

        let text_rows = params.text_rows();
        let body_rows = if frame.footer.is_some() {
            text_rows.saturating_sub(1)
        } else {
            text_rows
        };
        let column_count = frame.columns.len().max(1) as u16;
        let column_width = params.columns / column_count;

        for (index, column) in frame.columns.iter().enumerate() {
            let x = column_width * index as u16 + if index > 0 { 1 } else { 0 };
            let width = usize::from(column_width.saturating_sub(1).max(1));
            for (row, line) in column.iter().take(usize::from(body_rows)).enumerate() {
                crossterm::queue!(
                    self.writer,
                    cursor::MoveTo(x, row as u16),
                    Print(truncate(line, width))
                )?;
            }
        }

        if let Some(footer) = &frame.footer {
            let width = usize::from(params.columns);
            crossterm::queue!(
                self.writer,
                cursor::MoveTo(0, text_rows.saturating_sub(1)),
                Print(center(footer, width))
            )?;
        }

        crossterm::queue!(self.writer, ResetColor)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// The terminal renders all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Parses `#rrggbb` into a terminal colour.
pub fn parse_hex_color(raw: &str) -> Option<Color> {
    let hex = raw.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some(Color::Rgb {
        r: channel(0..2)?,
        g: channel(2..4)?,
        b: channel(4..6)?,
    })
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

fn center(text: &str, width: usize) -> String {
    let text = truncate(text, width);
    let pad = width.saturating_sub(text.chars().count()) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Gesture(Gesture),
    NextPage { count: usize },
    PrevPage { count: usize },
    NextChapter,
    PrevChapter,
    ToggleFlow,
    ChangeFontSize { delta: i32 },
    CycleTheme,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Command(Command),
    OpenTableOfContents,
    CloseOverlay,
    TocMoveSelection { delta: isize },
    TocActivateSelection,
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Toc,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
    columns: u16,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminal width used to split mouse clicks into thirds.
    pub fn with_columns(mut self, columns: u16) -> Self {
        self.columns = columns;
        self
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        if let Event::Resize(columns, rows) = event {
            debug!(columns, rows, "terminal resized");
            self.columns = columns;
            return UiEvent::Resize { columns, rows };
        }
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Toc => self.map_event_toc(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('h'), KeyModifiers::NONE) | (KeyCode::Left, KeyModifiers::NONE) => {
                    self.gesture(Gesture::TapLeft)
                }
                (KeyCode::Char('l'), KeyModifiers::NONE)
                | (KeyCode::Right, KeyModifiers::NONE) => self.gesture(Gesture::TapRight),
                (KeyCode::Char(' '), _) => self.gesture(Gesture::TapCenter),
                (KeyCode::Enter, _) => self.gesture(Gesture::DoubleTap),
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::NextPage { count })
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::Command(Command::PrevPage { count })
                }
                (KeyCode::Char('n'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::Command(Command::NextChapter)
                }
                (KeyCode::Char('p'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::Command(Command::PrevChapter)
                }
                (KeyCode::Char('f'), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::ToggleFlow)
                }
                (KeyCode::Char('+'), _) | (KeyCode::Char('='), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::ChangeFontSize { delta: FONT_STEP })
                }
                (KeyCode::Char('-'), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::ChangeFontSize { delta: -FONT_STEP })
                }
                (KeyCode::Char('d'), _) => {
                    self.reset_count();
                    UiEvent::Command(Command::CycleTheme)
                }
                (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => {
                    self.reset_count();
                    UiEvent::OpenTableOfContents
                }
                (KeyCode::Char('q'), _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            Event::Mouse(MouseEvent {
                kind: MouseEventKind::Down(MouseButton::Left),
                column,
                ..
            }) => {
                self.reset_count();
                self.gesture(self.click_gesture(column))
            }
            _ => UiEvent::None,
        }
    }

    fn map_event_toc(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => UiEvent::CloseOverlay,
                (KeyCode::Char('t'), _) | (KeyCode::Char('T'), _) => UiEvent::CloseOverlay,
                (KeyCode::Enter, _) => UiEvent::TocActivateSelection,
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    UiEvent::TocMoveSelection { delta: 1 }
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    UiEvent::TocMoveSelection { delta: -1 }
                }
                (KeyCode::Char('q'), _) => UiEvent::Quit,
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn click_gesture(&self, column: u16) -> Gesture {
        let third = (self.columns / 3).max(1);
        if column < third {
            Gesture::TapLeft
        } else if column >= self.columns.saturating_sub(third) {
            Gesture::TapRight
        } else {
            Gesture::TapCenter
        }
    }

    fn gesture(&mut self, gesture: Gesture) -> UiEvent {
        self.reset_count();
        UiEvent::Command(Command::Gesture(gesture))
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn click(column: u16) -> Event {
        Event::Mouse(MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row: 3,
            modifiers: KeyModifiers::NONE,
        })
    }

    fn frame(columns: Vec<Vec<&str>>, footer: Option<&str>) -> Frame {
        Frame {
            columns: columns
                .into_iter()
                .map(|column| column.into_iter().map(str::to_string).collect())
                .collect(),
            footer: footer.map(str::to_string),
            foreground: Some("#1a1a1a".to_string()),
            background: Some("#ffffff".to_string()),
            ..Frame::default()
        }
    }

    #[test]
    fn draw_writes_page_text_and_footer() {
        let mut renderer = TextRenderer::new(Vec::new());
        renderer
            .draw(
                &frame(vec![vec!["It was a dark night."]], Some("Next chapter ›")),
                DrawParams::clamped(40, 10),
            )
            .unwrap();
        let output = String::from_utf8(renderer.writer).unwrap();
        assert!(output.contains("It was a dark night."));
        assert!(output.contains("Next chapter ›"));
    }

    #[test]
    fn draw_truncates_spread_columns_to_half_width() {
        let mut renderer = TextRenderer::new(Vec::new());
        let long = "x".repeat(30);
        renderer
            .draw(
                &frame(vec![vec![long.as_str()], vec!["right page"]], None),
                DrawParams::clamped(40, 10),
            )
            .unwrap();
        let output = String::from_utf8(renderer.writer).unwrap();
        assert!(output.contains(&"x".repeat(19)));
        assert!(!output.contains(&"x".repeat(20)));
        assert!(output.contains("right page"));
    }

    #[test]
    fn hex_colors_parse_or_are_ignored() {
        assert_eq!(
            parse_hex_color("#f4ecd8"),
            Some(Color::Rgb {
                r: 0xf4,
                g: 0xec,
                b: 0xd8
            })
        );
        assert_eq!(parse_hex_color("white"), None);
        assert_eq!(parse_hex_color("#fff"), None);
    }

    #[test]
    fn viewport_reserves_the_status_row() {
        let viewport = viewport_for(100, 31);
        assert_eq!(viewport.width, 100 * CELL_WIDTH);
        assert_eq!(viewport.height, 30 * CELL_HEIGHT);
    }

    #[test]
    fn event_mapper_uses_numeric_prefix_for_next_page() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('1'))), UiEvent::None);
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('2'))), UiEvent::None);
        assert_eq!(mapper.pending_input().as_deref(), Some("12"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Command(Command::NextPage { count: 12 })
        );
        assert!(mapper.pending_input().is_none());
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('k'))),
            UiEvent::Command(Command::PrevPage { count: 1 })
        );
    }

    #[test]
    fn event_mapper_drops_prefix_on_other_command() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('n'))),
            UiEvent::Command(Command::NextChapter)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::Command(Command::NextPage { count: 1 })
        );
    }

    #[test]
    fn event_mapper_maps_keys_to_gestures() {
        let mut mapper = EventMapper::new();
        let cases = [
            (KeyCode::Char('h'), Gesture::TapLeft),
            (KeyCode::Left, Gesture::TapLeft),
            (KeyCode::Char('l'), Gesture::TapRight),
            (KeyCode::Right, Gesture::TapRight),
            (KeyCode::Char(' '), Gesture::TapCenter),
            (KeyCode::Enter, Gesture::DoubleTap),
        ];
        for (code, gesture) in cases {
            assert_eq!(
                mapper.map_event(key_event(code)),
                UiEvent::Command(Command::Gesture(gesture)),
                "{code:?}"
            );
        }
    }

    #[test]
    fn event_mapper_maps_reader_shortcuts() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('f'))),
            UiEvent::Command(Command::ToggleFlow)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('+'))),
            UiEvent::Command(Command::ChangeFontSize { delta: FONT_STEP })
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('-'))),
            UiEvent::Command(Command::ChangeFontSize { delta: -FONT_STEP })
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('d'))),
            UiEvent::Command(Command::CycleTheme)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('t'))),
            UiEvent::OpenTableOfContents
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('q'))), UiEvent::Quit);
    }

    #[test]
    fn event_mapper_splits_clicks_into_thirds() {
        let mut mapper = EventMapper::new().with_columns(90);
        assert_eq!(
            mapper.map_event(click(5)),
            UiEvent::Command(Command::Gesture(Gesture::TapLeft))
        );
        assert_eq!(
            mapper.map_event(click(45)),
            UiEvent::Command(Command::Gesture(Gesture::TapCenter))
        );
        assert_eq!(
            mapper.map_event(click(80)),
            UiEvent::Command(Command::Gesture(Gesture::TapRight))
        );

        assert_eq!(
            mapper.map_event(Event::Resize(30, 20)),
            UiEvent::Resize {
                columns: 30,
                rows: 20
            }
        );
        assert_eq!(
            mapper.map_event(click(25)),
            UiEvent::Command(Command::Gesture(Gesture::TapRight))
        );
    }

    #[test]
    fn event_mapper_toc_mode_maps_navigation_keys() {
        let mut mapper = EventMapper::new();
        mapper.set_mode(InputMode::Toc);

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('j'))),
            UiEvent::TocMoveSelection { delta: 1 }
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Up)),
            UiEvent::TocMoveSelection { delta: -1 }
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::TocActivateSelection
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::CloseOverlay);
    }

    #[test]
    fn event_mapper_switching_modes_clears_pending_count() {
        let mut mapper = EventMapper::new();
        mapper.map_event(key_event(KeyCode::Char('7')));
        assert_eq!(mapper.pending_input().as_deref(), Some("7"));

        mapper.set_mode(InputMode::Toc);
        assert!(mapper.pending_input().is_none());
        mapper.set_mode(InputMode::Normal);
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Down, KeyModifiers::NONE)),
            UiEvent::Command(Command::NextPage { count: 1 })
        );
    }
}
