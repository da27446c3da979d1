use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use reflow_core::{
    AppConfig, BookDecoder, BookStore, EventLog, FileBookStore, FileSettingsStore,
    FlowKind, Preferences, ReadingSession, SessionEvent, SessionResult, SessionState, Theme,
    Viewport,
};
use reflow_render::{FrameSink, ManifestDecoder};
use reflow_tty::{
    viewport_for, write_status_line, Command, DrawParams, EventMapper, InputMode, TextRenderer,
    UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

mod toc;

use toc::ChapterPicker;

#[derive(Debug, Parser)]
#[command(name = "reflow", version, about = "terminal reader for reflowable books")]
struct Args {
    /// Flow mode to read in: "paginated" or "continuous"
    #[arg(long = "flow")]
    flow: Option<String>,

    /// Font size in percent (70-200)
    #[arg(long = "font-size")]
    font_size: Option<u16>,

    /// Colour theme: light, dark or sepia
    #[arg(long = "theme")]
    theme: Option<String>,

    /// Book manifests to import into the library; the first one is opened
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.files.is_empty() {
        return Err(anyhow!("no input files provided"));
    }

    let project_dirs = ProjectDirs::from("net", "reflow", "reflow")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let config = AppConfig::load_default(&project_dirs)?;

    let library = Arc::new(FileBookStore::new(config.library_dir(&project_dirs))?);
    let settings = Arc::new(FileSettingsStore::open(
        project_dirs.config_dir().join("settings.toml"),
    )?);
    let preferences = Preferences::new(settings).with_defaults(
        config.reader.flow,
        config.reader.font_size,
        config.reader.theme,
    );
    apply_overrides(&args, &preferences)?;

    let mut book_ids = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let id = library
            .import(path)
            .with_context(|| format!("failed to import {:?}", path))?;
        info!(path = ?path, book = %id, "imported book");
        book_ids.push(id);
    }

    let frame_sink = FrameSink::default();
    let decoder: Arc<dyn BookDecoder> =
        Arc::new(ManifestDecoder::with_frame_sink(frame_sink.clone()));
    let store: Arc<dyn BookStore> = library;
    let (columns, rows) = terminal::size()?;
    let session = ReadingSession::new(decoder, store, preferences)
        .with_viewport(terminal_viewport(&config, columns, rows))
        .with_spread_min_width(config.viewport.spread_min_width);
    let events = EventLog::new();
    session.subscribe(Arc::new(events.clone()));

    if let Some(&first) = book_ids.first() {
        if let Err(err) = session.open(first).await {
            if err.is_fatal_to_open() {
                return Err(anyhow::Error::new(err).context("failed to open book"));
            }
            warn!(%err, "open did not complete");
        }
        session.process_relocations().await;
    }

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide, EnableMouseCapture)?;
    let mut renderer = TextRenderer::new(stdout);
    let mut event_mapper = EventMapper::new().with_columns(columns);
    let mut overlay = OverlayState::None;
    let mut status: Option<String> = None;
    let mut dirty = true;

    loop {
        for event in events.drain() {
            match event {
                SessionEvent::StatusMessage { text } => {
                    status = Some(text);
                    dirty = true;
                }
                SessionEvent::MenuRequested => {
                    overlay = OverlayState::Toc(ChapterPicker::for_session(&session));
                    dirty = true;
                }
                SessionEvent::BookClosed => {
                    overlay.deactivate();
                    dirty = true;
                }
                SessionEvent::ChapterChanged { .. } | SessionEvent::FlowModeChanged { .. } => {
                    dirty = true;
                }
                SessionEvent::BookOpening { .. } | SessionEvent::TocReady { .. } => {}
            }
        }

        if overlay.is_active() {
            if event_mapper.mode() != InputMode::Toc {
                event_mapper.set_mode(InputMode::Toc);
            }
        } else if matches!(event_mapper.mode(), InputMode::Toc) {
            event_mapper.set_mode(InputMode::Normal);
        }

        if dirty {
            let pending = event_mapper.pending_input();
            redraw(
                &mut renderer,
                &session,
                &frame_sink,
                &mut overlay,
                combine_status(reader_status(&session, status.take()), pending.as_deref()),
            )?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            let ui_event = event_mapper.map_event(ev);
            match handle_event(ui_event, &session, &config, &mut overlay).await? {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
            if event_mapper.pending_input().is_some() {
                dirty = true;
            }
        }
        session.process_relocations().await;
    }

    renderer.clear_all()?;
    session.close();
    Ok(())
}

fn apply_overrides(args: &Args, preferences: &Preferences) -> Result<()> {
    if let Some(flow) = &args.flow {
        let flow: FlowKind = flow.parse()?;
        preferences.set_flow(flow)?;
    }
    if let Some(size) = args.font_size {
        preferences.set_font_size(size)?;
    }
    if let Some(theme) = &args.theme {
        let theme: Theme = theme.parse().map_err(|err: String| anyhow!(err))?;
        preferences.set_theme(theme)?;
    }
    Ok(())
}

fn terminal_viewport(config: &AppConfig, columns: u16, rows: u16) -> Viewport {
    viewport_for(columns, rows).with_narrow_breakpoint(config.viewport.narrow_breakpoint)
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

enum OverlayState {
    None,
    Toc(ChapterPicker),
}

impl OverlayState {
    fn deactivate(&mut self) {
        *self = OverlayState::None;
    }

    fn is_active(&self) -> bool {
        !matches!(self, OverlayState::None)
    }
}

async fn handle_event(
    event: UiEvent,
    session: &ReadingSession,
    config: &AppConfig,
    overlay: &mut OverlayState,
) -> Result<LoopAction> {
    match event {
        UiEvent::Command(cmd) => {
            let outcome = match cmd {
                Command::Gesture(gesture) => session.handle_gesture(gesture).await,
                Command::NextPage { count } => turn_pages(session, count, true).await,
                Command::PrevPage { count } => turn_pages(session, count, false).await,
                Command::NextChapter => session.next_chapter().await,
                Command::PrevChapter => session.prev_chapter().await,
                Command::ToggleFlow => session.toggle_flow().await,
                Command::ChangeFontSize { delta } => {
                    session.change_font_size(delta).await;
                    Ok(())
                }
                Command::CycleTheme => {
                    session.set_theme(session.theme().next()).await;
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                warn!(%err, ?cmd, "command failed");
            }
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::OpenTableOfContents => {
            if session.state() == SessionState::Ready {
                *overlay = OverlayState::Toc(ChapterPicker::for_session(session));
                Ok(LoopAction::ContinueRedraw)
            } else {
                Ok(LoopAction::Continue)
            }
        }
        UiEvent::CloseOverlay => {
            if overlay.is_active() {
                overlay.deactivate();
                Ok(LoopAction::ContinueRedraw)
            } else {
                Ok(LoopAction::Continue)
            }
        }
        UiEvent::TocMoveSelection { delta } => {
            if let OverlayState::Toc(toc) = overlay {
                if toc.step(delta) {
                    return Ok(LoopAction::ContinueRedraw);
                }
            }
            Ok(LoopAction::Continue)
        }
        UiEvent::TocActivateSelection => {
            let href = match overlay {
                OverlayState::Toc(toc) => toc.highlighted().map(|entry| entry.href.clone()),
                OverlayState::None => None,
            };
            let Some(href) = href else {
                return Ok(LoopAction::Continue);
            };
            overlay.deactivate();
            if let Err(err) = session.go_to_chapter(&href).await {
                warn!(%err, %href, "table of contents jump failed");
            }
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::Resize { columns, rows } => {
            if let Err(err) = session.resize(terminal_viewport(config, columns, rows)).await {
                warn!(%err, columns, rows, "relayout after resize failed");
            }
            Ok(LoopAction::ContinueRedraw)
        }
        UiEvent::Quit => Ok(LoopAction::Quit),
        UiEvent::None => Ok(LoopAction::Continue),
    }
}

async fn turn_pages(session: &ReadingSession, count: usize, forward: bool) -> SessionResult<()> {
    for _ in 0..count {
        if forward {
            session.next_page().await?;
        } else {
            session.prev_page().await?;
        }
        session.process_relocations().await;
    }
    Ok(())
}

fn redraw(
    renderer: &mut TextRenderer<io::Stdout>,
    session: &ReadingSession,
    frame_sink: &FrameSink,
    overlay: &mut OverlayState,
    status: Option<String>,
) -> Result<()> {
    let (columns, rows) = terminal::size()?;
    let params = DrawParams::clamped(columns, rows);

    renderer.begin_sync_update()?;
    if session.state() == SessionState::Ready {
        let frame = frame_sink.lock().clone();
        renderer.draw(&frame, params)?;
    } else {
        renderer.clear_all()?;
        overlay.deactivate();
    }
    if let OverlayState::Toc(toc) = overlay {
        toc.draw(renderer.writer(), columns, params.text_rows())?;
    }
    if let Some(status) = status {
        draw_status_line(renderer, rows, &status)?;
    }
    renderer.end_sync_update()?;
    Ok(())
}

fn reader_status(session: &ReadingSession, message: Option<String>) -> Option<String> {
    let mut status = match session.state() {
        SessionState::Ready => {
            let mut parts = vec![session.title().unwrap_or_else(|| "<untitled>".to_string())];
            if let Some(chapter) = session.current_chapter_name() {
                parts.push(chapter);
            }
            if let Some(progress) = session.progress() {
                parts.push(format!("{progress}%"));
            }
            parts.push(format!("{} {}%", session.flow_kind(), session.font_size()));
            parts.join(" | ")
        }
        SessionState::Opening => "Opening...".to_string(),
        SessionState::Closed => "No book open".to_string(),
    };
    if let Some(message) = message {
        status.push_str(" | ");
        status.push_str(&message);
    }
    Some(status)
}

fn combine_status(base: Option<String>, pending_input: Option<&str>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending.to_string()),
        (None, None) => None,
    }
}

fn draw_status_line(
    renderer: &mut TextRenderer<io::Stdout>,
    rows: u16,
    status: &str,
) -> Result<()> {
    let status_row = rows.max(1).saturating_sub(1);
    let mut writer = renderer.writer();
    crossterm::execute!(
        &mut writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(&mut writer, status)?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "reflow.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use reflow_core::{FONT_SIZE_MAX, FONT_SIZE_MIN};

    #[test]
    fn font_size_help_matches_the_accepted_range() {
        let command = Args::command();
        let arg = command
            .get_arguments()
            .find(|arg| arg.get_id() == "font_size")
            .unwrap();
        let help = arg.get_help().unwrap().to_string();
        assert!(
            help.contains(&format!("{FONT_SIZE_MIN}-{FONT_SIZE_MAX}")),
            "{help}"
        );
    }

    #[test]
    fn flags_parse_alongside_books() {
        let args = Args::try_parse_from([
            "reflow",
            "--font-size",
            "120",
            "--flow",
            "continuous",
            "a.json",
        ])
        .unwrap();
        assert_eq!(args.font_size, Some(120));
        assert_eq!(args.flow.as_deref(), Some("continuous"));
        assert_eq!(args.files, [PathBuf::from("a.json")]);
    }
}
