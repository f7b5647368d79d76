use anyhow::{bail, Context, Result};
use crossbeam::channel::Receiver;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph},
    Terminal,
};
use ropey::Rope;
use std::io::{stdout, Stdout};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use jot::manager::BackupPlan;
use jot::{
    BackupResponse, BackupWorker, BufferEvent, BufferId, CheckScope, Config, FileManager, FileStatus, LoadError,
    LoadOptions, Position, SaveMode, UniMode, ViewId,
};

/// The single view this front-end shows
const VIEW: ViewId = ViewId(1);
const FS_CHECK_INTERVAL: Duration = Duration::from_secs(2);

struct Args {
    config: Option<PathBuf>,
    file: Option<PathBuf>,
    recover: Option<PathBuf>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Args {
            config: None,
            file: None,
            recover: None,
        };
        let mut iter = std::env::args_os().skip(1);
        while let Some(arg) = iter.next() {
            match arg.to_str() {
                Some("--config") => args.config = Some(iter.next().context("--config needs a path")?.into()),
                Some("--recover") => args.recover = Some(iter.next().context("--recover needs a path")?.into()),
                Some(flag) if flag.starts_with("--") => bail!("unknown option {flag}"),
                _ if args.file.is_none() => args.file = Some(PathBuf::from(&arg)),
                _ => bail!("only one file can be opened"),
            }
        }
        Ok(args)
    }
}

struct App {
    should_quit: bool,
    quit_armed: bool,
    manager: FileManager,
    worker: BackupWorker,
    events: Receiver<BufferEvent>,
    buffer: BufferId,
    /// Where an untitled buffer gets saved
    save_as: Option<PathBuf>,
    message: String,
    last_fs_check: Instant,
    viewport_height: usize,
}

impl App {
    fn new(config: Config, args: &Args) -> Result<Self> {
        let mut manager = FileManager::new(config);
        let events = manager.subscribe();
        let worker = BackupWorker::new(manager.gate().clone(), manager.config().backup_interval());

        let mut save_as = None;
        let buffer = match &args.file {
            Some(path) => {
                let options = LoadOptions {
                    backup: args.recover.clone(),
                    ..LoadOptions::default()
                };
                match manager.load(path, options) {
                    Ok(id) => id,
                    Err(LoadError::NotFound(_)) => {
                        save_as = Some(path.clone());
                        manager.new_empty_document()
                    }
                    Err(err) => return Err(err).with_context(|| format!("could not open {}", path.display())),
                }
            }
            None => manager.new_empty_document(),
        };
        manager.add_reference(buffer, VIEW)?;
        manager.set_active(buffer);

        Ok(Self {
            should_quit: false,
            quit_armed: false,
            manager,
            worker,
            events,
            buffer,
            save_as,
            message: String::from("Ctrl-S save | Ctrl-R reload | Ctrl-Z/Ctrl-Y undo/redo | Ctrl-Q quit"),
            last_fs_check: Instant::now(),
            viewport_height: 1,
        })
    }

    fn text(&self) -> Rope {
        self.manager.text(self.buffer).unwrap_or_default()
    }

    fn position(&self) -> Position {
        self.manager
            .buffer(self.buffer)
            .and_then(|buffer| buffer.position(VIEW))
            .unwrap_or_default()
    }

    fn set_position(&mut self, position: Position) {
        if let Some(buffer) = self.manager.buffer_mut(self.buffer) {
            buffer.set_position(VIEW, position);
        }
    }

    fn move_caret(&mut self, caret: usize) {
        let text = self.text();
        let caret = caret.min(text.len_chars());
        let mut position = self.position();
        position.caret = caret;
        position.anchor = caret;

        let line = text.char_to_line(caret);
        if line < position.first_visible_line {
            position.first_visible_line = line;
        } else if line >= position.first_visible_line + self.viewport_height {
            position.first_visible_line = line + 1 - self.viewport_height;
        }
        self.set_position(position);
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        if let Event::Key(key) = event {
            if key.kind == KeyEventKind::Press {
                self.handle_key(key)?;
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if !(ctrl && key.code == KeyCode::Char('q')) {
            self.quit_armed = false;
        }

        match key.code {
            KeyCode::Char('q') if ctrl => self.quit(),
            KeyCode::Char('s') if ctrl => self.save(),
            KeyCode::Char('r') if ctrl => self.reload(),
            KeyCode::Char('z') if ctrl => self.undo(true),
            KeyCode::Char('y') if ctrl => self.undo(false),
            KeyCode::Char(ch) if !ctrl => self.insert(&ch.to_string()),
            KeyCode::Tab => self.insert("\t"),
            KeyCode::Enter => {
                let eol = self
                    .manager
                    .buffer(self.buffer)
                    .map(|buffer| buffer.eol_format().terminator())
                    .unwrap_or("\n");
                self.insert(eol);
            }
            KeyCode::Backspace => self.backspace(),
            KeyCode::Delete => self.delete_forward(),
            KeyCode::Left => {
                let caret = self.position().caret;
                self.move_caret(caret.saturating_sub(1));
            }
            KeyCode::Right => {
                let caret = self.position().caret;
                self.move_caret(caret + 1);
            }
            KeyCode::Up => self.move_vertical(-1),
            KeyCode::Down => self.move_vertical(1),
            KeyCode::PageUp => self.move_vertical(-(self.viewport_height as isize)),
            KeyCode::PageDown => self.move_vertical(self.viewport_height as isize),
            KeyCode::Home => {
                let text = self.text();
                let line = text.char_to_line(self.position().caret);
                self.move_caret(text.line_to_char(line));
            }
            KeyCode::End => {
                let text = self.text();
                let line = text.char_to_line(self.position().caret);
                self.move_caret(text.line_to_char(line) + line_content_len(&text, line));
            }
            _ => {}
        }
        Ok(())
    }

    fn move_vertical(&mut self, delta: isize) {
        let text = self.text();
        let caret = self.position().caret;
        let line = text.char_to_line(caret);
        let column = caret - text.line_to_char(line);
        let last = text.len_lines().saturating_sub(1);
        let target = line.saturating_add_signed(delta).min(last);
        let column = column.min(line_content_len(&text, target));
        self.move_caret(text.line_to_char(target) + column);
    }

    fn insert(&mut self, text: &str) {
        let caret = self.position().caret;
        match self.manager.insert_text(self.buffer, caret, text) {
            Ok(()) => self.move_caret(caret + text.chars().count()),
            Err(err) => self.message = err.to_string(),
        }
    }

    fn backspace(&mut self) {
        let caret = self.position().caret;
        if caret == 0 {
            return;
        }
        let text = self.text();
        let start = if caret >= 2 && text.char(caret - 2) == '\r' && text.char(caret - 1) == '\n' {
            caret - 2
        } else {
            caret - 1
        };
        match self.manager.delete_text(self.buffer, start..caret) {
            Ok(()) => self.move_caret(start),
            Err(err) => self.message = err.to_string(),
        }
    }

    fn delete_forward(&mut self) {
        let caret = self.position().caret;
        let text = self.text();
        if caret >= text.len_chars() {
            return;
        }
        let end = if text.char(caret) == '\r' && caret + 1 < text.len_chars() && text.char(caret + 1) == '\n' {
            caret + 2
        } else {
            caret + 1
        };
        if let Err(err) = self.manager.delete_text(self.buffer, caret..end) {
            self.message = err.to_string();
        }
    }

    fn undo(&mut self, undo: bool) {
        let result = if undo {
            self.manager.undo(self.buffer)
        } else {
            self.manager.redo(self.buffer)
        };
        match result {
            Ok(true) => {
                let caret = self.position().caret;
                self.move_caret(caret);
            }
            Ok(false) => self.message = String::from(if undo { "Nothing to undo" } else { "Nothing to redo" }),
            Err(err) => self.message = err.to_string(),
        }
    }

    fn save(&mut self) {
        let Some(buffer) = self.manager.buffer(self.buffer) else {
            return;
        };
        let path = if buffer.is_untitled() {
            match &self.save_as {
                Some(path) => path.clone(),
                None => {
                    self.message = String::from("No file name; start jot with a path to save");
                    return;
                }
            }
        } else {
            buffer.full_path().to_path_buf()
        };

        match self.manager.save(self.buffer, &path, SaveMode::InPlace) {
            Ok(()) => {
                self.save_as = None;
                self.message = format!("Saved {}", path.display());
            }
            Err(err) => self.message = format!("Save failed: {err}"),
        }
    }

    fn reload(&mut self) {
        let untitled = self.manager.buffer(self.buffer).map_or(true, |buffer| buffer.is_untitled());
        if untitled {
            self.message = String::from("Nothing to reload");
            return;
        }
        match self.manager.reload(self.buffer) {
            Ok(()) => self.message = String::from("Reloaded"),
            Err(err) => self.message = format!("Reload failed: {err}"),
        }
    }

    fn quit(&mut self) {
        let dirty = self.manager.buffer(self.buffer).is_some_and(|buffer| buffer.is_dirty());
        if dirty && !self.quit_armed {
            self.quit_armed = true;
            self.message = String::from("Unsaved changes; Ctrl-Q again to quit (a backup is kept)");
            return;
        }
        self.should_quit = true;
    }

    /// Leave a backup behind for dirty text, otherwise close cleanly
    fn shutdown(mut self) {
        let dirty = self.manager.buffer(self.buffer).is_some_and(|buffer| buffer.is_dirty());
        if dirty {
            match self.manager.backup_buffer(self.buffer) {
                Ok(outcome) => info!(?outcome, "backup kept for recovery"),
                Err(err) => warn!(error = %err, "final backup failed"),
            }
        } else if let Err(err) = self.manager.close(self.buffer, VIEW) {
            warn!(error = %err, "close failed");
        }
        self.worker.shutdown();
    }

    fn tick(&mut self) {
        while let Some(response) = self.worker.try_recv_response() {
            match response {
                BackupResponse::Due => self.schedule_backup(),
                BackupResponse::Written(receipt) => {
                    self.manager.complete_backup(&receipt);
                }
                BackupResponse::Failed { id, error } => {
                    warn!(%id, error = %error, "periodic backup failed");
                    self.message = format!("Backup failed: {error}");
                }
            }
        }

        while let Ok(event) = self.events.try_recv() {
            debug!(id = %event.id, changes = ?event.changes, "buffer changed");
        }

        if self.last_fs_check.elapsed() >= FS_CHECK_INTERVAL {
            self.last_fs_check = Instant::now();
            for id in self.manager.check_filesystem_changes(CheckScope::Active) {
                match self.manager.buffer(id).map(|buffer| buffer.status()) {
                    Some(FileStatus::Deleted) => self.message = String::from("File was deleted on disk"),
                    Some(FileStatus::Modified) => {
                        self.message = String::from("File changed on disk; Ctrl-R to reload")
                    }
                    _ => {}
                }
            }
        }
    }

    fn schedule_backup(&mut self) {
        let Some(active) = self.manager.active() else {
            return;
        };
        match self.manager.prepare_backup(active) {
            Ok(BackupPlan::Write(job)) => {
                if let Err(err) = self.worker.submit(job) {
                    warn!(error = %err, "could not hand the backup to the worker");
                }
            }
            Ok(BackupPlan::Done(outcome)) => debug!(?outcome, "no backup write needed"),
            Err(err) => warn!(error = %err, "could not prepare a backup"),
        }
    }
}

/// Chars on `line` without its terminator
fn line_content_len(text: &Rope, line: usize) -> usize {
    if line >= text.len_lines() {
        return 0;
    }
    let slice = text.line(line);
    let mut len = slice.len_chars();
    if len > 0 && slice.char(len - 1) == '\n' {
        len -= 1;
    }
    if len > 0 && slice.char(len - 1) == '\r' {
        len -= 1;
    }
    len
}

fn setup_tracing(config: &Config) {
    use std::fs::OpenOptions;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // The terminal belongs to the UI, so logs only ever go to a file
    let Some(log_dir) = std::env::var_os("JOT_LOG_DIR")
        .map(PathBuf::from)
        .or_else(|| config.data_dir().map(|dir| dir.join("logs")))
    else {
        return;
    };
    if std::fs::create_dir_all(&log_dir).is_err() {
        return;
    }

    let log_path = log_dir.join("jot.log");
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) else {
        return;
    };

    let filter = EnvFilter::try_from_env("JOT_LOG").unwrap_or_else(|_| EnvFilter::new("jot=info"));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry().with(filter).with(file_layer).init();
    info!(path = ?log_path, "tracing initialized");
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    terminal.show_cursor()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn status_line(app: &App, text: &Rope) -> String {
    let Some(buffer) = app.manager.buffer(app.buffer) else {
        return String::new();
    };
    let encoding = match (buffer.uni_mode(), buffer.encoding()) {
        (UniMode::Ansi | UniMode::Ascii, Some(codepage)) => codepage.name().to_string(),
        (mode, _) => mode.display().to_string(),
    };
    let caret = app.position().caret.min(text.len_chars());
    let line = text.char_to_line(caret);
    let column = caret - text.line_to_char(line);
    let status = match buffer.status() {
        FileStatus::Regular => "",
        FileStatus::Unnamed => " | new",
        FileStatus::Deleted => " | deleted",
        FileStatus::Modified => " | changed on disk",
    };

    format!(
        " {} | {} | {} | {}{}{} | Ln {}, Col {} | {}",
        buffer.lang_type().display(),
        encoding,
        buffer.eol_format().display(),
        format_size(app.manager.doc_length(app.buffer).unwrap_or(0)),
        if buffer.is_readonly() { " | read-only" } else { "" },
        status,
        line + 1,
        column + 1,
        app.message
    )
}

fn render_ui(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    let text = app.text();

    terminal.draw(|frame| {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(size);

        let title = match app.manager.buffer(app.buffer) {
            Some(buffer) if buffer.is_dirty() => format!("{} *", buffer.file_name()),
            Some(buffer) => buffer.file_name().to_string(),
            None => String::new(),
        };
        let main_block = Block::default().borders(Borders::ALL).title(title);
        let inner_area = main_block.inner(chunks[0]);
        frame.render_widget(main_block, chunks[0]);
        app.viewport_height = (inner_area.height as usize).max(1);

        let position = app.position();
        let first = position.first_visible_line.min(text.len_lines().saturating_sub(1));
        let lines: Vec<Line> = (first..text.len_lines())
            .take(app.viewport_height)
            .map(|line| {
                let slice = text.line(line);
                Line::from(slice.slice(..line_content_len(&text, line)).to_string())
            })
            .collect();
        frame.render_widget(Paragraph::new(lines), inner_area);

        let caret = position.caret.min(text.len_chars());
        let line = text.char_to_line(caret);
        let column = caret - text.line_to_char(line);
        if line >= first && line < first + app.viewport_height {
            let x = inner_area.x.saturating_add(column.min(u16::MAX as usize) as u16);
            let y = inner_area.y + (line - first) as u16;
            frame.set_cursor_position((x.min(inner_area.right().saturating_sub(1)), y));
        }

        let status = Paragraph::new(status_line(app, &text))
            .style(Style::default().bg(Color::DarkGray).fg(Color::White));
        frame.render_widget(status, chunks[1]);
    })?;

    Ok(())
}

fn run(app: &mut App, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    loop {
        app.tick();
        render_ui(terminal, app)?;

        if app.should_quit {
            break;
        }

        if event::poll(Duration::from_millis(100))? {
            let event = event::read()?;
            app.handle_event(event)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load_or_default(path).context("could not load the configuration")
}

fn main() -> Result<()> {
    let args = Args::parse()?;
    let config = load_config(args.config.as_deref())?;
    setup_tracing(&config);

    // Set up panic hook to restore terminal
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = disable_raw_mode();
        let _ = stdout().execute(LeaveAlternateScreen);
        default_panic(info);
    }));

    let mut app = App::new(config, &args)?;
    let mut terminal = setup_terminal()?;
    let result = run(&mut app, &mut terminal);
    restore_terminal(terminal)?;
    app.shutdown();

    result
}
