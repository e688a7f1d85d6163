//! Line rendering
//!
//! Prompt and banner code builds styled `Line`s; a `LineRenderer` puts
//! them somewhere. The terminal renderer draws with crossterm and colored,
//! the headless renderer keeps them in memory so prompt and controller
//! logic can be exercised without a terminal.

use colored::Colorize;
use crossterm::cursor::{MoveTo, MoveToColumn, MoveUp};
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use unicode_width::UnicodeWidthStr;

const DEFAULT_COLUMNS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Dim,
    Bold,
    Inverse,
}

/// A run of text with one style
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub style: Style,
}

/// One line of output made of styled spans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub spans: Vec<Span>,
}

impl Line {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::styled(text, Style::Plain)
    }

    pub fn styled(text: impl Into<String>, style: Style) -> Self {
        Self::new().push(text, style)
    }

    /// Append a span; empty text is skipped
    pub fn push(mut self, text: impl Into<String>, style: Style) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.spans.push(Span { text, style });
        }
        self
    }

    pub fn extend(mut self, spans: impl IntoIterator<Item = Span>) -> Self {
        self.spans
            .extend(spans.into_iter().filter(|span| !span.text.is_empty()));
        self
    }

    /// The unstyled text of the line
    pub fn text(&self) -> String {
        self.spans.iter().map(|span| span.text.as_str()).collect()
    }

    /// Display width in terminal columns
    pub fn width(&self) -> usize {
        self.spans.iter().map(|span| span.text.width()).sum()
    }

    /// Render with ANSI styling
    pub fn to_ansi(&self) -> String {
        self.spans
            .iter()
            .map(|span| match span.style {
                Style::Plain => span.text.clone(),
                Style::Dim => span.text.dimmed().to_string(),
                Style::Bold => span.text.bold().to_string(),
                Style::Inverse => span.text.reversed().to_string(),
            })
            .collect()
    }
}

/// A full screen of lines plus where the cursor should end up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub lines: Vec<Line>,
    /// Row (index into `lines`) and column
    pub cursor: Option<(usize, usize)>,
}

/// Abstract line-oriented output
pub trait LineRenderer {
    /// Terminal width in columns
    fn columns(&self) -> usize;

    fn clear(&mut self) -> io::Result<()>;

    fn write_lines(&mut self, lines: &[Line]) -> io::Result<()>;

    /// Move the cursor; `row` is relative to the first line of the last
    /// `write_lines` call
    fn place_cursor(&mut self, row: usize, column: usize) -> io::Result<()>;

    /// Clear the screen and draw a whole frame
    fn draw(&mut self, frame: &Frame) -> io::Result<()> {
        self.clear()?;
        self.write_lines(&frame.lines)?;
        if let Some((row, column)) = frame.cursor {
            self.place_cursor(row, column)?;
        }
        Ok(())
    }
}

/// Shared, ordered output destination
///
/// The controller, the renderer and the run coordinator all write through
/// clones of the same sink.
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    newline: &'static str,
}

impl OutputSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            newline: "\n",
        }
    }

    /// Stdout of a terminal in raw mode, where a bare LF does not return
    /// the carriage
    pub fn raw_stdout() -> Self {
        Self {
            newline: "\r\n",
            ..Self::new(io::stdout())
        }
    }

    pub fn newline(&self) -> &'static str {
        self.newline
    }

    /// Run `f` with exclusive access to the writer, then flush
    pub fn with<T>(&self, f: impl FnOnce(&mut dyn Write) -> io::Result<T>) -> io::Result<T> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let value = f(&mut **writer)?;
        writer.flush()?;
        Ok(value)
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let newline = self.newline;
        self.with(|w| write!(w, "{}{}", line, newline))
    }
}

/// In-memory writer whose contents can be read back
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&bytes).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Renderer for a real terminal
pub struct TerminalRenderer {
    sink: OutputSink,
    last_batch: usize,
}

impl TerminalRenderer {
    pub fn new(sink: OutputSink) -> Self {
        Self {
            sink,
            last_batch: 0,
        }
    }
}

impl LineRenderer for TerminalRenderer {
    fn columns(&self) -> usize {
        crossterm::terminal::size()
            .map(|(columns, _)| columns as usize)
            .unwrap_or(DEFAULT_COLUMNS)
    }

    fn clear(&mut self) -> io::Result<()> {
        self.last_batch = 0;
        self.sink.with(|w| {
            w.queue(Clear(ClearType::All))?
                .queue(Clear(ClearType::Purge))?
                .queue(MoveTo(0, 0))?;
            Ok(())
        })
    }

    fn write_lines(&mut self, lines: &[Line]) -> io::Result<()> {
        let newline = self.sink.newline();
        self.last_batch = lines.len();
        self.sink.with(|w| {
            for line in lines {
                write!(w, "{}{}", line.to_ansi(), newline)?;
            }
            Ok(())
        })
    }

    fn place_cursor(&mut self, row: usize, column: usize) -> io::Result<()> {
        let up = self.last_batch.saturating_sub(row);
        self.sink.with(|w| {
            if up > 0 {
                w.queue(MoveUp(up as u16))?;
            }
            w.queue(MoveToColumn(column as u16))?;
            Ok(())
        })
    }
}

/// Renderer that keeps the screen in memory
#[derive(Debug, Clone)]
pub struct HeadlessRenderer {
    columns: usize,
    screen: Vec<Line>,
    batch_start: usize,
    cursor: Option<(usize, usize)>,
    clears: usize,
}

impl HeadlessRenderer {
    pub fn new(columns: usize) -> Self {
        Self {
            columns,
            screen: Vec::new(),
            batch_start: 0,
            cursor: None,
            clears: 0,
        }
    }

    pub fn screen(&self) -> &[Line] {
        &self.screen
    }

    /// Unstyled text of every line on screen
    pub fn screen_text(&self) -> Vec<String> {
        self.screen.iter().map(Line::text).collect()
    }

    /// Absolute cursor position on the screen
    pub fn cursor(&self) -> Option<(usize, usize)> {
        self.cursor
    }

    pub fn clears(&self) -> usize {
        self.clears
    }
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_COLUMNS)
    }
}

impl LineRenderer for HeadlessRenderer {
    fn columns(&self) -> usize {
        self.columns
    }

    fn clear(&mut self) -> io::Result<()> {
        self.screen.clear();
        self.batch_start = 0;
        self.cursor = None;
        self.clears += 1;
        Ok(())
    }

    fn write_lines(&mut self, lines: &[Line]) -> io::Result<()> {
        self.batch_start = self.screen.len();
        self.screen.extend_from_slice(lines);
        self.cursor = None;
        Ok(())
    }

    fn place_cursor(&mut self, row: usize, column: usize) -> io::Result<()> {
        self.cursor = Some((self.batch_start + row, column));
        Ok(())
    }
}
