//! Line-oriented output streams for managed services.
//!
//! Every managed service, local or container-backed, owns one
//! [`OutputStream`]. Reader tasks push lines into it; log viewers subscribe to
//! the live broadcast, and the stream keeps the last [`TAIL_LINES`] lines so
//! failures can quote recent output.

use crate::reporter::Reporter;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Lines retained per stream for crash context.
pub const TAIL_LINES: usize = 200;

const CHANNEL_CAPACITY: usize = 1024;

/// Prefix for lines written by the orchestrator rather than the service.
pub const MARKER_PREFIX: &str = "[stackup]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Produced by the service itself.
    Output,
    /// Informational annotation written by the orchestrator.
    Marker,
}

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub service: Arc<str>,
    pub timestamp: DateTime<Local>,
    pub kind: LineKind,
    pub text: String,
}

impl std::fmt::Display for OutputLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} | {}",
            self.timestamp.format("%H:%M:%S"),
            self.service,
            self.text
        )
    }
}

/// An early warning raised by scanning live output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputWarning {
    PortConflict { line: String },
    ErrorLine { line: String },
}

static PORT_CONFLICT: OnceLock<Regex> = OnceLock::new();
static ERROR_LINE: OnceLock<Regex> = OnceLock::new();

fn port_conflict_regex() -> &'static Regex {
    PORT_CONFLICT.get_or_init(|| {
        Regex::new(
            r"(?i)(EADDRINUSE|address already in use|port \d+ is (already )?in use|port is already allocated)",
        )
        .expect("static regex pattern is valid")
    })
}

fn error_line_regex() -> &'static Regex {
    ERROR_LINE.get_or_init(|| {
        Regex::new(r"(?i)\b(error|failed|failure|fatal|exception)\b")
            .expect("static regex pattern is valid")
    })
}

/// Maximum number of generic error warnings per service.
const MAX_ERROR_WARNINGS: usize = 3;

/// Heuristic scanner for live output. Never blocks the stream.
#[derive(Debug, Default)]
pub struct OutputScanner {
    port_conflict_seen: bool,
    error_warnings: usize,
}

impl OutputScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one line. Port conflicts warn once, error lines at most three times.
    pub fn scan(&mut self, line: &str) -> Option<OutputWarning> {
        if port_conflict_regex().is_match(line) {
            if self.port_conflict_seen {
                return None;
            }
            self.port_conflict_seen = true;
            return Some(OutputWarning::PortConflict {
                line: line.trim().to_string(),
            });
        }
        if error_line_regex().is_match(line) && self.error_warnings < MAX_ERROR_WARNINGS {
            self.error_warnings += 1;
            return Some(OutputWarning::ErrorLine {
                line: line.trim().to_string(),
            });
        }
        None
    }
}

struct Inner {
    name: Arc<str>,
    sender: broadcast::Sender<OutputLine>,
    tail: Mutex<VecDeque<OutputLine>>,
    scanner: Option<Mutex<OutputScanner>>,
}

/// Named, line-oriented output of one managed service. Cheap to clone.
#[derive(Clone)]
pub struct OutputStream {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl OutputStream {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), false)
    }

    /// A stream whose service output is scanned for early warnings.
    pub fn with_scanner(name: impl Into<String>) -> Self {
        Self::build(name.into(), true)
    }

    fn build(name: String, scan: bool) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                name: Arc::from(name),
                sender,
                tail: Mutex::new(VecDeque::with_capacity(TAIL_LINES)),
                scanner: scan.then(|| Mutex::new(OutputScanner::new())),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Live lines from now on. Lagging receivers lose the oldest lines.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputLine> {
        self.inner.sender.subscribe()
    }

    /// Append a line of service output, returning any warning it triggered.
    pub fn push(&self, text: impl Into<String>) -> Option<OutputWarning> {
        let text = text.into();
        let warning = self
            .inner
            .scanner
            .as_ref()
            .and_then(|scanner| scanner.lock().scan(&text));
        self.append(LineKind::Output, text);
        warning
    }

    /// Append an orchestrator annotation.
    pub fn annotate(&self, message: impl AsRef<str>) {
        self.append(
            LineKind::Marker,
            format!("{} {}", MARKER_PREFIX, message.as_ref()),
        );
    }

    fn append(&self, kind: LineKind, text: String) {
        let line = OutputLine {
            service: Arc::clone(&self.inner.name),
            timestamp: Local::now(),
            kind,
            text,
        };
        {
            let mut tail = self.inner.tail.lock();
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
        }
        // No receivers is fine; the tail still has the line.
        let _ = self.inner.sender.send(line);
    }

    /// The retained lines, oldest first.
    pub fn tail(&self) -> Vec<OutputLine> {
        self.inner.tail.lock().iter().cloned().collect()
    }

    /// The last `n` lines of text joined with newlines.
    pub fn tail_text(&self, n: usize) -> String {
        let tail = self.inner.tail.lock();
        let skip = tail.len().saturating_sub(n);
        let text = tail
            .iter()
            .skip(skip)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        text
    }

    /// Pump `reader` into this stream line by line until EOF.
    ///
    /// Warnings from the scanner are logged and, when a reporter is given,
    /// shown to the operator.
    pub fn spawn_reader<R>(&self, reader: R, reporter: Option<Arc<dyn Reporter>>) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let stream = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                match next_lossy_line(&mut reader, &mut buf).await {
                    Ok(Some(line)) => {
                        if let Some(warning) = stream.push(line) {
                            stream.report_warning(&warning, reporter.as_deref());
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(service = %stream.name(), "output reader stopped: {}", e);
                        break;
                    }
                }
            }
        })
    }

    fn report_warning(&self, warning: &OutputWarning, reporter: Option<&dyn Reporter>) {
        let message = match warning {
            OutputWarning::PortConflict { line } => {
                format!("{}: port conflict detected: {}", self.name(), line)
            }
            OutputWarning::ErrorLine { line } => format!("{}: {}", self.name(), line),
        };
        tracing::warn!(service = %self.name(), "{}", message);
        if let Some(reporter) = reporter {
            reporter.warning(&message);
        }
    }
}

/// Read the next line, replacing invalid UTF-8 instead of failing on it.
///
/// Returns `Ok(None)` at EOF. The trailing `\n` (and `\r`) is stripped.
/// Readers must keep draining: a closed pipe kills the writer with SIGPIPE.
pub(crate) async fn next_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}
