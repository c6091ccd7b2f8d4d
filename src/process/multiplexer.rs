//! Fans a child's stdout and stderr into the live terminal and the shared log.
//!
//! One reader thread per stream. Each line is timestamped, tagged with its
//! stream and written to the mirror and then the log before the next line is
//! read, so per-stream order is preserved in both places. Nothing orders
//! lines across the two streams.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};

use crate::error::Result;
use crate::format::format_timestamp;
use crate::sink::{write_flushed, LogSink};

/// Longest chunk read as one line. Longer lines are logged in pieces.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamName {
    Stdout,
    Stderr,
}

impl StreamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single line of child output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLine {
    pub timestamp: DateTime<Local>,
    pub stream: StreamName,
    pub text: String,
}

impl OutputLine {
    pub fn new(stream: StreamName, text: String) -> Self {
        Self {
            timestamp: Local::now(),
            stream,
            text,
        }
    }

    /// `[<timestamp>][cmd-<stream>] <text>` with a trailing newline.
    pub fn render(&self) -> String {
        format!(
            "[{}][cmd-{}] {}\n",
            format_timestamp(&self.timestamp),
            self.stream,
            self.text
        )
    }
}

/// What one reader saw before its stream closed.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    pub stream: StreamName,
    pub lines: u64,
    /// Read failure that ended the stream early, if any.
    pub error: Option<String>,
    /// Whether mirroring was abandoned after a write failure.
    pub mirror_failed: bool,
}

impl DrainReport {
    fn new(stream: StreamName) -> Self {
        Self {
            stream,
            lines: 0,
            error: None,
            mirror_failed: false,
        }
    }
}

/// Reads `source` to end of input, writing each line to `mirror` and `sink`.
///
/// A read failure is logged and ends this stream only. A mirror failure
/// disables the mirror; lines keep flowing to the log so the child is never
/// blocked on a full pipe. Lines over [`MAX_LINE_BYTES`] are split.
pub fn drain(
    source: impl Read,
    stream: StreamName,
    mut mirror: Option<Box<dyn Write + Send>>,
    sink: &LogSink,
) -> DrainReport {
    let mut report = DrainReport::new(stream);
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    let mut split_pending = false;

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
        match limited.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let was_split = split_pending;
                split_pending = !buf.ends_with(b"\n");
                let line = trim_line_ending(&buf);
                if was_split && line.is_empty() {
                    // terminator of a line already emitted in pieces
                    continue;
                }

                let text = String::from_utf8_lossy(line).into_owned();
                let rendered = OutputLine::new(stream, text).render();

                if let Some(out) = mirror.as_mut() {
                    if let Err(e) = write_flushed(out, &rendered) {
                        sink.warn(&format!(
                            "Mirroring {} failed, continuing with log only: {}",
                            stream, e
                        ));
                        mirror = None;
                        report.mirror_failed = true;
                    }
                }
                sink.log_only(&rendered);
                report.lines += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                sink.warn(&format!("Error reading {}: {}", stream, e));
                report.error = Some(e.to_string());
                break;
            }
        }
    }

    log::debug!("{} closed after {} lines", stream, report.lines);
    report
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// A set of reader threads that are joined together.
#[derive(Default)]
pub struct Multiplexer {
    readers: Vec<(StreamName, JoinHandle<DrainReport>)>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a reader thread draining `source` into `mirror` and `sink`.
    pub fn attach(
        &mut self,
        source: impl Read + Send + 'static,
        stream: StreamName,
        mirror: Option<Box<dyn Write + Send>>,
        sink: LogSink,
    ) -> Result<()> {
        let handle = thread::Builder::new()
            .name(format!("cmdprof-{}", stream))
            .spawn(move || drain(source, stream, mirror, &sink))?;
        self.readers.push((stream, handle));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Blocks until every attached reader has reached end of input.
    pub fn join(self) -> Vec<DrainReport> {
        self.readers
            .into_iter()
            .map(|(stream, handle)| {
                handle.join().unwrap_or_else(|_| DrainReport {
                    error: Some("reader thread panicked".into()),
                    ..DrainReport::new(stream)
                })
            })
            .collect()
    }
}
