//! The append-only profile log shared by the sampler and both output readers.
//!
//! Every line is written with a single `write_all` while holding the sink
//! lock, so concurrent writers interleave at line granularity only.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;

use crate::error::{CmdprofError, Result};
use crate::format::format_timestamp;

/// Tag identifying lines written by the tool itself.
pub const TOOL_TAG: &str = "cmdprof";

/// Marker prefixed to recovered, non-fatal errors.
pub const WARN_MARKER: &str = "WARN:";

struct SinkInner {
    log: Box<dyn Write + Send>,
    echo: Option<Box<dyn Write + Send>>,
}

/// Cloneable handle to the shared log.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl LogSink {
    /// Opens (creating if needed) the log at `path` in append mode. Tool
    /// lines are echoed to stderr.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| CmdprofError::LogOpen {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self::from_writers(file, Some(Box::new(io::stderr()))))
    }

    pub fn from_writers(
        log: impl Write + Send + 'static,
        echo: Option<Box<dyn Write + Send>>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                log: Box::new(log),
                echo,
            })),
        }
    }

    /// Writes `[<timestamp>][cmdprof] <message>` to the log and the echo.
    pub fn tool_line(&self, message: &str) {
        let line = format!(
            "[{}][{}] {}\n",
            format_timestamp(&Local::now()),
            TOOL_TAG,
            message
        );
        self.write(&line, true);
    }

    /// Records a recovered error with the warning marker.
    pub fn warn(&self, message: &str) {
        self.tool_line(&format!("{} {}", WARN_MARKER, message));
    }

    /// Appends an already-rendered line to the log only.
    pub fn log_only(&self, line: &str) {
        self.write(line, false);
    }

    /// Separates runs in the log file.
    pub fn blank_line(&self) {
        self.write("\n", false);
    }

    fn write(&self, text: &str, echo: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = write_flushed(&mut inner.log, text) {
            log::error!("failed to append to profile log: {}", e);
        }
        if echo {
            if let Some(out) = inner.echo.as_mut() {
                // The terminal copy is best effort; the log is authoritative.
                let _ = write_flushed(out, text);
            }
        }
    }
}

pub(crate) fn write_flushed(out: &mut impl Write, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SharedBuffer;
    use std::fs;
    use std::thread;

    #[test]
    fn test_tool_line_shape_and_echo() {
        let log = SharedBuffer::new();
        let echo = SharedBuffer::new();
        let sink = LogSink::from_writers(log.clone(), Some(Box::new(echo.clone())));

        sink.tool_line("Collecting baseline...");

        let text = log.contents();
        assert!(text.starts_with('['));
        assert!(text.ends_with("][cmdprof] Collecting baseline...\n"));
        assert_eq!(text, echo.contents());
    }

    #[test]
    fn test_log_only_and_blank_line_skip_echo() {
        let log = SharedBuffer::new();
        let echo = SharedBuffer::new();
        let sink = LogSink::from_writers(log.clone(), Some(Box::new(echo.clone())));

        sink.blank_line();
        sink.log_only("[ts][cmd-stdout] hello\n");

        assert_eq!(log.contents(), "\n[ts][cmd-stdout] hello\n");
        assert!(echo.contents().is_empty());
    }

    #[test]
    fn test_warn_carries_marker() {
        let log = SharedBuffer::new();
        let sink = LogSink::from_writers(log.clone(), None);

        sink.warn("cpu sample failed");

        let text = log.contents();
        assert!(text.contains("[cmdprof] WARN: cpu sample failed"));
    }

    #[test]
    fn test_open_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmdprof.log");
        fs::write(&path, "previous run\n").unwrap();

        let sink = LogSink::open(&path).unwrap();
        sink.log_only("next run\n");

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "previous run\nnext run\n");
    }

    #[test]
    fn test_open_unwritable_path_is_log_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("cmdprof.log");

        let err = LogSink::open(&path).err().unwrap();
        assert!(matches!(err, CmdprofError::LogOpen { .. }));
    }

    #[test]
    fn test_concurrent_writers_never_split_lines() {
        let log = SharedBuffer::new();
        let sink = LogSink::from_writers(log.clone(), None);
        let filler = "x".repeat(64);

        let handles: Vec<_> = (0..3)
            .map(|writer| {
                let sink = sink.clone();
                let filler = filler.clone();
                thread::spawn(move || {
                    for i in 0..200 {
                        let line = format!("writer-{} line-{} {}\n", writer, i, filler);
                        sink.log_only(&line);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = log.contents();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 600);
        for line in lines {
            assert!(line.starts_with("writer-"), "corrupt line: {:?}", line);
            assert!(line.ends_with(&filler), "corrupt line: {:?}", line);
        }
    }
}
