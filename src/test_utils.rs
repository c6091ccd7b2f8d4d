//! Test utilities shared across modules.
//!
//! Provides an in-memory writer that can be handed to several threads and
//! inspected afterwards, and fixture `/proc` trees for the sampler.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A cloneable in-memory writer. All clones share one buffer.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A writer whose every write fails, e.g. a closed terminal.
pub struct BrokenWriter;

impl Write for BrokenWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

/// Writes `stat` and `meminfo` fixtures under `dir`.
pub fn write_proc_fixture(
    dir: &Path,
    idle: u64,
    total: u64,
    mem_total_kib: u64,
    mem_available_kib: u64,
) {
    // user column absorbs everything that is not idle
    let busy = total - idle;
    fs::write(
        dir.join("stat"),
        format!("cpu  {} 0 0 {} 0 0 0 0 0 0\ncpu0 0 0 0 0\n", busy, idle),
    )
    .unwrap();
    fs::write(
        dir.join("meminfo"),
        format!(
            "MemTotal: {} kB\nMemFree: 0 kB\nMemAvailable: {} kB\nBuffers: 0 kB\nCached: 0 kB\n",
            mem_total_kib, mem_available_kib
        ),
    )
    .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_buffer_clones_share_contents() {
        let buffer = SharedBuffer::new();
        let mut clone = buffer.clone();

        write!(clone, "hello").unwrap();

        assert_eq!(buffer.contents(), "hello");
    }

    #[test]
    fn test_broken_writer_always_fails() {
        assert!(BrokenWriter.write_all(b"x").is_err());
    }

    #[test]
    fn test_proc_fixture_parses() {
        let dir = tempfile::tempdir().unwrap();
        write_proc_fixture(dir.path(), 40, 100, 1000, 250);

        let source = crate::sampling::CounterSource::with_root(dir.path());
        let times = source.read_cpu_times().unwrap();
        assert_eq!(times.idle, 40);
        assert_eq!(times.total, 100);
        assert_eq!(source.read_memory_info().unwrap().used(), 750 * 1024);
    }
}
