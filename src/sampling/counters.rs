//! Raw counter snapshots read from the kernel's `/proc` accounting files.
//!
//! See `proc(5)`: the first line of `/proc/stat` holds cumulative CPU ticks
//! for all cores, `/proc/meminfo` holds `Label: value kB` pairs.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CmdprofError, Result};

/// Index of the idle column in the aggregate `cpu` line, label included.
const IDLE_FIELD: usize = 4;

const KIB: u64 = 1024;

/// Cumulative CPU tick totals since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Instantaneous memory counters, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub buffers: u64,
    pub cached: u64,
}

impl MemoryInfo {
    /// Memory in use: everything the kernel does not consider available.
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    /// Used memory as a percentage of total. Zero when total is unknown.
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used() as f64 / self.total as f64 * 100.0
    }
}

/// Locations of the two counter files.
///
/// Defaults to the live `/proc` tree; tests point it at fixture files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSource {
    stat_path: PathBuf,
    meminfo_path: PathBuf,
}

impl CounterSource {
    pub fn new(stat_path: impl Into<PathBuf>, meminfo_path: impl Into<PathBuf>) -> Self {
        Self {
            stat_path: stat_path.into(),
            meminfo_path: meminfo_path.into(),
        }
    }

    /// Counter files under a `/proc`-shaped directory.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(root.join("stat"), root.join("meminfo"))
    }

    pub fn stat_path(&self) -> &Path {
        &self.stat_path
    }

    pub fn meminfo_path(&self) -> &Path {
        &self.meminfo_path
    }

    /// Whether both counter files exist on this host.
    pub fn is_available(&self) -> bool {
        self.stat_path.is_file() && self.meminfo_path.is_file()
    }

    pub fn read_cpu_times(&self) -> Result<CpuTimes> {
        parse_cpu_times(&read_counter_file(&self.stat_path)?)
    }

    pub fn read_memory_info(&self) -> Result<MemoryInfo> {
        parse_memory_info(&read_counter_file(&self.meminfo_path)?)
    }
}

impl Default for CounterSource {
    fn default() -> Self {
        Self::with_root("/proc")
    }
}

fn read_counter_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| CmdprofError::CounterRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses the first (aggregate) record of `/proc/stat`.
///
/// Field 4 is idle ticks; total is the sum of every numeric field after the
/// label. A missing idle column or any non-numeric field is an error.
pub fn parse_cpu_times(content: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .next()
        .ok_or_else(|| CmdprofError::CounterParse("stat source is empty".into()))?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.first() {
        Some(label) if label.starts_with("cpu") => {}
        _ => {
            return Err(CmdprofError::CounterParse(format!(
                "first stat record is not a cpu line: {:?}",
                line
            )))
        }
    }
    if fields.len() <= IDLE_FIELD {
        return Err(CmdprofError::CounterParse(format!(
            "cpu line has {} fields, expected at least {}",
            fields.len(),
            IDLE_FIELD + 1
        )));
    }

    let mut times = CpuTimes::default();
    for (index, field) in fields.iter().enumerate().skip(1) {
        let value: u64 = field.parse().map_err(|_| {
            CmdprofError::CounterParse(format!("cpu field {} is not a number: {:?}", index, field))
        })?;
        if index == IDLE_FIELD {
            times.idle = value;
        }
        times.total = times
            .total
            .checked_add(value)
            .ok_or_else(|| CmdprofError::CounterParse("cpu tick total overflowed".into()))?;
    }

    Ok(times)
}

/// Parses `/proc/meminfo`, converting kibibyte values to bytes.
///
/// Unrecognised labels are skipped. `MemTotal` and `MemAvailable` are
/// required; the rest default to zero when absent.
pub fn parse_memory_info(content: &str) -> Result<MemoryInfo> {
    let mut info = MemoryInfo::default();
    let mut saw_total = false;
    let mut saw_available = false;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (Some(label), Some(raw)) = (fields.next(), fields.next()) else {
            continue;
        };

        let slot = match label {
            "MemTotal:" => {
                saw_total = true;
                &mut info.total
            }
            "MemFree:" => &mut info.free,
            "MemAvailable:" => {
                saw_available = true;
                &mut info.available
            }
            "Buffers:" => &mut info.buffers,
            "Cached:" => &mut info.cached,
            _ => continue,
        };

        let kib: u64 = raw.parse().map_err(|_| {
            CmdprofError::CounterParse(format!("meminfo {} is not a number: {:?}", label, raw))
        })?;
        *slot = kib.saturating_mul(KIB);
    }

    if !saw_total || !saw_available {
        return Err(CmdprofError::CounterParse(
            "meminfo is missing MemTotal or MemAvailable".into(),
        ));
    }

    Ok(info)
}
