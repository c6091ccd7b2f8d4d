//! The aggregate report printed once at the end of a run.

use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::format::{format_bytes, format_elapsed};
use crate::sampling::{Aggregates, Summary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Degraded {
    pub cpu: u64,
    pub memory: u64,
    pub gpu_missed: u64,
}

/// Final min/max/range/average per metric plus run metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub command: String,
    pub exit_code: i32,
    pub elapsed_secs: f64,
    pub ticks: u64,
    pub cpu: Option<Summary<f64>>,
    pub memory: Option<Summary<u64>>,
    /// Outer `None`: no GPU probe this run, omitted from output entirely.
    /// Inner `None`: probe present but never produced a reading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<Option<Summary<f64>>>,
    pub degraded: Degraded,
    #[serde(skip)]
    elapsed: Duration,
}

impl Report {
    pub fn new(command: &str, exit_code: i32, elapsed: Duration, aggregates: &Aggregates) -> Self {
        Self {
            command: command.to_string(),
            exit_code,
            elapsed_secs: elapsed.as_secs_f64(),
            ticks: aggregates.ticks,
            cpu: aggregates.cpu.finalize(),
            memory: aggregates.memory.finalize(),
            gpu: aggregates.gpu_present.then(|| aggregates.gpu.finalize()),
            degraded: Degraded {
                cpu: aggregates.cpu_degraded,
                memory: aggregates.memory_degraded,
                gpu_missed: aggregates.gpu_missed,
            },
            elapsed,
        }
    }

    /// Report lines in log order.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            percent_line("CPU", self.cpu.as_ref()),
            memory_line(self.memory.as_ref()),
        ];
        if let Some(gpu) = &self.gpu {
            lines.push(percent_line("GPU", gpu.as_ref()));
        }
        lines.push(self.ticks_line());
        let elapsed = format_elapsed(self.elapsed);
        lines.push(format!("Total Execution Time: {}", elapsed));
        lines
    }

    fn ticks_line(&self) -> String {
        let mut line = format!("Ticks: {}", self.ticks);
        if self.degraded.cpu > 0 || self.degraded.memory > 0 {
            line.push_str(&format!(
                " (degraded CPU: {}, memory: {})",
                self.degraded.cpu, self.degraded.memory
            ));
        }
        if self.gpu.is_some() && self.degraded.gpu_missed > 0 {
            line.push_str(&format!(" (GPU missed: {})", self.degraded.gpu_missed));
        }
        line
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()? + "\n")?;
        Ok(())
    }
}

fn percent_line(label: &str, summary: Option<&Summary<f64>>) -> String {
    match summary {
        Some(s) => format!(
            "{} (min: {:.2}%, max: {:.2}%, range: {:.2}%, avg: {:.2}%)",
            label, s.min, s.max, s.range, s.avg
        ),
        None => format!("{} (no data)", label),
    }
}

fn memory_line(summary: Option<&Summary<u64>>) -> String {
    match summary {
        Some(s) => format!(
            "Memory (min: {}, max: {}, range: {}, avg: {})",
            format_bytes(s.min),
            format_bytes(s.max),
            format_bytes(s.range),
            format_bytes(s.avg)
        ),
        None => "Memory (no data)".to_string(),
    }
}
