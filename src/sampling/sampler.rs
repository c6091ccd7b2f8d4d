//! The periodic background sampler.
//!
//! Lifecycle: `Idle -> Baseline -> Running -> Stopped`. The sampler owns all
//! aggregate state; nothing else mutates it, and it is handed back to the
//! caller only when the sampler thread has exited.
//!
//! Cancellation is observed only while waiting for the next deadline. A tick
//! that has started always completes and counts.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{CmdprofError, Result};
use crate::format::format_bytes;
use crate::sink::LogSink;

use super::aggregate::Aggregates;
use super::counters::{CounterSource, CpuTimes, MemoryInfo};
use super::delta::CpuTracker;
use super::gpu::{GpuProbe, GpuReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Baseline,
    Running,
    Stopped,
}

/// Timing of the sampler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    /// Time between ticks.
    pub interval: Duration,
    /// Wait between the baseline snapshot and the first tick. Should be at
    /// least one interval so the first delta spans a full interval.
    pub warmup: Duration,
}

impl SamplerSettings {
    /// Warm-up guard added on top of one interval.
    pub const GUARD: Duration = Duration::from_millis(1);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            warmup: interval + Self::GUARD,
        }
    }
}

/// One tick's measurements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub mem_used: u64,
    pub mem_total: u64,
    pub gpu: GpuReading,
}

impl Sample {
    /// Sample line as written to the log. GPU appears only when a probe is present.
    pub fn render(&self, gpu_present: bool) -> String {
        let mut line = format!(
            "CPU:{:.2}% | Memory:{:.2}% ({}/{})",
            self.cpu_percent,
            self.mem_percent,
            format_bytes(self.mem_used),
            format_bytes(self.mem_total)
        );
        if gpu_present {
            match self.gpu.percent() {
                Some(percent) => line.push_str(&format!(" | GPU:{:.2}%", percent)),
                None => line.push_str(" | GPU:n/a"),
            }
        }
        line
    }
}

pub struct Sampler {
    source: CounterSource,
    tracker: CpuTracker,
    probe: Box<dyn GpuProbe>,
    sink: LogSink,
    settings: SamplerSettings,
    aggregates: Aggregates,
    last_cpu: f64,
    last_memory: MemoryInfo,
    state: Arc<Mutex<SamplerState>>,
}

impl Sampler {
    /// Creates an idle sampler whose first delta is taken against `baseline`.
    pub fn new(
        source: CounterSource,
        baseline: CpuTimes,
        probe: Box<dyn GpuProbe>,
        sink: LogSink,
        settings: SamplerSettings,
    ) -> Self {
        let gpu_present = probe.is_present();
        Self {
            source,
            tracker: CpuTracker::new(baseline),
            probe,
            sink,
            settings,
            aggregates: Aggregates::new(gpu_present),
            last_cpu: 0.0,
            last_memory: MemoryInfo::default(),
            state: Arc::new(Mutex::new(SamplerState::Idle)),
        }
    }

    pub fn state(&self) -> SamplerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn aggregates(&self) -> &Aggregates {
        &self.aggregates
    }

    fn set_state(&self, state: SamplerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Enters the baseline window and starts ticking on a background thread.
    pub fn start(self) -> Result<SamplerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let state = Arc::clone(&self.state);
        self.set_state(SamplerState::Baseline);

        let thread = thread::Builder::new()
            .name("cmdprof-sampler".into())
            .spawn(move || self.run(stop_rx))?;

        Ok(SamplerHandle {
            stop: stop_tx,
            thread,
            state,
        })
    }

    fn run(mut self, stop: Receiver<()>) -> Aggregates {
        let mut deadline = Instant::now() + self.settings.warmup;

        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match stop.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            if self.state() == SamplerState::Baseline {
                self.set_state(SamplerState::Running);
            }
            self.tick();

            deadline += self.settings.interval;
            let now = Instant::now();
            if deadline <= now {
                // Fell behind: drop the missed ticks instead of bursting.
                deadline = now + self.settings.interval;
            }
        }

        self.set_state(SamplerState::Stopped);
        log::debug!("sampler stopped after {} ticks", self.aggregates.ticks);
        self.aggregates
    }

    /// Takes one sample, folds it into the aggregates and logs it.
    ///
    /// A failed read degrades that metric to its last-known value (zero
    /// before the first success); the tick still counts.
    pub fn tick(&mut self) -> Sample {
        let cpu_percent = match self.source.read_cpu_times() {
            Ok(current) => match self.tracker.advance(current) {
                Some(usage) => {
                    self.last_cpu = usage * 100.0;
                    self.last_cpu
                }
                None => {
                    log::debug!("no CPU ticks elapsed, reusing {:.2}%", self.last_cpu);
                    self.aggregates.cpu_degraded += 1;
                    self.last_cpu
                }
            },
            Err(e) => {
                self.sink.warn(&format!("CPU sample failed: {}", e));
                self.aggregates.cpu_degraded += 1;
                self.last_cpu
            }
        };

        let memory = match self.source.read_memory_info() {
            Ok(info) => {
                self.last_memory = info;
                info
            }
            Err(e) => {
                self.sink.warn(&format!("Memory sample failed: {}", e));
                self.aggregates.memory_degraded += 1;
                self.last_memory
            }
        };

        let gpu = self.probe_gpu();

        let sample = Sample {
            cpu_percent,
            mem_percent: memory.used_percent(),
            mem_used: memory.used(),
            mem_total: memory.total,
            gpu,
        };

        self.aggregates.cpu.update(sample.cpu_percent);
        self.aggregates.memory.update(sample.mem_used);
        if let Some(percent) = sample.gpu.percent() {
            self.aggregates.gpu.update(percent);
        }
        self.aggregates.ticks += 1;

        let line = sample.render(self.aggregates.gpu_present);
        self.sink.tool_line(&line);
        sample
    }

    fn probe_gpu(&mut self) -> GpuReading {
        if !self.aggregates.gpu_present {
            return GpuReading::Unavailable;
        }

        let reading = match self.probe.probe() {
            Ok(reading) => reading,
            Err(e) => {
                self.sink.warn(&e.to_string());
                GpuReading::Unavailable
            }
        };
        match reading {
            GpuReading::Unavailable => self.aggregates.gpu_missed += 1,
            GpuReading::Utilization { failed, .. } if failed > 0 => {
                log::debug!("{} GPU device(s) reported no utilization", failed);
            }
            GpuReading::Utilization { .. } => {}
        }
        reading
    }
}

/// Handle to a running sampler. Stopping consumes it, so the stop signal
/// can only be sent once.
pub struct SamplerHandle {
    stop: Sender<()>,
    thread: JoinHandle<Aggregates>,
    state: Arc<Mutex<SamplerState>>,
}

impl SamplerHandle {
    pub fn state(&self) -> SamplerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signals the sampler to stop and waits for it to hand back its aggregates.
    pub fn stop(self) -> Result<Aggregates> {
        // A send error means the thread is already gone; join reports why.
        let _ = self.stop.send(());
        self.thread
            .join()
            .map_err(|_| CmdprofError::Sampler("sampler thread panicked".into()))
    }
}
