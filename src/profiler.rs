//! Runs one profiled command from start to summary.
//!
//! The order is fixed: validate, open the log, read the baseline counters,
//! start the sampler, wait out the baseline window, spawn the command, drain
//! both of its streams, reap it, stop the sampler and write the report.
//! Anything that fails before the spawn aborts with a setup error; once the
//! command is running every failure is logged and the run still completes.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{CmdprofError, Result};
use crate::format::format_elapsed;
use crate::process::{
    command_line, describe_status, exit_code, spawn_piped, DrainReport, Multiplexer, StreamName,
};
use crate::report::Report;
use crate::sampling::{
    detect_probe, Aggregates, CounterSource, CpuTimes, GpuProbe, Sampler, SamplerHandle,
};
use crate::signal::SignalHandler;
use crate::sink::LogSink;

const RUN_SEPARATOR: &str = "==========================================";
const SUMMARY_SEPARATOR: &str = "------------------------------------------";
const FINISHED_BANNER: &str = "=============== FINISHED ================";

/// Granularity at which the baseline wait notices Ctrl+C.
const BASELINE_POLL: Duration = Duration::from_millis(50);

/// How a completed run ended.
#[derive(Debug)]
pub struct RunOutcome {
    /// The exit code the tool should terminate with.
    pub exit_code: i32,
    pub status: ExitStatus,
    pub report: Report,
    pub streams: Vec<DrainReport>,
    pub interrupted: bool,
}

/// Profiles a single command.
pub struct Profiler {
    config: Config,
    command: Vec<String>,
    source: CounterSource,
    probe: Option<Box<dyn GpuProbe>>,
    signals: SignalHandler,
    summary_json: Option<PathBuf>,
}

impl Profiler {
    pub fn new(config: Config, command: Vec<String>) -> Self {
        Self {
            config,
            command,
            source: CounterSource::default(),
            probe: None,
            signals: SignalHandler::detached(),
            summary_json: None,
        }
    }

    /// Reads counters from somewhere other than `/proc`.
    pub fn with_counter_source(mut self, source: CounterSource) -> Self {
        self.source = source;
        self
    }

    /// Uses `probe` instead of looking for `nvidia-smi`.
    pub fn with_gpu_probe(mut self, probe: Box<dyn GpuProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_signals(mut self, signals: SignalHandler) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_summary_json(mut self, path: Option<PathBuf>) -> Self {
        self.summary_json = path;
        self
    }

    /// Runs the command under the profiler.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures before the command started: bad
    /// arguments or configuration, an unsupported platform, an unopenable
    /// log, unreadable baseline counters, or a failed spawn. A command that
    /// exits non-zero is a successful run whose `exit_code` says so.
    pub fn run(self) -> Result<RunOutcome> {
        if self.command.is_empty() {
            return Err(CmdprofError::Usage("no command given".into()));
        }
        ensure_supported_platform(&self.source)?;
        self.config.validate()?;

        let sink = LogSink::open(&self.config.log_path)?;
        let display = command_line(&self.command);
        sink.blank_line();
        sink.tool_line(RUN_SEPARATOR);
        sink.tool_line(&format!("Starting command: {}", display));

        let baseline = match read_baseline(&self.source) {
            Ok(baseline) => baseline,
            Err(e) => {
                sink.tool_line(&format!("Failed to read baseline counters: {}", e));
                return Err(e);
            }
        };

        let probe = self.probe.unwrap_or_else(|| detect_probe(self.config.gpu));
        if !probe.is_present() {
            log::info!("no GPU probe available, GPU utilization is not sampled");
        }
        let sampler = Sampler::new(
            self.source.clone(),
            baseline,
            probe,
            sink.clone(),
            self.config.sampler_settings(),
        )
        .start()?;

        sink.tool_line("Collecting baseline...");
        if !wait_baseline(self.config.baseline_window(), &self.signals) {
            sink.tool_line("Interrupted before the command started");
            stop_sampler(sampler, &sink);
            return Err(CmdprofError::Interrupted);
        }

        let started = Instant::now();
        let mut child = match spawn_piped(&self.command) {
            Ok(child) => child,
            Err(e) => {
                sink.tool_line(&e.to_string());
                stop_sampler(sampler, &sink);
                return Err(e);
            }
        };
        sink.tool_line("Started command!");
        log::debug!("spawned pid {}", child.id());

        let mut mux = Multiplexer::new();
        let attached = attach_readers(&mut mux, &mut child, self.config.mirror, &sink);
        let streams = match attached {
            Ok(()) => mux.join(),
            Err(e) => abandon_output(&mut child, mux, &e, &sink),
        };

        let status = match child.wait() {
            Ok(status) => status,
            Err(e) => {
                sink.tool_line(&format!("Failed to wait for command: {}", e));
                stop_sampler(sampler, &sink);
                return Err(e.into());
            }
        };
        let elapsed = started.elapsed();

        let aggregates = stop_sampler(sampler, &sink);
        let code = exit_code(&status);
        let report = Report::new(&display, code, elapsed, &aggregates);
        let interrupted = self.signals.was_interrupted();

        let status_text = describe_status(&status);
        sink.tool_line(SUMMARY_SEPARATOR);
        sink.tool_line(&format!(
            "Finished command: {} ({}) after {}",
            display,
            status_text,
            format_elapsed(elapsed)
        ));
        if !status.success() {
            sink.tool_line(&format!("Command execution failed with {}", status_text));
        }
        for line in report.lines() {
            sink.tool_line(&line);
        }
        if interrupted {
            sink.tool_line("Interrupted by user");
        }
        sink.tool_line(FINISHED_BANNER);

        if let Some(path) = &self.summary_json {
            if let Err(e) = report.write_json(path) {
                sink.warn(&format!("Failed to write summary to {:?}: {}", path, e));
            }
        }

        Ok(RunOutcome {
            exit_code: code,
            status,
            report,
            streams,
            interrupted,
        })
    }
}

#[cfg(target_os = "linux")]
fn ensure_supported_platform(source: &CounterSource) -> Result<()> {
    if source.is_available() {
        Ok(())
    } else {
        Err(CmdprofError::UnsupportedPlatform(format!(
            "{} and {} are required",
            source.stat_path().display(),
            source.meminfo_path().display()
        )))
    }
}

#[cfg(not(target_os = "linux"))]
fn ensure_supported_platform(_source: &CounterSource) -> Result<()> {
    let os = std::env::consts::OS;
    Err(CmdprofError::UnsupportedPlatform(os.to_string()))
}

/// The first CPU snapshot. Memory is read too so an unreadable meminfo
/// fails before the command starts rather than degrading every tick.
fn read_baseline(source: &CounterSource) -> Result<CpuTimes> {
    let times = source.read_cpu_times()?;
    source.read_memory_info()?;
    Ok(times)
}

/// Sleeps through the baseline window. Returns `false` if Ctrl+C arrived.
fn wait_baseline(window: Duration, signals: &SignalHandler) -> bool {
    let deadline = Instant::now() + window;
    loop {
        if signals.was_interrupted() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(BASELINE_POLL));
    }
}

/// Starts one reader per captured stream. On failure the readers already
/// attached stay in `mux` so they can still be joined.
fn attach_readers(
    mux: &mut Multiplexer,
    child: &mut Child,
    mirror: bool,
    sink: &LogSink,
) -> Result<()> {
    if let Some(stdout) = child.stdout.take() {
        let out = mirror.then(|| Box::new(io::stdout()) as Box<dyn Write + Send>);
        mux.attach(stdout, StreamName::Stdout, out, sink.clone())?;
    }
    if let Some(stderr) = child.stderr.take() {
        let err = mirror.then(|| Box::new(io::stderr()) as Box<dyn Write + Send>);
        mux.attach(stderr, StreamName::Stderr, err, sink.clone())?;
    }
    Ok(())
}

/// Kills a command whose output cannot be fully captured, then joins the
/// readers that did start. Killing closes the pipes so they reach EOF.
fn abandon_output(
    child: &mut Child,
    mux: Multiplexer,
    error: &CmdprofError,
    sink: &LogSink,
) -> Vec<DrainReport> {
    sink.warn(&format!("Failed to read command output: {}", error));
    if let Err(e) = child.kill() {
        sink.warn(&format!("Failed to kill command: {}", e));
    }
    mux.join()
}

/// Stops the sampler, falling back to empty aggregates if its thread died.
fn stop_sampler(sampler: SamplerHandle, sink: &LogSink) -> Aggregates {
    match sampler.stop() {
        Ok(aggregates) => aggregates,
        Err(e) => {
            sink.warn(&e.to_string());
            Aggregates::new(false)
        }
    }
}
