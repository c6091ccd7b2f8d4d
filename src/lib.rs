pub mod config;
pub mod error;
pub mod format;
pub mod output;
pub mod process;
pub mod profiler;
pub mod report;
pub mod sampling;
pub mod signal;
pub mod sink;

#[cfg(test)]
mod test_utils;

pub use config::{Config, Overrides};
pub use error::{CmdprofError, Result};
pub use profiler::{Profiler, RunOutcome};
pub use report::Report;
pub use signal::SignalHandler;
pub use sink::LogSink;
