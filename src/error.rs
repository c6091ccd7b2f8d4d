use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when the tool itself fails before the child ever ran.
pub const EXIT_SETUP_FAILURE: i32 = 125;

/// Exit code for usage errors, including an explicit help request.
pub const EXIT_USAGE: i32 = 2;

/// Exit code when Ctrl+C arrives before the command was started.
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Error, Debug)]
pub enum CmdprofError {
    #[error("Unsupported operating system: {0}")]
    UnsupportedPlatform(String),

    #[error("{0}")]
    Usage(String),

    #[error("Failed to open log file {path:?}: {source}")]
    LogOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path:?}: {source}")]
    CounterRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse counters: {0}")]
    CounterParse(String),

    #[error("GPU probe failed: {0}")]
    Probe(String),

    #[error("Failed to start command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sampler failed: {0}")]
    Sampler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interrupted before the command started")]
    Interrupted,

    #[error("Failed to install signal handler: {0}")]
    Signal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CmdprofError {
    /// The process exit code this error terminates the tool with.
    pub fn exit_code(&self) -> i32 {
        match self {
            CmdprofError::Usage(_) => EXIT_USAGE,
            CmdprofError::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_SETUP_FAILURE,
        }
    }
}

pub type Result<T> = std::result::Result<T, CmdprofError>;
