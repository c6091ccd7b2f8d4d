use crate::error::{CmdprofError, Result};
use crate::sampling::SamplerSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The base config directory name under ~/.config/
const CONFIG_DIR_NAME: &str = "cmdprof";

const CONFIG_FILE_NAME: &str = "config.toml";

/// Shortest tick interval accepted. Kernel tick counters advance every
/// 10ms on common configurations; anything near that yields empty deltas.
pub const MIN_INTERVAL_MS: u64 = 100;

/// Documented defaults, as a user would write them.
pub const DEFAULT_CONFIG_WITH_COMMENTS: &str = r#"# cmdprof configuration
# Command-line flags take precedence over values in this file.

# Milliseconds between samples (minimum 100)
interval_ms = 250

# Milliseconds of idle sampling before the command starts
baseline_ms = 1000

# Append-only log file, relative to the working directory
log_path = "cmdprof.log"

# Sample GPU utilization when nvidia-smi is installed
gpu = true

# Echo the command's output to the terminal
mirror = true
"#;

// ============================================================================
// Profiler Configuration
// ============================================================================

/// Settings for one profiling run.
///
/// Missing fields in a config file fall back to their defaults, so partial
/// files work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Milliseconds between sampler ticks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Milliseconds of sampling before the command is started, on top of
    /// the sampler's own warm-up.
    #[serde(default = "default_baseline_ms")]
    pub baseline_ms: u64,

    /// Where the profile log is appended.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Whether to look for a GPU probe at all.
    #[serde(default = "default_true")]
    pub gpu: bool,

    /// Whether child output is echoed to the terminal.
    #[serde(default = "default_true")]
    pub mirror: bool,
}

fn default_interval_ms() -> u64 {
    250
}

fn default_baseline_ms() -> u64 {
    1000
}

fn default_log_path() -> PathBuf {
    PathBuf::from("cmdprof.log")
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            baseline_ms: default_baseline_ms(),
            log_path: default_log_path(),
            gpu: true,
            mirror: true,
        }
    }
}

/// Values given on the command line. `None` keeps the configured value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub interval_ms: Option<u64>,
    pub baseline_ms: Option<u64>,
    pub log_path: Option<PathBuf>,
    pub no_gpu: bool,
    pub quiet: bool,
}

impl Config {
    pub fn apply(mut self, overrides: &Overrides) -> Self {
        if let Some(interval) = overrides.interval_ms {
            self.interval_ms = interval;
        }
        if let Some(baseline) = overrides.baseline_ms {
            self.baseline_ms = baseline;
        }
        if let Some(path) = &overrides.log_path {
            self.log_path = path.clone();
        }
        if overrides.no_gpu {
            self.gpu = false;
        }
        if overrides.quiet {
            self.mirror = false;
        }
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// How long the coordinator waits between starting the sampler and
    /// spawning the command.
    pub fn baseline_window(&self) -> Duration {
        Duration::from_millis(self.baseline_ms) + self.interval() + SamplerSettings::GUARD
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings::new(self.interval())
    }

    /// Validates the configuration for consistency.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(ConfigError::IntervalTooShort(self.interval_ms));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyLogPath);
        }
        Ok(())
    }
}

// ============================================================================
// Config Validation
// ============================================================================

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The tick interval is below [`MIN_INTERVAL_MS`].
    IntervalTooShort(u64),
    /// The log path is empty.
    EmptyLogPath,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IntervalTooShort(ms) => write!(
                f,
                "Sampling interval of {}ms is too short; use at least {}ms.",
                ms, MIN_INTERVAL_MS
            ),
            ConfigError::EmptyLogPath => write!(f, "Log path must not be empty."),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for CmdprofError {
    fn from(e: ConfigError) -> Self {
        CmdprofError::Config(e.to_string())
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Get the cmdprof config directory path (~/.config/cmdprof/).
///
/// Returns the path to the config directory. Does not create the directory.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CmdprofError::Config("Could not determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads `~/.config/cmdprof/config.toml`, or defaults when it does not exist
/// or no home directory is known.
pub fn load_config() -> Result<Config> {
    match config_path() {
        Ok(path) => load_config_from(&path),
        Err(_) => Ok(Config::default()),
    }
}

/// Loads the config file at `path`. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        CmdprofError::Config(format!("Failed to parse config file at {:?}: {}", path, e))
    })
}
