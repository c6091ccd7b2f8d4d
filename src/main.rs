//! cmdprof CLI entry point.
//!
//! Parses command-line arguments, loads the config and runs the profiler.

use clap::error::ErrorKind;
use clap::Parser;
use cmdprof::config::{load_config, Overrides};
use cmdprof::error::EXIT_USAGE;
use cmdprof::output::{print_error, print_warning};
use cmdprof::{Profiler, SignalHandler};
use std::path::PathBuf;

/// Environment variable holding the diagnostic log filter.
const LOG_ENV: &str = "CMDPROF_LOG";

#[derive(Parser, Debug)]
#[command(name = "cmdprof")]
#[command(
    version,
    about = "Run a command while sampling system CPU, memory and GPU usage",
    arg_required_else_help = true,
    after_help = "EXAMPLES:
    # Profile a build, sampling every 250ms
    cmdprof cargo build --release

    # Sample faster, skip the GPU and keep the terminal quiet
    cmdprof -i 100 --no-gpu --quiet ./train.sh --epochs 3

    # Also write the summary as JSON
    cmdprof --summary-json summary.json make test"
)]
struct Cli {
    /// Milliseconds between samples (minimum 100)
    #[arg(short, long, value_name = "MS")]
    interval: Option<u64>,

    /// Milliseconds of sampling before the command starts
    #[arg(short, long, value_name = "MS")]
    baseline: Option<u64>,

    /// Append the profile log to this file
    #[arg(short, long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Do not sample GPU utilization
    #[arg(long)]
    no_gpu: bool,

    /// Do not echo the command's output to the terminal
    #[arg(short, long)]
    quiet: bool,

    /// Also write the summary as JSON to this file
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,

    /// The command to run, followed by its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            interval_ms: self.interval,
            baseline_ms: self.baseline,
            log_path: self.log.clone(),
            no_gpu: self.no_gpu,
            quiet: self.quiet,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV, "warn")).init();

    let config = match load_config() {
        Ok(config) => config.apply(&cli.overrides()),
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(e.exit_code());
        }
    };

    let signals = SignalHandler::install().unwrap_or_else(|e| {
        print_warning(&format!("{}; Ctrl+C will stop the profiler too", e));
        SignalHandler::detached()
    });

    let profiler = Profiler::new(config, cli.command)
        .with_signals(signals)
        .with_summary_json(cli.summary_json);

    match profiler.run() {
        Ok(outcome) => std::process::exit(outcome.exit_code),
        Err(e) => {
            print_error(&e.to_string());
            std::process::exit(e.exit_code());
        }
    }
}
