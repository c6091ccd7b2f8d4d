//! Spawning the profiled command and translating how it ended.

use std::process::{Child, Command, ExitStatus, Stdio};

use crate::error::{CmdprofError, Result};

/// Offset shells add to a terminating signal number to form an exit code.
const SIGNAL_EXIT_BASE: i32 = 128;

/// Starts `command` with stdout and stderr piped; stdin is inherited.
pub fn spawn_piped(command: &[String]) -> Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| CmdprofError::Usage("no command given".into()))?;

    Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CmdprofError::Spawn {
            command: program.clone(),
            source,
        })
}

/// The exit code to mirror: the child's own code, or `128 + signal` when it
/// was killed by a signal.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    match terminating_signal(status) {
        Some(signal) => SIGNAL_EXIT_BASE + signal,
        None => 1,
    }
}

/// Human description for the log, e.g. `exit code 7` or `signal 9`.
pub fn describe_status(status: &ExitStatus) -> String {
    match (status.code(), terminating_signal(status)) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => format!("signal {}", signal),
        (None, None) => status.to_string(),
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// The command as typed, for banners.
pub fn command_line(command: &[String]) -> String {
    command.join(" ")
}
