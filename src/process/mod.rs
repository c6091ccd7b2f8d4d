//! Child process management.
//!
//! This module spawns the profiled command with piped output streams and
//! multiplexes those streams into the terminal and the profile log.

mod child;
mod multiplexer;

pub use child::{command_line, describe_status, exit_code, spawn_piped};
pub use multiplexer::{drain, DrainReport, Multiplexer, OutputLine, StreamName};
