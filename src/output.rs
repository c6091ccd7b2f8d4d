//! Terminal messages from the profiler itself.
//!
//! Everything here goes to stderr: stdout belongs to the mirrored command.

use std::io::{self, IsTerminal};

// ANSI color codes
pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const YELLOW: &str = "\x1b[33m";
pub const RED: &str = "\x1b[31m";

fn colors_enabled() -> bool {
    io::stderr().is_terminal()
}

fn paint(color: &str, text: &str, enabled: bool) -> String {
    if enabled {
        format!("{color}{BOLD}{text}{RESET}")
    } else {
        text.to_string()
    }
}

pub fn format_error(msg: &str, colored: bool) -> String {
    format!("[cmdprof] {} {}", paint(RED, "Error:", colored), msg)
}

pub fn format_warning(msg: &str, colored: bool) -> String {
    format!("[cmdprof] {} {}", paint(YELLOW, "Warning:", colored), msg)
}

pub fn print_error(msg: &str) {
    eprintln!("{}", format_error(msg, colors_enabled()));
}

pub fn print_warning(msg: &str) {
    eprintln!("{}", format_warning(msg, colors_enabled()));
}
