//! SIGINT handling while a profiled command runs.
//!
//! The command shares the terminal's process group, so Ctrl+C reaches it
//! directly. The profiler itself must not die with it: it still has to drain
//! the remaining output and write the summary. This module swallows SIGINT
//! for the profiler and records that it happened.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{CmdprofError, Result};

/// Counts SIGINTs received by the profiler.
///
/// Cloning shares the counter. Only one handler can be registered per
/// process; [`SignalHandler::detached`] gives a handler that never fires,
/// for embedding and tests.
#[derive(Clone, Debug, Default)]
pub struct SignalHandler {
    interrupts: Arc<AtomicUsize>,
}

impl SignalHandler {
    /// Registers the process-wide SIGINT handler.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler is already registered or the OS refuses.
    pub fn install() -> Result<Self> {
        let handler = Self::detached();
        let counter = Arc::clone(&handler.interrupts);

        ctrlc::set_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .map_err(|e| CmdprofError::Signal(e.to_string()))?;

        Ok(handler)
    }

    /// A handler not connected to any signal.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupts() > 0
    }

    #[cfg(test)]
    pub(crate) fn simulate_interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_detached_handler_starts_clean() {
        let handler = SignalHandler::detached();
        assert_eq!(handler.interrupts(), 0);
        assert!(!handler.was_interrupted());
    }

    #[test]
    fn test_interrupts_accumulate() {
        let handler = SignalHandler::detached();

        handler.simulate_interrupt();
        handler.simulate_interrupt();

        assert_eq!(handler.interrupts(), 2);
        assert!(handler.was_interrupted());
    }

    #[test]
    fn test_clones_share_counter_across_threads() {
        let handler = SignalHandler::detached();
        let clone = handler.clone();

        thread::spawn(move || clone.simulate_interrupt())
            .join()
            .unwrap();

        assert!(handler.was_interrupted());
    }
}
