//! CPU utilization from pairs of cumulative tick snapshots.

use super::counters::CpuTimes;

/// Fraction of non-idle ticks between two snapshots, in `[0, 1]`.
///
/// Returns `None` when no tick elapsed between the snapshots or when either
/// counter went backwards; the caller decides what to record instead.
pub fn cpu_utilization(prev: &CpuTimes, curr: &CpuTimes) -> Option<f64> {
    let delta_total = curr.total.checked_sub(prev.total)?;
    let delta_idle = curr.idle.checked_sub(prev.idle)?;
    if delta_total == 0 {
        return None;
    }

    let usage = 1.0 - delta_idle as f64 / delta_total as f64;
    Some(usage.clamp(0.0, 1.0))
}

/// Keeps the previous snapshot so each one is consumed exactly once.
#[derive(Debug, Clone)]
pub struct CpuTracker {
    previous: CpuTimes,
}

impl CpuTracker {
    pub fn new(baseline: CpuTimes) -> Self {
        Self { previous: baseline }
    }

    pub fn previous(&self) -> CpuTimes {
        self.previous
    }

    /// Computes utilization against the retained snapshot, then retains `current`.
    pub fn advance(&mut self, current: CpuTimes) -> Option<f64> {
        let usage = cpu_utilization(&self.previous, &current);
        self.previous = current;
        usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(idle: u64, total: u64) -> CpuTimes {
        CpuTimes { idle, total }
    }

    #[test]
    fn test_cpu_utilization_half_busy() {
        let usage = cpu_utilization(&times(100, 1000), &times(150, 1100)).unwrap();
        assert!((usage - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cpu_utilization_fully_idle_and_fully_busy() {
        assert_eq!(cpu_utilization(&times(0, 0), &times(100, 100)), Some(0.0));
        assert_eq!(cpu_utilization(&times(0, 0), &times(0, 100)), Some(1.0));
    }

    #[test]
    fn test_cpu_utilization_no_elapsed_ticks_is_rejected() {
        assert_eq!(cpu_utilization(&times(10, 100), &times(10, 100)), None);
    }

    #[test]
    fn test_cpu_utilization_counter_reset_is_rejected() {
        assert_eq!(cpu_utilization(&times(10, 100), &times(5, 200)), None);
        assert_eq!(cpu_utilization(&times(10, 100), &times(20, 50)), None);
    }

    #[test]
    fn test_cpu_utilization_stays_in_unit_range() {
        let prev = times(1_000, 10_000);
        for idle_step in [0u64, 1, 7, 50, 99, 100] {
            let curr = times(prev.idle + idle_step, prev.total + 100);
            let usage = cpu_utilization(&prev, &curr).unwrap();
            assert!((0.0..=1.0).contains(&usage), "usage {} out of range", usage);
        }
    }

    #[test]
    fn test_cpu_utilization_more_idle_means_lower_usage() {
        let prev = times(1_000, 10_000);
        let mut last = f64::INFINITY;
        for idle_step in [0u64, 25, 50, 75, 100] {
            let usage = cpu_utilization(&prev, &times(1_000 + idle_step, 10_100)).unwrap();
            assert!(usage < last);
            last = usage;
        }
    }

    #[test]
    fn test_tracker_replaces_previous_after_each_advance() {
        let mut tracker = CpuTracker::new(times(0, 0));

        assert_eq!(tracker.advance(times(50, 100)), Some(0.5));
        assert_eq!(tracker.previous(), times(50, 100));

        // The second delta spans only the second interval.
        assert_eq!(tracker.advance(times(150, 200)), Some(0.0));
    }

    #[test]
    fn test_tracker_rejected_sample_still_moves_forward() {
        let mut tracker = CpuTracker::new(times(10, 100));

        assert_eq!(tracker.advance(times(10, 100)), None);
        assert_eq!(tracker.advance(times(10, 200)), Some(1.0));
    }
}
