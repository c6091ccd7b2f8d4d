//! Running min/max/sum/count accumulators, one per sampled metric.

use serde::Serialize;
use std::fmt;

/// A value type that can be accumulated into a [`RunningAggregate`].
pub trait Accumulate: Copy + PartialOrd + fmt::Debug {
    /// Sum type wide enough to never overflow in practice.
    type Total: Copy + Default + PartialEq + fmt::Debug;

    fn add(total: Self::Total, value: Self) -> Self::Total;

    /// `total / count`. Only called with `count > 0`.
    fn mean(total: Self::Total, count: u64) -> Self;

    /// `max - min`.
    fn span(min: Self, max: Self) -> Self;
}

impl Accumulate for f64 {
    type Total = f64;

    fn add(total: f64, value: f64) -> f64 {
        total + value
    }

    fn mean(total: f64, count: u64) -> f64 {
        total / count as f64
    }

    fn span(min: f64, max: f64) -> f64 {
        max - min
    }
}

impl Accumulate for u64 {
    type Total = u128;

    fn add(total: u128, value: u64) -> u128 {
        total + u128::from(value)
    }

    fn mean(total: u128, count: u64) -> u64 {
        // The mean of u64 values always fits back into u64.
        (total / u128::from(count)) as u64
    }

    fn span(min: u64, max: u64) -> u64 {
        max - min
    }
}

/// Min/max/sum/count over every observed value.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningAggregate<T: Accumulate> {
    bounds: Option<(T, T)>,
    sum: T::Total,
    count: u64,
}

/// Final statistics of a non-empty aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary<T> {
    pub min: T,
    pub max: T,
    pub range: T,
    pub avg: T,
    pub count: u64,
}

impl<T: Accumulate> RunningAggregate<T> {
    pub fn new() -> Self {
        Self {
            bounds: None,
            sum: T::Total::default(),
            count: 0,
        }
    }

    pub fn update(&mut self, value: T) {
        self.bounds = match self.bounds {
            None => Some((value, value)),
            Some((min, max)) => Some((
                if value < min { value } else { min },
                if value > max { value } else { max },
            )),
        };
        self.sum = T::add(self.sum, value);
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn sum(&self) -> T::Total {
        self.sum
    }

    /// Min/max/range/average, or `None` when nothing was observed.
    pub fn finalize(&self) -> Option<Summary<T>> {
        let (min, max) = self.bounds?;
        Some(Summary {
            min,
            max,
            range: T::span(min, max),
            avg: T::mean(self.sum, self.count),
            count: self.count,
        })
    }
}

impl<T: Accumulate> Default for RunningAggregate<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every aggregate the sampler maintains over one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    /// CPU utilization in percent.
    pub cpu: RunningAggregate<f64>,
    /// Used memory in bytes.
    pub memory: RunningAggregate<u64>,
    /// Mean GPU utilization in percent; only fed when a reading exists.
    pub gpu: RunningAggregate<f64>,
    /// Whether a GPU probe was present for this run.
    pub gpu_present: bool,
    /// Completed ticks.
    pub ticks: u64,
    /// Ticks whose CPU value was carried over from the previous tick.
    pub cpu_degraded: u64,
    /// Ticks whose memory value was carried over from the previous tick.
    pub memory_degraded: u64,
    /// Ticks where the GPU probe was present but produced no reading.
    pub gpu_missed: u64,
}

impl Aggregates {
    pub fn new(gpu_present: bool) -> Self {
        Self {
            gpu_present,
            ..Self::default()
        }
    }
}
