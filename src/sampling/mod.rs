//! System-wide resource sampling.
//!
//! Counter snapshots come from `/proc`, CPU utilization is derived from
//! consecutive snapshots, GPU utilization from an optional external probe.
//! The [`Sampler`] ties these together on a background thread and owns the
//! running [`Aggregates`].

pub mod aggregate;
pub mod counters;
pub mod delta;
pub mod gpu;
mod sampler;

pub use aggregate::{Aggregates, RunningAggregate, Summary};
pub use counters::{CounterSource, CpuTimes, MemoryInfo};
pub use delta::{cpu_utilization, CpuTracker};
pub use gpu::{detect_probe, GpuProbe, GpuReading, NoGpu, NvidiaSmi};
pub use sampler::{Sample, Sampler, SamplerHandle, SamplerSettings, SamplerState};
