//! Synthetic CPU and memory load generator.
//!
//! One hashing worker per core, an allocation worker that retains fixed-size
//! blocks up to a ceiling, and a memory bandwidth sampler, all gated by a
//! shared [`clock::ClockGate`]. [`system_stress::SystemStress`] drives a run
//! and exposes the live counters.

pub mod bandwidth;
pub mod blocks;
pub mod clock;
pub mod config;
pub mod cpu_stress;
pub mod error;
pub mod memory_stress;
pub mod report;
pub mod system_stress;
pub mod thread_manager;
pub mod token;

pub use clock::ClockGate;
pub use config::{Preset, StressConfig};
pub use error::{Result, StressError};
pub use report::RunSummary;
pub use system_stress::{Metrics, Phase, SystemStress};
