//! Run configuration and named presets.

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StressError};

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;
pub const GIB: usize = 1024 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// 30 s, 2 GiB ceiling, bandwidth sampling on.
    #[default]
    Standard,
    /// 15 GiB ceiling and no bandwidth sampler.
    Heavy,
    /// Standard plus the elastic worker pool controller.
    Elastic,
    /// A few seconds and a few MiB. Meant for tests and CI.
    Smoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuConfig {
    /// Hash operations between two checks of the outer loop condition.
    pub batch_size: u32,
    /// Operations accumulated locally before one atomic flush.
    pub chunk_size: u32,
    /// Smallest exponent handed to the stress hash.
    pub exponent_floor: u64,
    /// The batch index is reduced modulo this before being added to the floor.
    pub exponent_span: u64,
    /// Worker ids are reduced modulo this to scale the exponent.
    pub thread_spread: u64,
    pub modulus: u64,
    pub elastic: Option<ElasticConfig>,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            batch_size: 4500,
            chunk_size: 1,
            exponent_floor: 500,
            exponent_span: 2000,
            thread_spread: 10,
            modulus: 1_000_012_347,
            elastic: None,
        }
    }
}

/// Thresholds for the elastic pool controller.
///
/// The load it compares against is a throughput proxy, `ops per ms / calibration`
/// clamped to `[0, 1]`, not OS CPU utilization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElasticConfig {
    pub interval: Duration,
    pub high_water: f32,
    pub low_water: f32,
    pub calibration: f32,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            high_water: 0.75,
            low_water: 0.25,
            calibration: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub base_unit: usize,
    pub multiplier: usize,
    pub block_size: usize,
    /// Value written into every word of a fresh block.
    pub fill_pattern: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_unit: GIB,
            multiplier: 2,
            block_size: MIB,
            fill_pattern: 1,
        }
    }
}

impl MemoryConfig {
    pub fn target_bytes(&self) -> usize {
        self.base_unit.saturating_mul(self.multiplier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandwidthConfig {
    pub buffer_size: usize,
    /// Sub-samples averaged into one published figure.
    pub iterations: u32,
    /// Bytes between touched addresses; one cache line by default.
    pub stride: usize,
    pub cycle_interval: Duration,
    pub iteration_pause: Duration,
    /// Measurements at or above this many MB/s are discarded.
    pub ceiling_mbps: f64,
    pub random_weight: f64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * MIB,
            iterations: 5,
            stride: 64,
            cycle_interval: Duration::from_secs(2),
            iteration_pause: Duration::from_millis(100),
            ceiling_mbps: 1_000_000.0,
            random_weight: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressConfig {
    pub duration: Duration,
    pub cpu: CpuConfig,
    pub memory: MemoryConfig,
    pub bandwidth: Option<BandwidthConfig>,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self::preset(Preset::Standard)
    }
}

impl StressConfig {
    pub fn preset(preset: Preset) -> Self {
        let standard = Self {
            duration: Duration::from_secs(30),
            cpu: CpuConfig::default(),
            memory: MemoryConfig::default(),
            bandwidth: Some(BandwidthConfig::default()),
        };

        match preset {
            Preset::Standard => standard,
            Preset::Heavy => Self {
                memory: MemoryConfig {
                    multiplier: 15,
                    ..standard.memory
                },
                bandwidth: None,
                ..standard
            },
            Preset::Elastic => Self {
                cpu: CpuConfig {
                    elastic: Some(ElasticConfig::default()),
                    ..standard.cpu
                },
                ..standard
            },
            Preset::Smoke => Self {
                duration: Duration::from_secs(3),
                cpu: CpuConfig {
                    batch_size: 256,
                    chunk_size: 4,
                    exponent_floor: 20,
                    exponent_span: 100,
                    thread_spread: 2,
                    ..standard.cpu
                },
                memory: MemoryConfig {
                    base_unit: 64 * MIB,
                    multiplier: 1,
                    ..standard.memory
                },
                bandwidth: Some(BandwidthConfig {
                    buffer_size: 8 * MIB,
                    iterations: 3,
                    cycle_interval: Duration::from_millis(200),
                    iteration_pause: Duration::from_millis(10),
                    ..BandwidthConfig::default()
                }),
            },
        }
    }

    pub fn target_memory(&self) -> usize {
        self.memory.target_bytes()
    }

    /// Scratch bytes held back from the allocation ceiling for the bandwidth buffer.
    pub fn reserved_scratch(&self) -> usize {
        self.bandwidth.map_or(0, |bw| bw.buffer_size)
    }

    /// Most bytes the allocation workload may retain.
    pub fn allocation_limit(&self) -> usize {
        self.target_memory().saturating_sub(self.reserved_scratch())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| -> Result<()> { Err(StressError::Config(msg.to_string())) };

        if self.duration.is_zero() {
            return fail("duration must be non-zero");
        }
        if self.cpu.batch_size == 0 || self.cpu.chunk_size == 0 {
            return fail("batch and chunk sizes must be non-zero");
        }
        if self.cpu.exponent_span == 0 || self.cpu.thread_spread == 0 || self.cpu.modulus == 0 {
            return fail("exponent span, thread spread and modulus must be non-zero");
        }
        if let Some(elastic) = self.cpu.elastic {
            if !(0.0..=1.0).contains(&elastic.low_water)
                || !(0.0..=1.0).contains(&elastic.high_water)
                || elastic.low_water >= elastic.high_water
            {
                return fail("elastic water marks must satisfy 0 <= low < high <= 1");
            }
            if elastic.calibration <= 0.0 {
                return fail("elastic calibration must be positive");
            }
        }
        if self.memory.block_size == 0 || self.memory.block_size % std::mem::size_of::<u32>() != 0 {
            return fail("block size must be a non-zero multiple of 4 bytes");
        }
        if self.target_memory() == 0 {
            return fail("memory target must be non-zero");
        }
        if let Some(bw) = self.bandwidth {
            if bw.stride == 0 || bw.buffer_size < bw.stride {
                return fail("bandwidth buffer must hold at least one stride");
            }
            if bw.iterations == 0 {
                return fail("bandwidth iterations must be non-zero");
            }
            if bw.buffer_size >= self.target_memory() {
                return fail("bandwidth buffer must be smaller than the memory target");
            }
        }
        Ok(())
    }
}
