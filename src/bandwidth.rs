//! Memory bandwidth sampler.
//!
//! Each cycle runs a few sub-samples over a scratch buffer. A sub-sample is the
//! best of a sequential read, a sequential write and a weighted random-access
//! pass; implausible figures are dropped and the rest averaged.

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rand::seq::SliceRandom;
use tracing::{debug, error};

use crate::config::{BandwidthConfig, MIB};
use crate::error::{Result, StressError};
use crate::token::StopToken;

/// `f64` published through an `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

fn mib_per_second(bytes: usize, started: Instant) -> f64 {
    let seconds = started.elapsed().as_nanos() as f64 / 1e9;
    (bytes as f64 / MIB as f64) / seconds
}

/// Reads one byte per stride. Every cache line of the buffer is pulled in,
/// so the figure is reported against the whole buffer.
pub fn sequential_read(buffer: &[u8], stride: usize) -> f64 {
    let started = Instant::now();
    let mut sum: u64 = 0;
    for i in (0..buffer.len()).step_by(stride) {
        sum = sum.wrapping_add(u64::from(buffer[i]));
    }
    black_box(sum);
    mib_per_second(buffer.len(), started)
}

pub fn sequential_write(buffer: &mut [u8], stride: usize) -> f64 {
    let started = Instant::now();
    for i in (0..buffer.len()).step_by(stride) {
        buffer[i] = (i & 0xFF) as u8;
    }
    black_box(&buffer);
    mib_per_second(buffer.len(), started)
}

/// Touches every stride-aligned offset once, in shuffled order.
pub fn random_access<R: rand::Rng + ?Sized>(buffer: &[u8], stride: usize, rng: &mut R) -> f64 {
    let mut indices: Vec<usize> = (0..buffer.len()).step_by(stride).collect();
    indices.shuffle(rng);

    let started = Instant::now();
    let mut sum: u64 = 0;
    for &idx in &indices {
        sum = sum.wrapping_add(u64::from(buffer[idx]));
    }
    black_box(sum);
    mib_per_second(buffer.len(), started)
}

/// Best of the three passes, with random access amplified by `random_weight`.
pub fn combine(read: f64, write: f64, random: f64, random_weight: f64) -> f64 {
    read.max(write).max(random * random_weight)
}

pub fn is_plausible(mbps: f64, ceiling: f64) -> bool {
    mbps.is_finite() && mbps > 0.0 && mbps < ceiling
}

/// Owns the scratch buffer; lives on the sampler thread.
pub struct BandwidthSampler {
    config: BandwidthConfig,
    buffer: Option<Vec<u8>>,
}

impl BandwidthSampler {
    pub fn new(config: BandwidthConfig) -> Self {
        Self {
            config,
            buffer: None,
        }
    }

    fn scratch(&mut self) -> Result<&mut Vec<u8>> {
        if self.buffer.is_none() {
            let size = self.config.buffer_size;
            let mut buffer = Vec::new();
            buffer
                .try_reserve_exact(size)
                .map_err(|source| StressError::Allocation { bytes: size, source })?;
            buffer.extend((0..size).map(|i| (i & 0xFF) as u8));
            self.buffer = Some(buffer);
        }
        Ok(self.buffer.get_or_insert_with(Vec::new))
    }

    #[cfg(test)]
    fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Runs up to `iterations` sub-samples while `keep_going` holds and returns
    /// their average, or `None` when no sub-sample passed the sanity filter.
    pub fn measure(&mut self, mut keep_going: impl FnMut() -> bool) -> Result<Option<f64>> {
        let config = self.config;
        let buffer = self.scratch()?;
        let mut rng = rand::rng();
        let mut total = 0.0;
        let mut valid = 0u32;

        for iteration in 0..config.iterations {
            if !keep_going() {
                break;
            }

            let read = sequential_read(&buffer[..], config.stride);
            let write = sequential_write(&mut buffer[..], config.stride);
            let random = random_access(&buffer[..], config.stride, &mut rng);
            let best = combine(read, write, random, config.random_weight);

            if is_plausible(best, config.ceiling_mbps) {
                total += best;
                valid += 1;
            } else {
                debug!(iteration, read, write, random, "discarding bandwidth sample");
            }

            if iteration + 1 < config.iterations {
                std::thread::sleep(config.iteration_pause);
            }
        }

        Ok((valid > 0).then(|| total / f64::from(valid)))
    }

    /// Measures immediately, then once per `cycle_interval`, until the token stops.
    pub fn run(&mut self, token: &StopToken, gauge: &AtomicF64) {
        loop {
            match self.measure(|| token.keep_going()) {
                Ok(Some(mbps)) => {
                    gauge.store(mbps);
                    debug!(mbps, "memory bandwidth sampled");
                }
                Ok(None) => {}
                Err(err) => {
                    error!(%err, "bandwidth scratch buffer unavailable");
                    return;
                }
            }

            if !token.pause(self.config.cycle_interval) {
                return;
            }
        }
    }
}
