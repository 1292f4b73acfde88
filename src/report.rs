//! End-of-run summary and host memory report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;
use uuid::Uuid;

use crate::config::MIB;
use crate::system_stress::Metrics;

/// Rough dual-channel DDR estimate: bandwidth / (2 channels * 8 bytes * 0.7 efficiency).
const DDR_EFFICIENCY_DIVISOR: f64 = 11.2;

const SIZE_PREFIXES: [&str; 7] = ["", "K", "M", "G", "T", "P", "E"];

/// Scales `bytes` down by `factor` until it fits under one step, e.g. `1.50 KB`.
pub fn format_size(bytes: u64, factor: u64, suffix: &str) -> String {
    let step = factor as f64;
    let (size, prefix) = SIZE_PREFIXES[1..]
        .iter()
        .fold((bytes as f64, SIZE_PREFIXES[0]), |(size, prefix), next| {
            if size >= step {
                (size / step, *next)
            } else {
                (size, prefix)
            }
        });
    format!("{size:.2} {prefix}{suffix}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthTier {
    Excellent,
    Good,
    Moderate,
    Low,
}

impl BandwidthTier {
    pub fn from_mbps(mbps: f64) -> Self {
        if mbps > 20_000.0 {
            BandwidthTier::Excellent
        } else if mbps > 10_000.0 {
            BandwidthTier::Good
        } else if mbps > 5_000.0 {
            BandwidthTier::Moderate
        } else {
            BandwidthTier::Low
        }
    }
}

impl fmt::Display for BandwidthTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BandwidthTier::Excellent => "excellent",
            BandwidthTier::Good => "good",
            BandwidthTier::Moderate => "moderate",
            BandwidthTier::Low => "low",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HostMemory {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

impl HostMemory {
    pub fn probe() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            total: sys.total_memory(),
            used: sys.used_memory(),
            available: sys.available_memory(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub hash_operations: u64,
    pub ops_per_second: f64,
    pub cores: usize,
    pub memory_allocated: usize,
    /// Allocated blocks plus the bandwidth scratch buffer.
    pub peak_memory: usize,
    pub target_memory: usize,
    pub bandwidth_mbps: f64,
    pub bandwidth_tier: BandwidthTier,
    pub estimated_ddr_mhz: Option<u32>,
    pub allocation_failed: bool,
    pub host: Option<HostMemory>,
}

impl RunSummary {
    pub fn from_metrics(run_id: Uuid, started_at: DateTime<Utc>, metrics: &Metrics) -> Self {
        let elapsed_secs = metrics.elapsed.as_secs_f64();
        let ops_per_second = if elapsed_secs > 0.0 {
            metrics.hash_operations as f64 / elapsed_secs
        } else {
            0.0
        };
        let estimated_ddr_mhz = (metrics.bandwidth_mbps > 0.0)
            .then(|| (metrics.bandwidth_mbps / DDR_EFFICIENCY_DIVISOR) as u32);

        Self {
            run_id,
            started_at,
            elapsed_secs,
            hash_operations: metrics.hash_operations,
            ops_per_second,
            cores: metrics.cores,
            memory_allocated: metrics.memory_allocated,
            peak_memory: metrics.memory_allocated + metrics.bandwidth_buffer,
            target_memory: metrics.target_memory,
            bandwidth_mbps: metrics.bandwidth_mbps,
            bandwidth_tier: BandwidthTier::from_mbps(metrics.bandwidth_mbps),
            estimated_ddr_mhz,
            allocation_failed: metrics.allocation_failed,
            host: None,
        }
    }

    pub fn with_host(mut self, host: HostMemory) -> Self {
        self.host = Some(host);
        self
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Test Results ===")?;
        writeln!(f, "Run: {} (started {})", self.run_id, self.started_at.to_rfc3339())?;
        writeln!(f, "Total hashing operations: {} ops", self.hash_operations)?;
        writeln!(f, "Hashing throughput: {:.0} ops/s", self.ops_per_second)?;
        writeln!(f, "Total execution time: {:.3} seconds", self.elapsed_secs)?;
        writeln!(f, "Maximum memory allocated: {}MB", self.peak_memory / MIB)?;
        write!(
            f,
            "Memory bandwidth: {:.2} MB/s ({})",
            self.bandwidth_mbps, self.bandwidth_tier
        )?;
        if let Some(mhz) = self.estimated_ddr_mhz {
            write!(f, " (~{} MHz est.)", mhz)?;
        }
        writeln!(f)?;
        if self.allocation_failed {
            writeln!(f, "Memory allocation stopped early: allocator refused a block")?;
        }
        write!(f, "CPU cores utilized: {}", self.cores)?;
        if let Some(host) = &self.host {
            write!(
                f,
                "\nHost memory: {} used of {} ({} available)",
                format_size(host.used, 1024, "B"),
                format_size(host.total, 1024, "B"),
                format_size(host.available, 1024, "B"),
            )?;
        }
        Ok(())
    }
}
