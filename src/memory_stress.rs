//! Memory workload: an allocation thread that grows a retained block store up
//! to the configured ceiling, and a bandwidth sampler thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info, warn};

use crate::bandwidth::{AtomicF64, BandwidthSampler};
use crate::blocks::{Block, RetainedBlocks};
use crate::clock::ClockGate;
use crate::config::{StressConfig, MIB};
use crate::error::{Result, StressError};
use crate::thread_manager::spawn_named;
use crate::token::StopToken;

struct MemoryShared {
    token: StopToken,
    allocated: AtomicUsize,
    bandwidth: AtomicF64,
    allocation_failed: AtomicBool,
}

impl MemoryShared {
    fn allocate_blocks(&self, block_size: usize, limit: usize, pattern: u32) -> RetainedBlocks {
        let mut blocks = RetainedBlocks::new();

        while self.token.keep_going()
            && self.allocated.load(Ordering::Relaxed) + block_size <= limit
        {
            match Block::filled(block_size, pattern) {
                Ok(block) => {
                    self.allocated.fetch_add(block_size, Ordering::Relaxed);
                    blocks.push(block);
                }
                Err(err) => {
                    self.allocation_failed.store(true, Ordering::SeqCst);
                    error!(%err, retained = blocks.retained_bytes(), "memory allocation failed");
                    break;
                }
            }
        }
        blocks
    }
}

pub struct MemoryStress {
    config: StressConfig,
    shared: Arc<MemoryShared>,
    initialized: bool,
    alloc_thread: Option<JoinHandle<RetainedBlocks>>,
    bandwidth_thread: Option<JoinHandle<()>>,
    retained: Option<RetainedBlocks>,
}

impl MemoryStress {
    pub fn new(config: StressConfig, clock: Arc<ClockGate>) -> Self {
        Self {
            shared: Arc::new(MemoryShared {
                token: StopToken::new(clock, config.duration),
                allocated: AtomicUsize::new(0),
                bandwidth: AtomicF64::default(),
                allocation_failed: AtomicBool::new(false),
            }),
            config,
            initialized: false,
            alloc_thread: None,
            bandwidth_thread: None,
            retained: None,
        }
    }

    /// Releases blocks from a previous run, zeroes the metrics and arms the running flag.
    pub fn initialize(&mut self) {
        self.retained = None;
        self.shared.allocated.store(0, Ordering::SeqCst);
        self.shared.bandwidth.store(0.0);
        self.shared.allocation_failed.store(false, Ordering::SeqCst);
        self.shared.token.arm();
        self.initialized = true;
    }

    pub fn start(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(StressError::NotInitialized);
        }

        let shared = Arc::clone(&self.shared);
        let memory = self.config.memory;
        let limit = self.config.allocation_limit();
        self.alloc_thread = Some(spawn_named("alloc", move || {
            shared.allocate_blocks(memory.block_size, limit, memory.fill_pattern)
        })?);

        if let Some(bandwidth) = self.config.bandwidth {
            let shared = Arc::clone(&self.shared);
            self.bandwidth_thread = Some(spawn_named("bandwidth", move || {
                BandwidthSampler::new(bandwidth).run(&shared.token, &shared.bandwidth)
            })?);
        }

        info!(
            limit_mb = limit / MIB,
            sampler = self.config.bandwidth.is_some(),
            "memory stress started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.token.halt();
    }

    /// Joins both threads. Allocated blocks stay retained until this workload
    /// is dropped or re-initialized.
    pub fn wait_for_completion(&mut self) {
        if let Some(handle) = self.alloc_thread.take() {
            match handle.join() {
                Ok(blocks) => {
                    info!(
                        blocks = blocks.len(),
                        bytes = blocks.retained_bytes(),
                        "memory stress completed"
                    );
                    self.retained = Some(blocks);
                }
                Err(_) => warn!("allocation thread panicked"),
            }
        }
        if let Some(handle) = self.bandwidth_thread.take() {
            if handle.join().is_err() {
                warn!("bandwidth thread panicked");
            }
        }
    }

    pub fn memory_allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::Relaxed)
    }

    pub fn memory_bandwidth(&self) -> f64 {
        self.shared.bandwidth.load()
    }

    pub fn target_memory(&self) -> usize {
        self.config.target_memory()
    }

    pub fn bandwidth_buffer_size(&self) -> usize {
        self.config.reserved_scratch()
    }

    pub fn allocation_failed(&self) -> bool {
        self.shared.allocation_failed.load(Ordering::SeqCst)
    }

    /// Blocks held after the last join, if any.
    pub fn retained_blocks(&self) -> usize {
        self.retained.as_ref().map_or(0, RetainedBlocks::len)
    }

    pub fn is_running(&self) -> bool {
        self.shared.token.is_running()
    }
}

impl Drop for MemoryStress {
    fn drop(&mut self) {
        self.stop();
        self.wait_for_completion();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preset;
    use std::thread;
    use std::time::{Duration, Instant};

    fn smoke() -> (MemoryStress, Arc<ClockGate>) {
        let clock = Arc::new(ClockGate::new());
        let memory = MemoryStress::new(StressConfig::preset(Preset::Smoke), Arc::clone(&clock));
        (memory, clock)
    }

    fn ceiling_config(limit: usize, duration: Duration) -> StressConfig {
        let mut config = StressConfig::preset(Preset::Smoke);
        config.duration = duration;
        config.memory.base_unit = limit;
        config.memory.multiplier = 1;
        config.bandwidth = None;
        config
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) {
        let until = Instant::now() + deadline;
        while !done() && Instant::now() < until {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn initialize_resets_metrics() {
        let (mut memory, _clock) = smoke();
        assert!(!memory.is_running());
        memory.initialize();
        assert!(memory.is_running());
        assert_eq!(memory.memory_allocated(), 0);
        assert_eq!(memory.memory_bandwidth(), 0.0);
        assert_eq!(memory.target_memory(), 64 * MIB);
        assert_eq!(memory.bandwidth_buffer_size(), 8 * MIB);
    }

    #[test]
    fn start_requires_initialize() {
        let (mut memory, _clock) = smoke();
        assert!(matches!(memory.start(), Err(StressError::NotInitialized)));
    }

    #[test]
    fn allocation_stops_at_the_ceiling() {
        let (mut memory, clock) = smoke();
        memory.initialize();
        clock.start();
        memory.start().unwrap();

        let limit = 64 * MIB - 8 * MIB;
        wait_until(Duration::from_secs(5), || memory.memory_allocated() >= limit);
        memory.stop();
        memory.wait_for_completion();

        let allocated = memory.memory_allocated();
        assert_eq!(allocated, limit);
        assert_eq!(allocated % MIB, 0);
        assert!(allocated + memory.bandwidth_buffer_size() <= memory.target_memory());
        assert_eq!(memory.retained_blocks(), limit / MIB);
        assert!(!memory.allocation_failed());
    }

    #[test]
    fn allocated_bytes_never_shrink() {
        let clock = Arc::new(ClockGate::new());
        let mut memory = MemoryStress::new(ceiling_config(32 * MIB, Duration::from_secs(10)), clock);
        memory.initialize();
        memory.start().unwrap();

        let mut last = 0;
        for _ in 0..50 {
            let now = memory.memory_allocated();
            assert!(now >= last);
            last = now;
            thread::sleep(Duration::from_millis(2));
        }

        memory.stop();
        memory.wait_for_completion();
        let final_bytes = memory.memory_allocated();
        assert!(final_bytes >= last);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(memory.memory_allocated(), final_bytes);
    }

    #[test]
    fn sampler_publishes_within_bounds() {
        let (mut memory, clock) = smoke();
        memory.initialize();
        clock.start();
        memory.start().unwrap();

        wait_until(Duration::from_secs(5), || memory.memory_bandwidth() > 0.0);
        memory.stop();
        memory.wait_for_completion();

        let bandwidth = memory.memory_bandwidth();
        assert!(bandwidth >= 0.0);
        if bandwidth > 0.0 {
            assert!(bandwidth >= 0.1);
            assert!(bandwidth <= 1_000_000.0);
        }
    }

    #[test]
    fn stop_terminates_promptly() {
        let (mut memory, clock) = smoke();
        memory.initialize();
        clock.start();
        memory.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let stopping = Instant::now();
        memory.stop();
        memory.wait_for_completion();
        assert!(stopping.elapsed() < Duration::from_secs(1));
        assert!(!memory.is_running());
    }

    #[test]
    fn refused_allocation_is_recovered_locally() {
        let mut config = ceiling_config(usize::MAX & !3, Duration::from_secs(10));
        config.memory.block_size = (usize::MAX / 2) & !3;
        let mut memory = MemoryStress::new(config, Arc::new(ClockGate::new()));
        memory.initialize();
        memory.start().unwrap();

        wait_until(Duration::from_secs(5), || memory.allocation_failed());
        assert!(memory.allocation_failed());
        assert_eq!(memory.memory_allocated(), 0);
        assert!(memory.is_running());

        memory.stop();
        memory.wait_for_completion();
        assert!(!memory.is_running());
        assert_eq!(memory.retained_blocks(), 0);
        assert_eq!(memory.memory_allocated(), 0);
    }

    #[test]
    fn reinitialize_releases_previous_blocks() {
        let clock = Arc::new(ClockGate::new());
        let mut memory = MemoryStress::new(ceiling_config(8 * MIB, Duration::from_secs(10)), clock);
        for _ in 0..2 {
            memory.initialize();
            assert_eq!(memory.retained_blocks(), 0);
            memory.start().unwrap();
            wait_until(Duration::from_secs(5), || memory.memory_allocated() >= 8 * MIB);
            memory.stop();
            memory.wait_for_completion();
            assert_eq!(memory.retained_blocks(), 8);
        }
    }
}
