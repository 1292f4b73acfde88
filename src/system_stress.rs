//! Coordinator for a full run: drives the CPU and memory workloads through
//! `Idle -> Initialized -> Running -> Stopping -> Joined`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::ClockGate;
use crate::config::{StressConfig, MIB};
use crate::cpu_stress::CpuStress;
use crate::error::{Result, StressError};
use crate::memory_stress::MemoryStress;
use crate::report::RunSummary;

/// How often [`SystemStress::run`] samples metrics by default.
pub const DISPLAY_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Initialized,
    Running,
    Stopping,
    Joined,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Initialized => "initialized",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Joined => "joined",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of every published counter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub elapsed: Duration,
    pub duration: Duration,
    pub hash_operations: u64,
    pub cores: usize,
    pub workers: usize,
    pub memory_allocated: usize,
    pub target_memory: usize,
    pub bandwidth_buffer: usize,
    pub bandwidth_mbps: f64,
    pub allocation_failed: bool,
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.elapsed.min(self.duration);
        write!(
            f,
            "time {}s/{}s | memory {}MB/{}MB | bandwidth {:.2} MB/s | hash ops {}",
            shown.as_secs(),
            self.duration.as_secs(),
            self.memory_allocated / MIB,
            self.target_memory / MIB,
            self.bandwidth_mbps,
            self.hash_operations,
        )
    }
}

pub struct SystemStress {
    config: StressConfig,
    clock: Arc<ClockGate>,
    cpu: CpuStress,
    memory: MemoryStress,
    phase: Phase,
    run_id: Uuid,
    started_at: Option<DateTime<Utc>>,
}

impl SystemStress {
    pub fn new(config: StressConfig, clock: Arc<ClockGate>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cpu: CpuStress::new(config.cpu, Arc::clone(&clock), config.duration),
            memory: MemoryStress::new(config, Arc::clone(&clock)),
            config,
            clock,
            phase: Phase::Idle,
            run_id: Uuid::new_v4(),
            started_at: None,
        })
    }

    fn invalid(&self, action: &'static str) -> StressError {
        StressError::InvalidPhase {
            action,
            phase: self.phase,
        }
    }

    /// Zeroes counters, arms both workloads and probes the core count.
    /// Allowed from `Idle`, or from `Joined` to begin another run.
    pub fn initialize(&mut self) -> Result<()> {
        match self.phase {
            Phase::Idle => {}
            Phase::Joined => self.clock.reset(),
            _ => return Err(self.invalid("initialize")),
        }

        self.cpu.initialize()?;
        self.memory.initialize();
        self.phase = Phase::Initialized;
        info!(cores = self.cpu.core_count(), "detected CPU cores");
        Ok(())
    }

    /// Starts the clock gate and launches every worker thread.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Initialized {
            return Err(self.invalid("start"));
        }

        self.clock.start();
        self.run_id = Uuid::new_v4();
        self.started_at = Some(Utc::now());
        self.phase = Phase::Running;

        if let Err(err) = self.cpu.start().and_then(|()| self.memory.start()) {
            self.wait_for_completion();
            return Err(err);
        }

        info!(
            run_id = %self.run_id,
            duration_secs = self.config.duration.as_secs_f64(),
            "stress test started"
        );
        Ok(())
    }

    /// Requests shutdown and freezes the clock. A no-op unless running.
    pub fn stop(&mut self) {
        if self.phase != Phase::Running {
            debug!(phase = %self.phase, "stop ignored");
            return;
        }
        self.cpu.stop();
        self.memory.stop();
        self.clock.end();
        self.phase = Phase::Stopping;
    }

    /// Joins every worker. Stops the run first if it is still going.
    pub fn wait_for_completion(&mut self) {
        if self.phase == Phase::Running {
            self.stop();
        }
        if self.phase != Phase::Stopping {
            return;
        }
        self.cpu.wait_for_completion();
        self.memory.wait_for_completion();
        self.phase = Phase::Joined;
        info!(elapsed_secs = self.clock.elapsed_seconds(), "stress test joined");
    }

    pub fn should_continue(&self) -> bool {
        self.clock.should_continue(self.config.duration)
    }

    /// Full lifecycle: initialize, start, report metrics every `tick` until the
    /// clock budget runs out or `abort` is raised, then stop, join and summarize.
    pub fn run(
        &mut self,
        tick: Duration,
        abort: &AtomicBool,
        mut on_tick: impl FnMut(&Metrics),
    ) -> Result<RunSummary> {
        self.initialize()?;
        self.start()?;

        while self.should_continue() && !abort.load(Ordering::SeqCst) {
            on_tick(&self.metrics());
            thread::sleep(tick);
        }
        if abort.load(Ordering::SeqCst) {
            info!("stress test aborted");
        }

        self.stop();
        self.wait_for_completion();
        on_tick(&self.metrics());
        self.summary()
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            elapsed: self.clock.elapsed(),
            duration: self.config.duration,
            hash_operations: self.cpu.hash_operations(),
            cores: self.cpu.core_count(),
            workers: self.cpu.active_workers(),
            memory_allocated: self.memory.memory_allocated(),
            target_memory: self.memory.target_memory(),
            bandwidth_buffer: self.memory.bandwidth_buffer_size(),
            bandwidth_mbps: self.memory.memory_bandwidth(),
            allocation_failed: self.memory.allocation_failed(),
        }
    }

    /// Final figures. Only available once every worker has been joined.
    pub fn summary(&self) -> Result<RunSummary> {
        match (self.phase, self.started_at) {
            (Phase::Joined, Some(started_at)) => Ok(RunSummary::from_metrics(
                self.run_id,
                started_at,
                &self.metrics(),
            )),
            _ => Err(self.invalid("summarize")),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    pub fn clock(&self) -> &ClockGate {
        &self.clock
    }

    pub fn hash_operations(&self) -> u64 {
        self.cpu.hash_operations()
    }

    pub fn core_count(&self) -> usize {
        self.cpu.core_count()
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn memory_allocated(&self) -> usize {
        self.memory.memory_allocated()
    }

    pub fn target_memory(&self) -> usize {
        self.memory.target_memory()
    }

    pub fn bandwidth_buffer_size(&self) -> usize {
        self.memory.bandwidth_buffer_size()
    }

    pub fn memory_bandwidth(&self) -> f64 {
        self.memory.memory_bandwidth()
    }
}

impl Drop for SystemStress {
    fn drop(&mut self) {
        self.wait_for_completion();
    }
}
