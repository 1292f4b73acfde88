//! CPU workload: one hashing worker per core, plus an optional elastic pool
//! controller that grows or shrinks the worker set.

use std::hint::black_box;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::ClockGate;
use crate::config::{CpuConfig, ElasticConfig};
use crate::error::{Result, StressError};
use crate::thread_manager::{spawn_named, WorkerPool};
use crate::token::StopToken;

const BASE_SEED: u64 = 123_456_789;
const INDEX_SEED: u64 = 987_654_321;

/// Deliberately expensive modular accumulation. Cost grows with the square
/// of `exponent`, and every step feeds on the previous result.
pub fn intensive_hash(base: u64, exponent: u64, modulus: u64) -> u64 {
    let mut result: u64 = 1;
    let mut nested: u64 = 1;

    for i in 0..exponent {
        result = result.wrapping_mul(base) % modulus;
        nested = nested.wrapping_mul(result) % modulus;

        for j in 0..exponent {
            nested = nested.wrapping_add(i.wrapping_add(j));
            result = result.wrapping_mul(nested);
        }

        if i % 10 == 0 {
            result = result.wrapping_add(nested) % modulus;
        }
    }
    result
}

/// Base and exponent for batch item `index` of worker `thread_id`.
pub fn operands(thread_id: u64, index: u64, config: &CpuConfig) -> (u64, u64) {
    let base = thread_id
        .wrapping_mul(BASE_SEED)
        .wrapping_add(index.wrapping_mul(INDEX_SEED));
    let exponent = (index % config.exponent_span + config.exponent_floor)
        * (thread_id % config.thread_spread + 1);
    (base, exponent)
}

struct CpuShared {
    hash_ops: AtomicU64,
    token: StopToken,
    config: CpuConfig,
}

impl CpuShared {
    fn hash_worker(&self, thread_id: usize, retire: &AtomicBool) {
        let id = thread_id as u64;
        let chunk = u64::from(self.config.chunk_size);
        let active = || self.token.keep_going() && !retire.load(Ordering::Relaxed);
        let mut local_ops: u64 = 0;
        let mut sink: u64 = 0;

        while active() {
            for i in 0..u64::from(self.config.batch_size) {
                if !active() {
                    break;
                }

                let (base, exponent) = operands(id, i, &self.config);
                let mut value = intensive_hash(
                    black_box(base),
                    black_box(exponent),
                    black_box(self.config.modulus),
                );
                if value % 1024 == 0 {
                    value = value.wrapping_add(id).wrapping_mul(base % 7);
                }
                sink = black_box(sink ^ value);

                local_ops += 1;
                if local_ops >= chunk {
                    self.hash_ops.fetch_add(local_ops, Ordering::Relaxed);
                    local_ops = 0;
                }
            }

            if local_ops > 0 {
                self.hash_ops.fetch_add(local_ops, Ordering::Relaxed);
                local_ops = 0;
            }
        }
        black_box(sink);
    }
}

/// Throughput-based load proxy for the elastic controller.
///
/// This is not OS CPU utilization: it is the hash rate since the previous
/// sample, in ops per millisecond, divided by a calibration constant.
#[derive(Debug, Clone)]
pub struct LoadProbe {
    last_ops: u64,
    last_check_ms: u64,
    calibration: f32,
}

impl LoadProbe {
    pub fn new(calibration: f32) -> Self {
        Self {
            last_ops: 0,
            last_check_ms: 0,
            calibration,
        }
    }

    /// Returns a load in `[0, 1]`, or 0.5 when no time has passed since the last sample.
    pub fn sample(&mut self, ops: u64, now_ms: u64) -> f32 {
        let window = now_ms.saturating_sub(self.last_check_ms);
        if window == 0 {
            return 0.5;
        }
        let rate = ops.saturating_sub(self.last_ops) as f32 / window as f32;
        self.last_ops = ops;
        self.last_check_ms = now_ms;
        (rate / self.calibration).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAction {
    Grow,
    Shrink,
    Hold,
}

impl PoolAction {
    pub fn decide(load: f32, workers: usize, cores: usize, elastic: &ElasticConfig) -> Self {
        if load > elastic.high_water && workers < cores {
            PoolAction::Grow
        } else if load < elastic.low_water && workers > 1 {
            PoolAction::Shrink
        } else {
            PoolAction::Hold
        }
    }
}

fn lock_pool(pool: &Mutex<WorkerPool>) -> MutexGuard<'_, WorkerPool> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_hash_worker(shared: &Arc<CpuShared>, pool: &mut WorkerPool) -> Result<usize> {
    let shared = Arc::clone(shared);
    pool.spawn(move |index, retire| shared.hash_worker(index, &retire))
}

fn manage_thread_pool(
    shared: Arc<CpuShared>,
    pool: Arc<Mutex<WorkerPool>>,
    cores: usize,
    elastic: ElasticConfig,
) {
    let mut probe = LoadProbe::new(elastic.calibration);

    while shared.token.keep_going() {
        let load = probe.sample(
            shared.hash_ops.load(Ordering::Relaxed),
            shared.token.clock().elapsed_millis(),
        );

        {
            let mut workers = lock_pool(&pool);
            match PoolAction::decide(load, workers.len(), cores, &elastic) {
                PoolAction::Grow => match spawn_hash_worker(&shared, &mut workers) {
                    Ok(index) => info!(load, index, "adding worker due to high load"),
                    Err(err) => warn!(%err, "could not add worker"),
                },
                PoolAction::Shrink => {
                    if let Some(index) = workers.retire_last() {
                        info!(load, index, "removing worker due to low load");
                    }
                }
                PoolAction::Hold => {}
            }
        }

        if !shared.token.pause(elastic.interval) {
            break;
        }
    }
}

pub struct CpuStress {
    shared: Arc<CpuShared>,
    pool: Arc<Mutex<WorkerPool>>,
    controller: Option<JoinHandle<()>>,
    num_cores: usize,
}

impl CpuStress {
    pub fn new(config: CpuConfig, clock: Arc<ClockGate>, duration: Duration) -> Self {
        Self {
            shared: Arc::new(CpuShared {
                hash_ops: AtomicU64::new(0),
                token: StopToken::new(clock, duration),
                config,
            }),
            pool: Arc::new(Mutex::new(WorkerPool::new("hash"))),
            controller: None,
            num_cores: 0,
        }
    }

    /// Probes the core count, zeroes the counter and arms the running flag.
    pub fn initialize(&mut self) -> Result<()> {
        let cores = num_cpus::get();
        if cores == 0 {
            return Err(StressError::NoCores);
        }
        self.num_cores = cores;
        self.shared.hash_ops.store(0, Ordering::SeqCst);
        self.shared.token.arm();
        Ok(())
    }

    /// Launches one worker per core, and the pool controller when configured.
    pub fn start(&mut self) -> Result<()> {
        if self.num_cores == 0 {
            return Err(StressError::NotInitialized);
        }

        {
            let mut pool = lock_pool(&self.pool);
            for _ in 0..self.num_cores {
                spawn_hash_worker(&self.shared, &mut pool)?;
            }
        }
        info!(workers = self.num_cores, "cpu stress started");

        if let Some(elastic) = self.shared.config.elastic {
            let shared = Arc::clone(&self.shared);
            let pool = Arc::clone(&self.pool);
            let cores = self.num_cores;
            self.controller = Some(spawn_named("pool", move || {
                manage_thread_pool(shared, pool, cores, elastic)
            })?);
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.token.halt();
    }

    /// Joins the controller and every worker. Counters are final afterwards.
    pub fn wait_for_completion(&mut self) {
        if let Some(controller) = self.controller.take() {
            if controller.join().is_err() {
                warn!("pool controller panicked");
            }
        }
        let joined = lock_pool(&self.pool).join_all();
        if joined > 0 {
            info!(
                workers = joined,
                ops = self.hash_operations(),
                "cpu stress completed"
            );
        }
    }

    pub fn hash_operations(&self) -> u64 {
        self.shared.hash_ops.load(Ordering::Relaxed)
    }

    pub fn core_count(&self) -> usize {
        self.num_cores
    }

    pub fn active_workers(&self) -> usize {
        lock_pool(&self.pool).len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.token.is_running()
    }
}

impl Drop for CpuStress {
    fn drop(&mut self) {
        self.stop();
        self.wait_for_completion();
    }
}
