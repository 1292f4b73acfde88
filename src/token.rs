use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::ClockGate;

/// Longest single sleep while pausing, so a stop request is noticed promptly.
const PAUSE_SLICE: Duration = Duration::from_millis(25);

/// Cooperative stop token shared by one workload's threads.
///
/// Workers keep going while the running flag is set and the clock gate still
/// has budget left.
#[derive(Debug)]
pub struct StopToken {
    running: AtomicBool,
    clock: Arc<ClockGate>,
    budget: Duration,
}

impl StopToken {
    /// Builds a token in the stopped state.
    pub fn new(clock: Arc<ClockGate>, budget: Duration) -> Self {
        Self {
            running: AtomicBool::new(false),
            clock,
            budget,
        }
    }

    pub fn arm(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn clock(&self) -> &ClockGate {
        &self.clock
    }

    pub fn keep_going(&self) -> bool {
        self.is_running() && self.clock.should_continue(self.budget)
    }

    /// Sleeps for up to `duration`, waking early once the token stops.
    /// Returns whether the caller should keep going.
    pub fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.keep_going() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
        false
    }
}
