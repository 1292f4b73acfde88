//! Shared wall-clock gate for a stress run.
//!
//! Every workload polls the same [`ClockGate`] to decide when to stop. The gate
//! is started once at launch and ended once at shutdown; after [`ClockGate::end`]
//! the reported elapsed time is frozen.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

#[derive(Debug, Default)]
struct ClockState {
    start: Option<Instant>,
    end: Option<Instant>,
    started: bool,
    ended: bool,
}

impl ClockState {
    fn elapsed(&self) -> Duration {
        if !self.started {
            return Duration::ZERO;
        }
        let Some(start) = self.start else {
            return Duration::ZERO;
        };
        let now = match (self.ended, self.end) {
            (true, Some(end)) => end,
            _ => Instant::now(),
        };
        now.saturating_duration_since(start)
    }
}

#[derive(Debug, Default)]
pub struct ClockGate {
    state: Mutex<ClockState>,
}

impl ClockGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the start instant. Only the first call has an effect.
    pub fn start(&self) {
        let mut state = self.lock();
        if !state.started {
            state.start = Some(Instant::now());
            state.started = true;
        }
    }

    /// Freezes the elapsed time. Ignored before `start` or after a previous `end`.
    pub fn end(&self) {
        let mut state = self.lock();
        if state.started && !state.ended {
            state.end = Some(Instant::now());
            state.ended = true;
        }
    }

    /// Clears the started/ended flags so the gate can time another run.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.started = false;
        state.ended = false;
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed()
    }

    /// Elapsed time in seconds, microsecond resolution.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_micros() as f64 / 1_000_000.0
    }

    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn elapsed_whole_seconds(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// True while less than `budget` has elapsed. Always true before `start`.
    pub fn should_continue(&self, budget: Duration) -> bool {
        let state = self.lock();
        !state.started || state.elapsed() < budget
    }

    pub fn has_started(&self) -> bool {
        self.lock().started
    }

    pub fn has_ended(&self) -> bool {
        self.lock().ended
    }

    pub fn start_instant(&self) -> Option<Instant> {
        let state = self.lock();
        state.started.then_some(state.start).flatten()
    }

    pub fn end_instant(&self) -> Option<Instant> {
        let state = self.lock();
        state.ended.then_some(state.end).flatten()
    }
}

static GLOBAL_CLOCK: Lazy<Mutex<Option<Arc<ClockGate>>>> = Lazy::new(|| Mutex::new(None));

/// Process-wide clock handle, created on first use.
///
/// Workloads never reach for this themselves; the driver fetches it and hands
/// the `Arc` to whatever it constructs.
pub fn global() -> Arc<ClockGate> {
    let mut slot = GLOBAL_CLOCK.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(slot.get_or_insert_with(|| Arc::new(ClockGate::new())))
}

/// Drops the process-wide handle. The next [`global`] call builds a fresh gate.
pub fn cleanup() {
    GLOBAL_CLOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn reports_zero_before_start() {
        let clock = ClockGate::new();
        assert!(!clock.has_started());
        assert!(!clock.has_ended());
        assert_eq!(clock.elapsed_seconds(), 0.0);
        assert_eq!(clock.elapsed_millis(), 0);
        assert_eq!(clock.elapsed_whole_seconds(), 0);
        assert!(clock.start_instant().is_none());
    }

    #[test]
    fn elapsed_grows_after_start() {
        let clock = ClockGate::new();
        clock.start();
        thread::sleep(Duration::from_millis(10));
        assert!(clock.has_started());
        assert!(!clock.has_ended());
        assert!(clock.elapsed_seconds() > 0.0);
        assert!(clock.elapsed_millis() >= 10);
    }

    #[test]
    fn end_freezes_elapsed_time() {
        let clock = ClockGate::new();
        clock.start();
        thread::sleep(Duration::from_millis(100));
        clock.end();

        let first = clock.elapsed_seconds();
        thread::sleep(Duration::from_millis(50));
        let second = clock.elapsed_seconds();

        assert!(clock.has_ended());
        assert_eq!(first, second);
        assert!(first >= 0.1);
    }

    #[test]
    fn second_start_is_ignored() {
        let clock = ClockGate::new();
        clock.start();
        let first = clock.start_instant();
        thread::sleep(Duration::from_millis(5));
        clock.start();
        assert_eq!(first, clock.start_instant());
    }

    #[test]
    fn end_before_start_is_ignored() {
        let clock = ClockGate::new();
        clock.end();
        assert!(!clock.has_ended());
        assert!(clock.end_instant().is_none());

        clock.start();
        clock.end();
        let frozen = clock.end_instant();
        thread::sleep(Duration::from_millis(5));
        clock.end();
        assert_eq!(frozen, clock.end_instant());
    }

    #[test]
    fn should_continue_respects_budget() {
        let clock = ClockGate::new();
        assert!(clock.should_continue(Duration::ZERO));

        clock.start();
        assert!(clock.should_continue(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(30));
        assert!(!clock.should_continue(Duration::from_millis(20)));
    }

    #[test]
    fn unstarted_gate_ignores_an_empty_budget() {
        let clock = ClockGate::new();
        assert!(clock.should_continue(Duration::ZERO));

        clock.start();
        clock.end();
        assert!(!clock.should_continue(Duration::ZERO));

        clock.reset();
        assert!(clock.should_continue(Duration::ZERO));
    }

    #[test]
    fn reset_allows_a_new_run() {
        let clock = ClockGate::new();
        clock.start();
        thread::sleep(Duration::from_millis(20));
        clock.end();

        clock.reset();
        assert!(!clock.has_started());
        assert_eq!(clock.elapsed_seconds(), 0.0);

        clock.start();
        assert!(clock.elapsed_millis() < 20);
        assert!(!clock.has_ended());
    }

    #[test]
    fn concurrent_readers_see_monotonic_time() {
        let clock = Arc::new(ClockGate::new());
        clock.start();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || {
                    let mut last = Duration::ZERO;
                    for _ in 0..1000 {
                        let now = clock.elapsed();
                        assert!(now >= last);
                        last = now;
                    }
                })
            })
            .collect();

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn global_handle_is_shared_until_cleanup() {
        let first = global();
        let second = global();
        assert!(Arc::ptr_eq(&first, &second));

        cleanup();
        let third = global();
        assert!(!Arc::ptr_eq(&first, &third));
        cleanup();
    }
}
