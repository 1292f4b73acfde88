use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use system_stress::config::MIB;
use system_stress::cpu_stress::CpuStress;
use system_stress::{ClockGate, Phase, Preset, StressConfig, SystemStress};

fn smoke(duration: Duration) -> StressConfig {
    let mut config = StressConfig::preset(Preset::Smoke);
    config.duration = duration;
    config
}

#[test]
fn short_run_does_real_work() {
    let clock = Arc::new(ClockGate::new());
    let mut stress = SystemStress::new(smoke(Duration::from_secs(30)), clock).unwrap();
    stress.initialize().unwrap();
    stress.start().unwrap();
    thread::sleep(Duration::from_millis(200));
    stress.stop();
    stress.wait_for_completion();

    let summary = stress.summary().unwrap();
    assert!(summary.hash_operations > 0);
    assert!(summary.ops_per_second >= 1000.0, "{} ops/s", summary.ops_per_second);
}

#[test]
fn counter_is_stable_after_join() {
    let clock = Arc::new(ClockGate::new());
    let mut stress = SystemStress::new(smoke(Duration::from_secs(30)), clock).unwrap();
    stress.initialize().unwrap();
    stress.start().unwrap();
    thread::sleep(Duration::from_millis(100));
    stress.wait_for_completion();

    let ops = stress.hash_operations();
    let allocated = stress.memory_allocated();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(stress.hash_operations(), ops);
    assert_eq!(stress.memory_allocated(), allocated);
    assert!(!stress.is_running());
}

#[test]
fn repeated_cycles_each_make_progress() {
    let clock = Arc::new(ClockGate::new());
    let mut stress = SystemStress::new(smoke(Duration::from_secs(30)), clock).unwrap();

    for _ in 0..3 {
        stress.initialize().unwrap();
        assert_eq!(stress.hash_operations(), 0);
        let start_ops = stress.hash_operations();

        stress.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        stress.stop();
        stress.wait_for_completion();

        assert_eq!(stress.phase(), Phase::Joined);
        assert!(stress.hash_operations() > start_ops);
    }
}

#[test]
fn concurrent_readers_see_a_monotonic_counter() {
    let clock = Arc::new(ClockGate::new());
    let config = smoke(Duration::from_secs(30));
    let mut cpu = CpuStress::new(config.cpu, Arc::clone(&clock), config.duration);
    cpu.initialize().unwrap();
    clock.start();
    cpu.start().unwrap();

    thread::scope(|scope| {
        for _ in 0..5 {
            scope.spawn(|| {
                let mut last = 0;
                for _ in 0..100 {
                    let now = cpu.hash_operations();
                    assert!(now >= last);
                    last = now;
                    thread::sleep(Duration::from_millis(1));
                }
            });
        }
    });

    cpu.stop();
    cpu.wait_for_completion();
}

#[test]
fn memory_stays_under_target_in_whole_blocks() {
    let clock = Arc::new(ClockGate::new());
    let mut stress = SystemStress::new(smoke(Duration::from_millis(500)), clock).unwrap();
    let abort = AtomicBool::new(false);

    let summary = stress.run(Duration::from_millis(50), &abort, |_| {}).unwrap();

    let block = stress.config().memory.block_size;
    assert!(summary.memory_allocated <= stress.target_memory());
    assert_eq!(summary.memory_allocated % block, 0);
    assert!(summary.peak_memory <= stress.target_memory());
    assert_eq!(stress.bandwidth_buffer_size(), 8 * MIB);
}

#[test]
fn bandwidth_reading_is_zero_or_plausible() {
    let clock = Arc::new(ClockGate::new());
    let mut stress = SystemStress::new(smoke(Duration::from_secs(1)), clock).unwrap();
    let abort = AtomicBool::new(false);

    let summary = stress.run(Duration::from_millis(100), &abort, |_| {}).unwrap();

    let mbps = summary.bandwidth_mbps;
    assert!(mbps == 0.0 || (mbps > 0.0 && mbps < 1_000_000.0), "{mbps}");
}

#[test]
fn clock_freezes_once_the_run_stops() {
    let clock = Arc::new(ClockGate::new());
    let mut stress = SystemStress::new(smoke(Duration::from_secs(30)), Arc::clone(&clock)).unwrap();
    stress.initialize().unwrap();
    stress.start().unwrap();
    thread::sleep(Duration::from_millis(50));
    stress.stop();

    let frozen = clock.elapsed();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(clock.elapsed(), frozen);
    assert!(!stress.should_continue() || frozen < Duration::from_secs(30));
    stress.wait_for_completion();
}

#[test]
fn budget_expiry_ends_the_run_without_stop() {
    let clock = Arc::new(ClockGate::new());
    let mut stress = SystemStress::new(smoke(Duration::from_millis(200)), clock).unwrap();
    stress.initialize().unwrap();
    stress.start().unwrap();

    let began = Instant::now();
    while stress.should_continue() {
        thread::sleep(Duration::from_millis(10));
    }
    stress.wait_for_completion();

    assert!(began.elapsed() < Duration::from_secs(5));
    assert!(stress.hash_operations() > 0);
}
