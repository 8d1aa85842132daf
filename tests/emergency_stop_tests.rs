//! Emergency release from every phase.

use squeeze_core::config::SqueezeConfig;
use squeeze_core::event::{EngineEvent, Phase, Progress, Termination};
use squeeze_core::telemetry::FixedTelemetry;
use squeeze_exec::{Engine, EventChannel};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

fn slow_config() -> SqueezeConfig {
    SqueezeConfig {
        block_size_bytes: 64 * KIB,
        rate_per_second: 200,
        reserve_percent: 0.0,
        safety_floor_bytes: 0,
        monitor_interval_ms: 10,
        progress_interval_ms: 5,
        ..SqueezeConfig::default()
    }
}

fn wait_for_blocks(engine: &Engine, n: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.block_count() < n {
        assert!(Instant::now() < deadline, "run never reached {n} blocks");
        thread::sleep(Duration::from_millis(2));
    }
}

fn completed_count(events: &[EngineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Completed(_)))
        .count()
}

#[test]
fn test_emergency_from_idle_is_silent() {
    let (sink, stream) = EventChannel::with_default_backlog();
    let engine = Engine::new(sink, Arc::new(FixedTelemetry::new(MIB)));

    engine.emergency_stop();
    engine.emergency_stop();

    assert_eq!(engine.phase(), Phase::Idle);
    assert_eq!(engine.allocated_bytes(), 0);
    assert!(stream.is_empty());
}

#[test]
fn test_emergency_while_running_releases_synchronously() {
    let (sink, stream) = EventChannel::with_default_backlog();
    let engine = Engine::new(sink, Arc::new(FixedTelemetry::new(64 * MIB)));
    engine.start(slow_config()).unwrap();
    wait_for_blocks(&engine, 3);

    engine.emergency_stop();
    assert_eq!(engine.allocated_bytes(), 0);
    assert_eq!(engine.block_count(), 0);
    assert_eq!(engine.phase(), Phase::Completed);

    let summary = engine.join().unwrap();
    assert_eq!(summary.termination, Termination::EmergencyStop);
    assert_eq!(summary.allocated_bytes, 0);
    assert!(summary.peak_bytes >= 3 * 64 * KIB);

    let events = stream.drain();
    assert_eq!(completed_count(&events), 1);
    let n = events.len();
    assert!(n >= 2);
    assert_eq!(
        events[n - 2],
        EngineEvent::Progress(Progress::zero(64 * MIB))
    );
    assert!(matches!(events[n - 1], EngineEvent::Completed(_)));

    // Nothing allocated after the release.
    thread::sleep(Duration::from_millis(30));
    assert_eq!(engine.allocated_bytes(), 0);
    assert!(stream.is_empty());
}

#[test]
fn test_emergency_after_completion_releases_retained_blocks() {
    let (sink, stream) = EventChannel::with_default_backlog();
    let engine = Engine::new(sink, Arc::new(FixedTelemetry::new(MIB)));
    let cfg = SqueezeConfig {
        rate_per_second: 1000,
        ..slow_config()
    };
    engine.start(cfg).unwrap();
    let summary = engine.join().unwrap();
    assert_eq!(summary.termination, Termination::CeilingReached);
    assert_eq!(engine.allocated_bytes(), MIB);
    stream.drain();

    engine.emergency_stop();
    assert_eq!(engine.allocated_bytes(), 0);
    assert_eq!(engine.phase(), Phase::Completed);

    // The run already completed: one zero-state sample, no second completion.
    assert_eq!(
        stream.drain(),
        vec![EngineEvent::Progress(Progress::zero(MIB))]
    );
}

#[test]
fn test_emergency_is_idempotent() {
    let (sink, stream) = EventChannel::with_default_backlog();
    let engine = Engine::new(sink, Arc::new(FixedTelemetry::new(64 * MIB)));
    engine.start(slow_config()).unwrap();
    wait_for_blocks(&engine, 2);

    engine.emergency_stop();
    let after_first = stream.drain();
    let phase = engine.phase();

    engine.emergency_stop();
    assert_eq!(engine.phase(), phase);
    assert_eq!(engine.allocated_bytes(), 0);

    engine.join();
    assert!(stream.is_empty());
    assert_eq!(completed_count(&after_first), 1);
}

#[test]
fn test_emergency_after_graceful_stop() {
    let (sink, stream) = EventChannel::with_default_backlog();
    let engine = Engine::new(sink, Arc::new(FixedTelemetry::new(64 * MIB)));
    engine.start(slow_config()).unwrap();
    wait_for_blocks(&engine, 2);

    engine.graceful_stop();
    engine.emergency_stop();
    assert_eq!(engine.allocated_bytes(), 0);

    engine.join();
    assert_eq!(completed_count(&stream.drain()), 1);
}

#[test]
fn test_emergency_from_another_thread() {
    let (sink, stream) = EventChannel::with_default_backlog();
    let engine = Arc::new(Engine::new(sink, Arc::new(FixedTelemetry::new(64 * MIB))));
    engine.start(slow_config()).unwrap();
    wait_for_blocks(&engine, 2);

    let remote = Arc::clone(&engine);
    thread::spawn(move || remote.emergency_stop()).join().unwrap();

    assert_eq!(engine.allocated_bytes(), 0);
    let summary = engine.join().unwrap();
    assert_eq!(summary.termination, Termination::EmergencyStop);
    assert_eq!(completed_count(&stream.drain()), 1);
}

#[test]
fn test_engine_restarts_after_emergency() {
    let (sink, stream) = EventChannel::with_default_backlog();
    let engine = Engine::new(sink, Arc::new(FixedTelemetry::new(MIB)));
    engine.start(slow_config()).unwrap();
    engine.emergency_stop();
    engine.join();

    let cfg = SqueezeConfig {
        rate_per_second: 1000,
        ..slow_config()
    };
    engine.start(cfg).unwrap();
    let summary = engine.join().unwrap();
    assert_eq!(summary.termination, Termination::CeilingReached);
    assert_eq!(summary.allocated_bytes, MIB);
    assert_eq!(completed_count(&stream.drain()), 2);
}
