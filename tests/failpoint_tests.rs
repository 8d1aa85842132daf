//! Worker panics injected through the `failpoints` feature.
//!
//! Run with: cargo test -p squeeze-tests --features failpoints --test failpoint_tests

#![cfg(feature = "failpoints")]

use squeeze_core::config::SqueezeConfig;
use squeeze_core::event::{Alert, EngineEvent, Termination};
use squeeze_core::telemetry::FixedTelemetry;
use squeeze_exec::failpoints::FAILPOINTS_ENV;
use squeeze_exec::{Engine, EventChannel};
use std::sync::Arc;

const KIB: u64 = 1024;

fn config() -> SqueezeConfig {
    SqueezeConfig {
        block_size_bytes: 64 * KIB,
        rate_per_second: 1000,
        reserve_percent: 0.0,
        safety_floor_bytes: 0,
        monitor_interval_ms: 10,
        progress_interval_ms: 5,
        ..SqueezeConfig::default()
    }
}

// One test per binary: the failpoint switch is process-wide.
#[test]
fn test_worker_panic_becomes_unexpected_runtime_alert() {
    let (sink, stream) = EventChannel::with_default_backlog();
    let engine = Engine::new(sink, Arc::new(FixedTelemetry::new(1024 * KIB)));

    std::env::set_var(FAILPOINTS_ENV, "panic_allocation_tick");
    engine.start(config()).unwrap();
    let summary = engine.join().unwrap();
    std::env::remove_var(FAILPOINTS_ENV);

    assert_eq!(summary.termination, Termination::Failed);
    assert_eq!(summary.allocated_bytes, 0);

    let events = stream.drain();
    let detail = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::Alert(Alert::UnexpectedRuntime { detail }) => Some(detail.clone()),
            _ => None,
        })
        .expect("runtime alert");
    assert!(detail.contains("failpoint triggered"), "detail: {detail}");
    assert!(matches!(events.last(), Some(EngineEvent::Completed(_))));

    // The engine survives the panic.
    engine.start(config()).unwrap();
    let summary = engine.join().unwrap();
    assert_eq!(summary.termination, Termination::CeilingReached);
    assert_eq!(summary.allocated_bytes, 1024 * KIB);
}
