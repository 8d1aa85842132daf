#![forbid(unsafe_code)]
//! squeeze-exec: the allocation engine.
//!
//! `Engine::start` spawns one SafetyMonitor thread, one allocation worker per
//! configured worker, and a driver thread that joins them and closes the run.
//! Everything a run shares lives in one `RunContext`: the cancel flag, the
//! floor latch, the block stores, and the emission gate that guarantees exactly
//! one `Completed` event.

pub mod engine;
pub mod failpoints;
pub mod metrics;
pub mod monitor;
pub mod pacer;
mod run;
pub mod sink;
mod worker;

pub use engine::{Engine, ExecError};
pub use pacer::{next_deadline, Pacer};
pub use sink::{ChannelSink, EventChannel, EventSink, EventStream, NullSink};
