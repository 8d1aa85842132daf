#![forbid(unsafe_code)]
//! squeeze-core: shared contracts for the memsqueeze engine.
//!
//! Configuration, ids, events and the two traits the engine consumes
//! (`MemoryTelemetry`, `MemoryBudget`). Concrete stores live in `squeeze-mem`,
//! the engine itself in `squeeze-exec`.

pub mod budget;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod prelude;
pub mod telemetry;

pub use error::{Error, Result};
