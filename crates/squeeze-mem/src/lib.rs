#![forbid(unsafe_code)]
//! squeeze-mem: the memory the engine actually holds.
//!
//! `BlockStore` owns every block a run allocates and is the only place blocks are
//! freed. Each block is accounted through a `StoreBudget` guard (RAII), so the
//! store's byte count and the budget's usage cannot drift apart, and an optional
//! cap refuses allocations the same way the platform would.
//!
//! `ProcMeminfo` is the production `MemoryTelemetry` (Linux `/proc/meminfo`).

pub mod block;
pub mod error;
pub mod guard;
pub mod meminfo;
pub mod tracking;

pub use block::{Block, BlockStore, Filler};
pub use error::{Error, Result};
pub use guard::{BlockGuard, StoreBudget};
pub use meminfo::{MemoryInfo, ProcMeminfo};
pub use tracking::PeakTracker;
