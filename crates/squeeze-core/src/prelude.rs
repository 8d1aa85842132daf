//! Convenient re-exports for downstream crates.

pub use crate::budget::{BudgetGuard, MemoryBudget};
pub use crate::config::{FillPattern, Settings, SqueezeConfig};
pub use crate::error::{Error, Result};
pub use crate::event::{Alert, EngineEvent, Phase, Progress, RunSummary, Termination};
pub use crate::id::{BlockId, RunId};
pub use crate::telemetry::{MemoryTelemetry, TelemetryError};
