//! Events streamed from the engine to its observer, and the run lifecycle types
//! they refer to.
//!
//! Events are plain values: observers get copies and hold no engine state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::RunId;

/// Lifecycle of a run as seen from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Running,
    Stopping,
    Completed,
}

impl Phase {
    /// A run in this phase blocks `start`.
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Running | Phase::Stopping)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Stopping => "stopping",
            Phase::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    CeilingReached,
    GracefulStop,
    SafetyFloor,
    Exhausted,
    Failed,
    EmergencyStop,
}

/// A progress sample. `percent` is relative to the run's target ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub percent: u8,
    pub allocated_bytes: u64,
    pub available_bytes: u64,
}

impl Progress {
    /// Build a sample, computing `100 * allocated / ceiling` clamped to `[0, 100]`.
    /// A zero ceiling is already met, so it reports 100.
    pub fn new(allocated_bytes: u64, ceiling_bytes: u64, available_bytes: u64) -> Self {
        Self {
            percent: percent_of(allocated_bytes, ceiling_bytes),
            allocated_bytes,
            available_bytes,
        }
    }

    /// The zero-state sample emitted after an emergency release.
    pub fn zero(available_bytes: u64) -> Self {
        Self {
            percent: 0,
            allocated_bytes: 0,
            available_bytes,
        }
    }
}

fn percent_of(part: u64, whole: u64) -> u8 {
    if whole == 0 {
        return 100;
    }
    let pct = (part as u128 * 100) / whole as u128;
    pct.min(100) as u8
}

/// Alerts surfaced to the observer. None of them is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    #[error("available memory {available_bytes} bytes fell below the safety floor of {floor_bytes} bytes; stopping")]
    SafetyFloorBreached {
        available_bytes: u64,
        floor_bytes: u64,
    },

    #[error("memory exhausted: a {requested_bytes}-byte block was refused after {held_bytes} bytes were allocated")]
    AllocationExhausted {
        requested_bytes: u64,
        held_bytes: u64,
    },

    #[error("unexpected error: {detail}")]
    UnexpectedRuntime { detail: String },
}

impl Alert {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Final accounting for one run. Carried by the `Completed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub termination: Termination,
    pub allocated_bytes: u64,
    pub target_ceiling_bytes: u64,
    pub blocks: u64,
    pub peak_bytes: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Progress(Progress),
    Alert(Alert),
    Completed(RunSummary),
}

impl EngineEvent {
    pub fn is_progress(&self) -> bool {
        matches!(self, EngineEvent::Progress(_))
    }
}
