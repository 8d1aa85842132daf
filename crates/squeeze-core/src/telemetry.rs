//! Memory telemetry contract.
//!
//! The engine only ever asks one question: how many bytes could the system still
//! hand out right now. It asks often (once per allocation tick plus every monitor
//! poll), so implementations must be cheap.
//!
//! The `/proc/meminfo` reader lives in `squeeze-mem`; this module keeps the trait
//! and two in-process readings used by tests and dry runs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Errors that can occur when sampling system memory.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to read the telemetry source.
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    /// The source was readable but did not contain the expected figure.
    #[error("failed to parse value from {path}: {detail}")]
    Parse { path: String, detail: String },

    /// No telemetry source on this platform.
    #[error("memory telemetry not available: {0}")]
    NotAvailable(String),
}

/// Source of the system's available-memory figure.
pub trait MemoryTelemetry: Send + Sync + 'static {
    /// Bytes the system reports as available for new allocations.
    fn available_bytes(&self) -> Result<u64, TelemetryError>;
}

/// A fixed reading that tests (or a shell doing a dry run) can move by hand.
#[derive(Debug, Default)]
pub struct FixedTelemetry {
    available: AtomicU64,
}

impl FixedTelemetry {
    pub fn new(available_bytes: u64) -> Self {
        Self {
            available: AtomicU64::new(available_bytes),
        }
    }

    pub fn set(&self, available_bytes: u64) {
        self.available.store(available_bytes, Ordering::Release);
    }
}

impl MemoryTelemetry for FixedTelemetry {
    fn available_bytes(&self) -> Result<u64, TelemetryError> {
        Ok(self.available.load(Ordering::Acquire))
    }
}

/// A reading that shrinks by `per_read` bytes every time it is sampled,
/// saturating at zero. Models a machine that is steadily running out of memory.
#[derive(Debug)]
pub struct DrainingTelemetry {
    start: u64,
    per_read: u64,
    reads: AtomicU64,
}

impl DrainingTelemetry {
    pub fn new(start_bytes: u64, per_read: u64) -> Self {
        Self {
            start: start_bytes,
            per_read,
            reads: AtomicU64::new(0),
        }
    }

    /// Number of samples taken so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl MemoryTelemetry for DrainingTelemetry {
    fn available_bytes(&self) -> Result<u64, TelemetryError> {
        let n = self.reads.fetch_add(1, Ordering::AcqRel);
        Ok(self.start.saturating_sub(n.saturating_mul(self.per_read)))
    }
}
