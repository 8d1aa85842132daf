//! System memory telemetry via `/proc/meminfo`.
//!
//! `MemAvailable` is the kernel's estimate of how much a new allocation can use
//! without swapping, which is exactly the figure the ceiling and the safety floor
//! are defined against.

use std::path::{Path, PathBuf};

use squeeze_core::telemetry::{MemoryTelemetry, TelemetryError};

/// Default path to the kernel memory info file.
const MEMINFO_PATH: &str = "/proc/meminfo";

/// System memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MemoryInfo {
    /// Total physical memory in bytes.
    pub total_bytes: u64,
    /// Available memory (as reported by the kernel) in bytes.
    pub available_bytes: u64,
}

impl MemoryInfo {
    /// Reads current memory information from `/proc/meminfo`.
    pub fn read() -> Result<Self, TelemetryError> {
        Self::read_from(Path::new(MEMINFO_PATH))
    }

    pub fn read_from(path: &Path) -> Result<Self, TelemetryError> {
        let content = std::fs::read_to_string(path).map_err(|e| TelemetryError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parses the content of a `/proc/meminfo`-formatted string.
    pub fn parse(content: &str, source_path: &Path) -> Result<Self, TelemetryError> {
        let mut total_kb: Option<u64> = None;
        let mut available_kb: Option<u64> = None;

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            match key {
                "MemTotal:" => total_kb = Some(parse_kb_value(value, source_path)?),
                "MemAvailable:" => available_kb = Some(parse_kb_value(value, source_path)?),
                _ => {}
            }

            if total_kb.is_some() && available_kb.is_some() {
                break;
            }
        }

        let total_kb = total_kb.ok_or_else(|| TelemetryError::Parse {
            path: source_path.display().to_string(),
            detail: "MemTotal not found".to_string(),
        })?;
        let available_kb = available_kb.ok_or_else(|| TelemetryError::Parse {
            path: source_path.display().to_string(),
            detail: "MemAvailable not found".to_string(),
        })?;

        Ok(Self {
            total_bytes: total_kb.saturating_mul(1024),
            available_bytes: available_kb.saturating_mul(1024),
        })
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    /// Returns the memory utilisation as a fraction in `[0.0, 1.0]`.
    pub fn utilisation(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / self.total_bytes as f64
    }

    pub fn available_mb(&self) -> u64 {
        self.available_bytes / (1024 * 1024)
    }

    pub fn total_mb(&self) -> u64 {
        self.total_bytes / (1024 * 1024)
    }
}

/// Parses a numeric string from `/proc/meminfo` (values are in kB).
fn parse_kb_value(s: &str, source_path: &Path) -> Result<u64, TelemetryError> {
    s.parse::<u64>().map_err(|_| TelemetryError::Parse {
        path: source_path.display().to_string(),
        detail: format!("expected integer kB value, got '{s}'"),
    })
}

/// `MemoryTelemetry` backed by `/proc/meminfo`. One small file read per sample.
#[derive(Debug, Clone)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl ProcMeminfo {
    pub fn new() -> Self {
        Self::at(MEMINFO_PATH)
    }

    /// Read from another file in the same format (containers, tests).
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Fails early on platforms without the file.
    pub fn probe() -> Result<Self, TelemetryError> {
        let t = Self::new();
        if !t.path.exists() {
            return Err(TelemetryError::NotAvailable(format!(
                "{} does not exist; only Linux is supported",
                t.path.display()
            )));
        }
        Ok(t)
    }

    pub fn info(&self) -> Result<MemoryInfo, TelemetryError> {
        MemoryInfo::read_from(&self.path)
    }
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTelemetry for ProcMeminfo {
    fn available_bytes(&self) -> Result<u64, TelemetryError> {
        Ok(self.info()?.available_bytes)
    }
}
