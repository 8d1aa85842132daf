//! Run configuration that downstream crates can serialize/deserialize.
//!
//! Three sources, lowest priority first: `Default`, environment (`from_env`), and a
//! YAML settings document (`Settings`). The CLI applies its own flags last.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

/// How a freshly allocated block is written. Either way every page is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillPattern {
    #[default]
    Zero,
    /// Keyed blake3 output stream; reproducible for a given seed.
    #[serde(alias = "random")]
    Pseudorandom,
}

impl FromStr for FillPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" | "zeros" => Ok(FillPattern::Zero),
            "random" | "pseudorandom" => Ok(FillPattern::Pseudorandom),
            other => Err(Error::Config(format!(
                "unknown fill pattern '{other}'; expected 'zero' or 'random'"
            ))),
        }
    }
}

/// Immutable configuration of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqueezeConfig {
    /// Size of every block, in bytes.
    pub block_size_bytes: u64,

    /// Target allocations per second (across all workers).
    pub rate_per_second: u32,

    /// Percentage of the available memory at start that the run leaves untouched.
    pub reserve_percent: f64,

    /// Absolute available-memory floor; crossing it stops the run.
    pub safety_floor_bytes: u64,

    /// `None` runs one allocation loop; `Some(n)` runs `n` parallel workers.
    pub parallel_workers: Option<u32>,

    /// SafetyMonitor poll period.
    pub monitor_interval_ms: u64,

    /// Aggregate progress cadence while parallel workers run.
    pub progress_interval_ms: u64,

    pub fill: FillPattern,

    /// Seed for `FillPattern::Pseudorandom`.
    pub seed: Option<u64>,

    /// Optional hard cap on the bytes one run may hold. Refusals look exactly like
    /// the platform refusing an allocation.
    pub max_store_bytes: Option<u64>,
}

impl Default for SqueezeConfig {
    fn default() -> Self {
        Self {
            block_size_bytes: 10 * MIB,
            rate_per_second: 500,
            reserve_percent: 2.0,
            safety_floor_bytes: 256 * MIB,
            parallel_workers: None,
            monitor_interval_ms: 500,
            progress_interval_ms: 100,
            fill: FillPattern::Zero,
            seed: None,
            max_store_bytes: None,
        }
    }
}

/// Worker count used when parallel mode is switched on without a number.
pub const DEFAULT_PARALLEL_WORKERS: u32 = 4;

impl SqueezeConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SQUEEZE_BLOCK_SIZE_BYTES`: block size in bytes
    /// - `SQUEEZE_RATE_PER_SECOND`: allocations per second
    /// - `SQUEEZE_RESERVE_PERCENT`: reserved share of available memory
    /// - `SQUEEZE_SAFETY_FLOOR_BYTES`: available-memory floor
    /// - `SQUEEZE_PARALLEL_WORKERS`: worker count (`0` = single worker)
    /// - `SQUEEZE_MONITOR_INTERVAL_MS`, `SQUEEZE_PROGRESS_INTERVAL_MS`
    /// - `SQUEEZE_FILL`: `zero` or `random`
    /// - `SQUEEZE_SEED`: fill seed
    /// - `SQUEEZE_MAX_STORE_BYTES`: per-run byte cap
    ///
    /// Unparsable values are ignored, as if unset.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse::<u64>("SQUEEZE_BLOCK_SIZE_BYTES") {
            cfg.block_size_bytes = v;
        }

        if let Some(v) = env_parse::<u32>("SQUEEZE_RATE_PER_SECOND") {
            cfg.rate_per_second = v;
        }

        if let Some(v) = env_parse::<f64>("SQUEEZE_RESERVE_PERCENT") {
            cfg.reserve_percent = v;
        }

        if let Some(v) = env_parse::<u64>("SQUEEZE_SAFETY_FLOOR_BYTES") {
            cfg.safety_floor_bytes = v;
        }

        if let Some(v) = env_parse::<u32>("SQUEEZE_PARALLEL_WORKERS") {
            cfg.parallel_workers = (v > 0).then_some(v);
        }

        if let Some(v) = env_parse::<u64>("SQUEEZE_MONITOR_INTERVAL_MS") {
            cfg.monitor_interval_ms = v;
        }

        if let Some(v) = env_parse::<u64>("SQUEEZE_PROGRESS_INTERVAL_MS") {
            cfg.progress_interval_ms = v;
        }

        if let Some(v) = env_parse::<FillPattern>("SQUEEZE_FILL") {
            cfg.fill = v;
        }

        if let Some(v) = env_parse::<u64>("SQUEEZE_SEED") {
            cfg.seed = Some(v);
        }

        if let Some(v) = env_parse::<u64>("SQUEEZE_MAX_STORE_BYTES") {
            cfg.max_store_bytes = Some(v);
        }

        cfg
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.block_size_bytes == 0 {
            return Err(Error::Config("block_size_bytes must be > 0".into()));
        }
        if usize::try_from(self.block_size_bytes).is_err() {
            return Err(Error::Config(format!(
                "block_size_bytes {} does not fit in this platform's address space",
                self.block_size_bytes
            )));
        }
        if self.rate_per_second == 0 {
            return Err(Error::Config("rate_per_second must be > 0".into()));
        }
        if !self.reserve_percent.is_finite() || !(0.0..=100.0).contains(&self.reserve_percent) {
            return Err(Error::Config(format!(
                "reserve_percent must be within 0..=100, got {}",
                self.reserve_percent
            )));
        }
        if self.parallel_workers == Some(0) {
            return Err(Error::Config("parallel_workers must be > 0 when set".into()));
        }
        if self.monitor_interval_ms == 0 || self.progress_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be > 0 ms".into()));
        }
        Ok(())
    }

    /// Ceiling for a run that starts with `available_bytes` free:
    /// `available * (1 - reserve_percent / 100)`, rounded down.
    pub fn target_ceiling(&self, available_bytes: u64) -> u64 {
        let reserve = (available_bytes as f64 * (self.reserve_percent / 100.0)).ceil();
        let reserve = if reserve >= available_bytes as f64 {
            available_bytes
        } else {
            reserve as u64
        };
        available_bytes - reserve
    }

    /// Number of allocation loops this config runs.
    pub fn worker_count(&self) -> u32 {
        self.parallel_workers.unwrap_or(1)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// The settings document a shell persists, in the units a human edits
/// (MiB, on/off switches). Only the keys present in the document override the
/// config they are applied to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocations_per_second: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_multiprocessing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_processes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<FillPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_interval_ms: Option<u64>,
}

impl Settings {
    /// Every key spelled out with the shipped defaults.
    pub fn shipped() -> Self {
        Self {
            block_size_mb: Some(10),
            allocations_per_second: Some(500),
            reserve_percent: Some(2.0),
            memory_limit_mb: Some(256),
            use_multiprocessing: Some(false),
            worker_processes: Some(DEFAULT_PARALLEL_WORKERS),
            fill: Some(FillPattern::Zero),
            seed: None,
            monitor_interval_ms: Some(500),
        }
    }

    pub fn from_yaml(doc: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(doc)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply these settings on top of `base` (usually `SqueezeConfig::from_env()`).
    /// Absent keys leave `base` alone.
    pub fn apply(&self, base: SqueezeConfig) -> SqueezeConfig {
        let parallel_workers = match self.use_multiprocessing {
            Some(true) => Some(
                self.worker_processes
                    .or(base.parallel_workers)
                    .unwrap_or(DEFAULT_PARALLEL_WORKERS),
            ),
            Some(false) => None,
            // Without the switch, a worker count only resizes a parallel base.
            None => base
                .parallel_workers
                .map(|n| self.worker_processes.unwrap_or(n)),
        };

        SqueezeConfig {
            block_size_bytes: self
                .block_size_mb
                .map_or(base.block_size_bytes, |mb| mb.saturating_mul(MIB)),
            rate_per_second: self.allocations_per_second.unwrap_or(base.rate_per_second),
            reserve_percent: self.reserve_percent.unwrap_or(base.reserve_percent),
            safety_floor_bytes: self
                .memory_limit_mb
                .map_or(base.safety_floor_bytes, |mb| mb.saturating_mul(MIB)),
            parallel_workers,
            monitor_interval_ms: self.monitor_interval_ms.unwrap_or(base.monitor_interval_ms),
            fill: self.fill.unwrap_or(base.fill),
            seed: self.seed.or(base.seed),
            ..base
        }
    }

    pub fn into_config(self) -> SqueezeConfig {
        self.apply(SqueezeConfig::default())
    }
}

/// Parse a human-readable byte size: `"512"`, `"64K"`, `"10M"`, `"10MiB"`, `"2G"`.
/// Suffixes are binary and case-insensitive.
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let upper = s.to_ascii_uppercase();
    let digits_end = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (num, suffix) = upper.split_at(digits_end);
    if num.is_empty() {
        return Err(Error::Config(format!("invalid size '{s}'")));
    }
    let value: u64 = num
        .parse()
        .map_err(|_| Error::Config(format!("invalid size '{s}'")))?;
    let mult = match suffix.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => MIB,
        "G" | "GB" | "GIB" => 1024 * MIB,
        "T" | "TB" | "TIB" => 1024 * 1024 * MIB,
        other => {
            return Err(Error::Config(format!(
                "unknown size suffix '{other}' in '{s}'"
            )))
        }
    };
    value
        .checked_mul(mult)
        .ok_or_else(|| Error::Config(format!("size '{s}' overflows u64")))
}
