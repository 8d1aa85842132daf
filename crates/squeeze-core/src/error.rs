use thiserror::Error;

use crate::telemetry::TelemetryError;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Settings document error: {0}")]
    Settings(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Settings(e.to_string())
    }
}
