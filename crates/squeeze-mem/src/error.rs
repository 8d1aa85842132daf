use thiserror::Error;

/// Result type local to squeeze-mem.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a block could not be allocated.
#[derive(Debug, Error)]
pub enum Error {
    #[error("store budget exceeded for tag '{tag}': requested {requested} bytes, capacity {capacity}, used {used}")]
    BudgetExceeded {
        tag: &'static str,
        requested: u64,
        capacity: u64,
        used: u64,
    },

    #[error("allocation failed for {bytes} bytes (tag '{tag}')")]
    AllocFailed { tag: &'static str, bytes: u64 },

    #[error("block of {bytes} bytes does not fit in this platform's address space")]
    TooLarge { bytes: u64 },
}

impl Error {
    /// The memory was refused, as opposed to the request being malformed.
    /// Exhaustion is an expected way for a run to end.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Error::BudgetExceeded { .. } | Error::AllocFailed { .. })
    }

    pub fn requested_bytes(&self) -> u64 {
        match self {
            Error::BudgetExceeded { requested, .. } => *requested,
            Error::AllocFailed { bytes, .. } | Error::TooLarge { bytes } => *bytes,
        }
    }
}
