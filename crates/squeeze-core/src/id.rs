//! Strongly-typed identifiers used across the engine.
//!
//! Downstream crates (exec, mem, cli) should *not* use raw integers for IDs.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

// Handle returned by `BlockStore::allocate`; sequential within one store.
new_id!(BlockId);
new_id!(RunId);

impl RunId {
    /// Fresh id for a new run. Runs are not replayed, so a random id is fine here
    /// (block ids stay per-store counters).
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().as_u128() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_kind() {
        assert_eq!(BlockId::new(7).to_string(), "BlockId(7)");
        assert_eq!(RunId::new(3).get(), 3);
    }

    #[test]
    fn fresh_run_ids_differ() {
        assert_ne!(RunId::fresh(), RunId::fresh());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&BlockId::new(42)).unwrap();
        assert_eq!(json, "42");
    }
}
