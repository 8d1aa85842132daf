//! Abstract memory budget interfaces.
//!
//! The concrete implementation lives in `squeeze-mem`, where the BlockStore uses it
//! to account every block it holds. Only traits live here so any crate can talk
//! about budgets without pulling the allocator.

/// A guard returned by a memory budget when bytes are acquired.
///
/// The concrete type lives in `squeeze-mem`. It must be RAII (releases on Drop),
/// `Send`, and `panic`-safe.
pub trait BudgetGuard: Send {
    /// Number of bytes currently accounted for by this guard.
    fn bytes(&self) -> u64;
    /// Optional debug tag for metrics/tracing.
    fn tag(&self) -> &'static str {
        "guard"
    }
}

/// A handle representing a byte-cap enforcer.
///
/// `try_acquire` is called before a block is materialised. If `None` is returned
/// the caller must treat the request as refused.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    /// Attempt to acquire `bytes` from the live budget. Returns a guard on success.
    fn try_acquire(&self, bytes: u64, tag: &'static str) -> Option<Self::Guard>;

    /// Total configured capacity (bytes). `u64::MAX` means uncapped.
    fn capacity_bytes(&self) -> u64;

    /// Bytes currently held by live guards.
    fn used_bytes(&self) -> u64;
}

// NOTE: Do *not* add default impls here that would silently "allow" allocations.
// The mem crate is the only place where guards should be constructed.
