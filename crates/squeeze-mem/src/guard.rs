//! Store budget + RAII block guards.
//!
//! Every block carries a guard; dropping the block returns its bytes to the
//! budget (panic-safe). One budget may be shared by several stores, which is how a
//! per-run cap spans all parallel workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use squeeze_core::budget::{BudgetGuard, MemoryBudget};

/// Shared inner state for the budget.
struct BudgetInner {
    capacity: u64,
    used: AtomicU64,
}

impl BudgetInner {
    fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: AtomicU64::new(0),
        }
    }

    fn try_acquire(&self, bytes: u64) -> bool {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = match cur.checked_add(bytes) {
                Some(n) if n <= self.capacity => n,
                _ => return false,
            };
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self, bytes: u64) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Byte budget shared by the stores of one run.
#[derive(Clone)]
pub struct StoreBudget {
    inner: Arc<BudgetInner>,
}

impl StoreBudget {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            inner: Arc::new(BudgetInner::new(capacity_bytes)),
        }
    }

    /// A budget that only accounts; the platform is the only limit.
    pub fn uncapped() -> Self {
        Self::new(u64::MAX)
    }

    pub fn is_capped(&self) -> bool {
        self.inner.capacity != u64::MAX
    }
}

impl std::fmt::Debug for StoreBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBudget")
            .field("capacity", &self.inner.capacity)
            .field("used", &self.inner.used.load(Ordering::Relaxed))
            .finish()
    }
}

/// RAII guard that accounts for one block's bytes.
/// Dropping it returns bytes to the budget.
pub struct BlockGuard {
    inner: Arc<BudgetInner>,
    bytes: u64,
    tag: &'static str,
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            // NOTE: do not log here to keep drop path fast.
            self.bytes = 0;
        }
    }
}

// ----- trait impls -----

impl BudgetGuard for BlockGuard {
    fn bytes(&self) -> u64 {
        self.bytes
    }
    fn tag(&self) -> &'static str {
        self.tag
    }
}

impl MemoryBudget for StoreBudget {
    type Guard = BlockGuard;

    fn try_acquire(&self, bytes: u64, tag: &'static str) -> Option<Self::Guard> {
        if bytes == 0 || self.inner.try_acquire(bytes) {
            Some(BlockGuard {
                inner: Arc::clone(&self.inner),
                bytes,
                tag,
            })
        } else {
            None
        }
    }

    fn capacity_bytes(&self) -> u64 {
        self.inner.capacity
    }

    fn used_bytes(&self) -> u64 {
        self.inner.used.load(Ordering::Relaxed)
    }
}
