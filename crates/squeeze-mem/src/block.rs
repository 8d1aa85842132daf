//! Blocks and the store that owns them.
//!
//! A block is materialised, not reserved: after the fallible reservation every
//! byte is written, so the kernel has to back each page before `allocate` returns.

use squeeze_core::budget::{BudgetGuard, MemoryBudget};
use squeeze_core::config::FillPattern;
use squeeze_core::id::BlockId;

use crate::error::{Error, Result};
use crate::guard::{BlockGuard, StoreBudget};
use crate::tracking::PeakTracker;

const BLOCK_TAG: &str = "block";

/// Writes the contents of a new block.
#[derive(Debug, Clone)]
pub enum Filler {
    Zero,
    /// blake3 XOF keyed by the run seed; each block's stream is derived from its id.
    Pseudorandom { key: [u8; 32] },
}

impl Filler {
    pub fn new(pattern: FillPattern, seed: u64) -> Self {
        match pattern {
            FillPattern::Zero => Filler::Zero,
            FillPattern::Pseudorandom => Filler::Pseudorandom {
                key: blake3::derive_key("memsqueeze 2024 block fill", &seed.to_le_bytes()),
            },
        }
    }

    fn fill(&self, id: BlockId, buf: &mut [u8]) {
        match self {
            // The buffer was written with zeros when it was sized.
            Filler::Zero => {}
            Filler::Pseudorandom { key } => {
                let mut h = blake3::Hasher::new_keyed(key);
                h.update(&id.get().to_le_bytes());
                h.finalize_xof().fill(buf);
            }
        }
    }
}

/// One fixed-size buffer. Its bytes stay accounted until it is dropped.
pub struct Block {
    id: BlockId,
    // Held for its Drop; returns the bytes to the budget.
    guard: BlockGuard,
    buf: Vec<u8>,
}

impl Block {
    /// Reserve `len` bytes against `budget`, allocate them fallibly, and write every byte.
    pub fn materialise(
        budget: &StoreBudget,
        id: BlockId,
        len: u64,
        filler: &Filler,
    ) -> Result<Self> {
        let size = usize::try_from(len).map_err(|_| Error::TooLarge { bytes: len })?;

        let guard = budget
            .try_acquire(len, BLOCK_TAG)
            .ok_or_else(|| Error::BudgetExceeded {
                tag: BLOCK_TAG,
                requested: len,
                capacity: budget.capacity_bytes(),
                used: budget.used_bytes(),
            })?;

        // Budget bytes do not guarantee the allocator agrees; ask fallibly.
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|_| Error::AllocFailed {
            tag: BLOCK_TAG,
            bytes: len,
        })?;
        // Writing the whole length commits every page.
        buf.resize(size, 0u8);
        filler.fill(id, &mut buf);

        Ok(Self { id, guard, buf })
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Accounted size (bytes).
    pub fn len(&self) -> u64 {
        self.guard.bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id)
            .field("len", &self.buf.len())
            .finish()
    }
}

/// Sole owner of a run's (or one worker's) blocks.
///
/// `held_bytes` always equals the sum of the live blocks' sizes. Nothing outside
/// the store can reach a block; `release_all` is the only way to free them early.
#[derive(Debug)]
pub struct BlockStore {
    budget: StoreBudget,
    filler: Filler,
    blocks: Vec<Block>,
    held_bytes: u64,
    next_id: u64,
    peak: PeakTracker,
}

impl BlockStore {
    /// A store limited only by the platform.
    pub fn new(filler: Filler) -> Self {
        Self::with_budget(StoreBudget::uncapped(), filler)
    }

    /// A store accounting against `budget`, which may be shared with other stores.
    pub fn with_budget(budget: StoreBudget, filler: Filler) -> Self {
        Self {
            budget,
            filler,
            blocks: Vec::new(),
            held_bytes: 0,
            next_id: 0,
            peak: PeakTracker::new(),
        }
    }

    /// Materialise one block of `size` bytes and keep it.
    pub fn allocate(&mut self, size: u64) -> Result<BlockId> {
        let id = BlockId::new(self.next_id);
        let block = Block::materialise(&self.budget, id, size, &self.filler)?;
        self.next_id += 1;

        // Room for the handle is reserved fallibly too; a refusal drops the block.
        self.blocks.try_reserve(1).map_err(|_| Error::AllocFailed {
            tag: BLOCK_TAG,
            bytes: size,
        })?;
        self.held_bytes += block.len();
        self.blocks.push(block);
        self.peak.record_used(self.held_bytes);
        Ok(id)
    }

    /// Drop every block. Returns the number of bytes freed.
    pub fn release_all(&mut self) -> u64 {
        let freed = self.held_bytes;
        self.blocks = Vec::new();
        self.held_bytes = 0;

        #[cfg(feature = "tracing")]
        if freed > 0 {
            tracing::debug!(freed, "released block store");
        }

        freed
    }

    pub fn held_bytes(&self) -> u64 {
        self.held_bytes
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak.peak()
    }

    pub fn budget(&self) -> &StoreBudget {
        &self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;

    #[test]
    fn allocate_tracks_bytes_and_ids() {
        let mut store = BlockStore::new(Filler::Zero);
        let a = store.allocate(4 * KIB).unwrap();
        let b = store.allocate(4 * KIB).unwrap();
        assert_eq!(a, BlockId::new(0));
        assert_eq!(b, BlockId::new(1));
        assert_eq!(store.len(), 2);
        assert_eq!(store.held_bytes(), 8 * KIB);
        assert_eq!(store.budget().used_bytes(), 8 * KIB);
    }

    #[test]
    fn release_all_empties_store_and_budget() {
        let mut store = BlockStore::new(Filler::Zero);
        for _ in 0..3 {
            store.allocate(KIB).unwrap();
        }
        assert_eq!(store.release_all(), 3 * KIB);
        assert!(store.is_empty());
        assert_eq!(store.held_bytes(), 0);
        assert_eq!(store.budget().used_bytes(), 0);
        assert_eq!(store.peak_bytes(), 3 * KIB);
        assert_eq!(store.release_all(), 0);
    }

    #[test]
    fn capped_budget_refuses_as_exhaustion() {
        let mut store = BlockStore::with_budget(StoreBudget::new(2 * KIB), Filler::Zero);
        store.allocate(KIB).unwrap();
        store.allocate(KIB).unwrap();
        let err = store.allocate(KIB).unwrap_err();
        assert!(err.is_exhaustion());
        assert_eq!(err.requested_bytes(), KIB);
        // The refused request left nothing behind.
        assert_eq!(store.held_bytes(), 2 * KIB);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn shared_budget_spans_stores() {
        let budget = StoreBudget::new(3 * KIB);
        let mut a = BlockStore::with_budget(budget.clone(), Filler::Zero);
        let mut b = BlockStore::with_budget(budget.clone(), Filler::Zero);
        a.allocate(2 * KIB).unwrap();
        assert!(b.allocate(2 * KIB).is_err());
        b.allocate(KIB).unwrap();
        assert_eq!(budget.used_bytes(), 3 * KIB);
        a.release_all();
        assert_eq!(budget.used_bytes(), KIB);
    }

    #[test]
    fn zero_fill_writes_zeros() {
        let budget = StoreBudget::uncapped();
        let b = Block::materialise(&budget, BlockId::new(0), 8 * KIB, &Filler::Zero).unwrap();
        assert_eq!(b.len(), 8 * KIB);
        assert!(b.bytes().iter().all(|&x| x == 0));
    }

    #[test]
    fn pseudorandom_fill_is_seeded() {
        let budget = StoreBudget::uncapped();
        let f1 = Filler::new(FillPattern::Pseudorandom, 7);
        let f2 = Filler::new(FillPattern::Pseudorandom, 7);
        let f3 = Filler::new(FillPattern::Pseudorandom, 8);
        let id = BlockId::new(3);
        let a = Block::materialise(&budget, id, KIB, &f1).unwrap();
        let b = Block::materialise(&budget, id, KIB, &f2).unwrap();
        let c = Block::materialise(&budget, id, KIB, &f3).unwrap();
        assert_eq!(a.bytes(), b.bytes());
        assert_ne!(a.bytes(), c.bytes());
        assert!(a.bytes().iter().any(|&x| x != 0));
    }

    #[test]
    fn blocks_differ_within_a_run() {
        let budget = StoreBudget::uncapped();
        let f = Filler::new(FillPattern::Pseudorandom, 1);
        let a = Block::materialise(&budget, BlockId::new(0), KIB, &f).unwrap();
        let b = Block::materialise(&budget, BlockId::new(1), KIB, &f).unwrap();
        assert_ne!(a.bytes(), b.bytes());
    }
}
