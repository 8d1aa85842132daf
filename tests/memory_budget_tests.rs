//! Store budget and block store accounting tests

use squeeze_core::prelude::*;
use squeeze_mem::{BlockStore, Filler, StoreBudget};
use std::sync::{Arc, Mutex};
use std::thread;

const KIB: u64 = 1024;

#[test]
fn test_budget_acquire_release() {
    let budget = StoreBudget::new(1024 * KIB);

    assert_eq!(budget.used_bytes(), 0);

    let guard = budget
        .try_acquire(100 * KIB, "test")
        .expect("Acquire failed");
    assert_eq!(budget.used_bytes(), 100 * KIB);
    assert_eq!(guard.bytes(), 100 * KIB);
    assert_eq!(guard.tag(), "test");

    drop(guard);
    assert_eq!(budget.used_bytes(), 0);
}

#[test]
fn test_budget_exhaustion() {
    let budget = StoreBudget::new(500 * KIB);

    let guard1 = budget
        .try_acquire(400 * KIB, "test")
        .expect("First acquire failed");

    // 600KB > 500KB
    assert!(budget.try_acquire(200 * KIB, "test").is_none());
    assert_eq!(budget.used_bytes(), 400 * KIB);

    drop(guard1);
    let guard2 = budget
        .try_acquire(200 * KIB, "test")
        .expect("Acquire after release failed");
    assert_eq!(budget.used_bytes(), 200 * KIB);
    drop(guard2);
}

#[test]
fn test_uncapped_budget_only_accounts() {
    let budget = StoreBudget::uncapped();
    assert!(!budget.is_capped());
    let _a = budget.try_acquire(u64::MAX / 2, "a").unwrap();
    assert!(budget.try_acquire(u64::MAX / 2, "b").is_some());
}

#[test]
fn test_store_bytes_match_budget() {
    let budget = StoreBudget::new(64 * KIB);
    let mut store = BlockStore::with_budget(budget.clone(), Filler::Zero);

    for _ in 0..4 {
        store.allocate(16 * KIB).unwrap();
    }
    assert_eq!(store.held_bytes(), 64 * KIB);
    assert_eq!(budget.used_bytes(), 64 * KIB);

    let err = store.allocate(16 * KIB).unwrap_err();
    assert!(err.is_exhaustion());
    assert_eq!(store.len(), 4);

    assert_eq!(store.release_all(), 64 * KIB);
    assert_eq!(budget.used_bytes(), 0);
    assert_eq!(store.peak_bytes(), 64 * KIB);
}

#[test]
fn test_shared_budget_spans_stores() {
    let budget = StoreBudget::new(48 * KIB);
    let mut a = BlockStore::with_budget(budget.clone(), Filler::Zero);
    let mut b = BlockStore::with_budget(budget.clone(), Filler::new(FillPattern::Pseudorandom, 9));

    a.allocate(32 * KIB).unwrap();
    assert!(b.allocate(32 * KIB).unwrap_err().is_exhaustion());
    b.allocate(16 * KIB).unwrap();
    assert_eq!(budget.used_bytes(), 48 * KIB);
}

#[test]
fn test_release_from_another_thread() {
    let store = Arc::new(Mutex::new(BlockStore::new(Filler::Zero)));
    {
        let mut s = store.lock().unwrap();
        for _ in 0..8 {
            s.allocate(8 * KIB).unwrap();
        }
    }

    let remote = Arc::clone(&store);
    let freed = thread::spawn(move || remote.lock().unwrap().release_all())
        .join()
        .unwrap();
    assert_eq!(freed, 64 * KIB);
    assert!(store.lock().unwrap().is_empty());
}

#[test]
fn test_concurrent_budget_never_overcommits() {
    let budget = StoreBudget::new(100 * KIB);
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let b = budget.clone();
            thread::spawn(move || {
                let mut held = Vec::new();
                for _ in 0..10 {
                    if let Some(g) = b.try_acquire(5 * KIB, "t") {
                        held.push(g);
                    }
                    assert!(b.used_bytes() <= 100 * KIB);
                }
                held.len()
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(budget.used_bytes(), 0);
}
