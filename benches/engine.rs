use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use squeeze_core::config::FillPattern;
use squeeze_core::id::BlockId;
use squeeze_exec::{next_deadline, Pacer};
use squeeze_mem::{Block, BlockStore, Filler, StoreBudget};
use std::time::Instant;

const KIB: u64 = 1024;

fn bench_pacing(c: &mut Criterion) {
    let start = Instant::now();
    c.bench_function("next_deadline", |b| {
        b.iter(|| next_deadline(black_box(start), black_box(500)))
    });
    c.bench_function("pacer_advance_1k", |b| {
        b.iter(|| {
            let mut pacer = Pacer::new(1000, start);
            for _ in 0..1000 {
                pacer.advance();
            }
            pacer.deadline()
        })
    });
}

fn bench_materialise(c: &mut Criterion) {
    let budget = StoreBudget::uncapped();
    let mut group = c.benchmark_group("materialise_1mib");
    for (name, filler) in [
        ("zero", Filler::Zero),
        ("pseudorandom", Filler::new(FillPattern::Pseudorandom, 7)),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &filler, |b, filler| {
            b.iter(|| Block::materialise(&budget, BlockId::new(0), 1024 * KIB, filler).unwrap())
        });
    }
    group.finish();
}

fn bench_store_cycle(c: &mut Criterion) {
    c.bench_function("store_allocate_release_64x64k", |b| {
        b.iter(|| {
            let mut store = BlockStore::new(Filler::Zero);
            for _ in 0..64 {
                store.allocate(64 * KIB).unwrap();
            }
            store.release_all()
        })
    });
}

criterion_group!(engine, bench_pacing, bench_materialise, bench_store_cycle);
criterion_main!(engine);
