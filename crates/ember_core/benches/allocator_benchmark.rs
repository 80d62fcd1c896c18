//! # Block Allocator Benchmark
//!
//! Measures:
//! 1. Bump allocation into an empty arena
//! 2. Exact-fit reuse from the free list
//! 3. Fragmented first-fit with splits and coalescing
//! 4. In-place growth against relocation

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ember_core::BlockAllocator;

const ARENA: usize = 16 * 1024 * 1024;

/// Deterministic size sequence.
fn sizes(count: usize, seed: u64) -> Vec<usize> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            16 + (state % 512) as usize
        })
        .collect()
}

fn bench_bump(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_bump");

    for count in [1_000, 10_000] {
        let sizes = sizes(count, 0x9E37_79B9);
        group.bench_with_input(BenchmarkId::from_parameter(count), &sizes, |b, sizes| {
            b.iter(|| {
                let allocator = BlockAllocator::new(ARENA).unwrap();
                for &size in sizes {
                    black_box(allocator.allocate(size).unwrap());
                }
                black_box(allocator.used())
            });
        });
    }

    group.finish();
}

fn bench_exact_fit_reuse(c: &mut Criterion) {
    let allocator = BlockAllocator::new(ARENA).unwrap();
    let live: Vec<_> = (0..1_000).map(|_| allocator.allocate(128).unwrap()).collect();

    c.bench_function("allocator_exact_fit_reuse", |b| {
        b.iter(|| {
            let ptr = live[500];
            allocator.deallocate(ptr).unwrap();
            black_box(allocator.allocate(128).unwrap())
        });
    });
}

fn bench_fragmented(c: &mut Criterion) {
    let sizes = sizes(4_096, 0xDEAD_BEEF);

    c.bench_function("allocator_fragmented_churn", |b| {
        b.iter(|| {
            let allocator = BlockAllocator::new(ARENA).unwrap();
            let mut live: Vec<_> = sizes.iter().map(|&s| allocator.allocate(s).unwrap()).collect();

            // Free every other block, then refill the holes with smaller requests.
            for ptr in live.iter().skip(1).step_by(2) {
                allocator.deallocate(*ptr).unwrap();
            }
            for slot in live.iter_mut().skip(1).step_by(2) {
                *slot = allocator.allocate(24).unwrap();
            }
            for ptr in live {
                allocator.deallocate(ptr).unwrap();
            }
            black_box(allocator.stats().free_blocks)
        });
    });
}

fn bench_reallocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_reallocate");

    group.bench_function("grow_at_frontier", |b| {
        b.iter(|| {
            let allocator = BlockAllocator::new(ARENA).unwrap();
            let mut ptr = allocator.allocate(64).unwrap();
            for size in (128..=64 * 1024).step_by(256) {
                ptr = allocator.reallocate(Some(ptr), size).unwrap().unwrap();
            }
            black_box(ptr)
        });
    });

    group.bench_function("grow_with_relocation", |b| {
        b.iter(|| {
            let allocator = BlockAllocator::new(ARENA).unwrap();
            let mut ptr = allocator.allocate(64).unwrap();
            for size in (128..=16 * 1024).step_by(256) {
                let _fence = allocator.allocate(16).unwrap();
                ptr = allocator.reallocate(Some(ptr), size).unwrap().unwrap();
            }
            black_box(ptr)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_bump,
    bench_exact_fit_reuse,
    bench_fragmented,
    bench_reallocate,
);
criterion_main!(benches);
