//! # EMBER Soak Runner
//!
//! Headless stress run for the core services. Every work item allocates,
//! grows, shrinks and frees blocks in one shared arena while the queue that
//! runs it lives in the same arena.
//!
//! ## Usage
//!
//! ```bash
//! # Defaults: 64 MiB arena, one worker per core minus one, 16 waves
//! ./ember_soak
//!
//! # Explicit config and wave count
//! RUST_LOG=debug ./ember_soak crates/ember/config/ember.toml 100
//! ```
//!
//! Any invariant violation aborts the process.

use std::sync::Arc;
use std::time::Instant;

use ember_core::fatal::{abort_with, OrAbort};
use ember_core::{BlockAllocator, EmberConfig, HeapPtr, WorkQueue};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

/// Items published per wave.
const ITEMS_PER_WAVE: u64 = 4_096;
/// Waves run when none is given on the command line.
const DEFAULT_WAVES: u64 = 16;
/// Largest block a single item requests.
const MAX_BLOCK: usize = 2_048;
/// Blocks one item holds at a time.
const MAX_LIVE: usize = 24;

/// Input to one work item.
struct SoakItem {
    allocator: Arc<BlockAllocator>,
    seed: u64,
}

/// A block owned by a work item and the byte it was filled with.
struct Owned {
    ptr: HeapPtr,
    len: usize,
    tag: u8,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => EmberConfig::load(&path).or_abort(),
        None => EmberConfig::default(),
    };
    let waves = match args.next() {
        Some(raw) => raw.parse::<u64>().or_abort(),
        None => DEFAULT_WAVES,
    };

    let allocator = Arc::new(BlockAllocator::from_config(&config.allocator, None).or_abort());
    let queue = WorkQueue::provisioned(&config.work_queue, Arc::clone(&allocator)).or_abort();
    let baseline = allocator.used();

    tracing::info!(
        capacity = allocator.capacity(),
        workers = queue.worker_count(),
        ring = queue.capacity(),
        waves,
        "soak started"
    );

    let started = Instant::now();
    for wave in 0..waves {
        let wave_started = Instant::now();
        for item in 0..ITEMS_PER_WAVE {
            queue.add_work(
                soak_item,
                SoakItem {
                    allocator: Arc::clone(&allocator),
                    seed: wave * ITEMS_PER_WAVE + item,
                },
            );
        }
        queue.wait();

        allocator.check_integrity().or_abort();
        if allocator.used() != baseline {
            abort_with(format!(
                "wave {wave} leaked {} bytes",
                allocator.used().saturating_sub(baseline)
            ));
        }

        let stats = allocator.stats();
        tracing::info!(
            wave,
            elapsed_ms = wave_started.elapsed().as_millis(),
            frontier = stats.frontier,
            free_blocks = stats.free_blocks,
            largest_free = stats.largest_free_block,
            "wave complete"
        );
    }

    drop(queue);
    let stats = allocator.stats();
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis(),
        allocations = stats.allocations,
        deallocations = stats.deallocations,
        "soak finished"
    );

    match Arc::try_unwrap(allocator) {
        Ok(allocator) => {
            let arena = allocator.destroy();
            tracing::debug!(capacity = arena.capacity(), "arena released");
        }
        Err(_) => abort_with("allocator still shared after every worker stopped"),
    }
}

/// One unit of soak work: a short random sequence of allocator calls whose
/// payloads are checked after every move.
fn soak_item(item: SoakItem) {
    let SoakItem { allocator, seed } = item;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut live: Vec<Owned> = Vec::with_capacity(MAX_LIVE);
    let steps = rng.gen_range(8..64);

    for _ in 0..steps {
        let roll = rng.gen_range(0..10);
        if live.len() < MAX_LIVE && (roll < 5 || live.is_empty()) {
            let len = rng.gen_range(1..=MAX_BLOCK);
            let ptr = allocator.allocate(len).or_abort();
            let owned = Owned {
                ptr,
                len,
                tag: rng.gen_range(1..=u8::MAX),
            };
            fill(&allocator, &owned);
            live.push(owned);
        } else if roll < 8 {
            let index = rng.gen_range(0..live.len());
            let new_len = rng.gen_range(1..=MAX_BLOCK);
            let owned = &mut live[index];
            let kept = owned.len.min(new_len);
            let Some(ptr) = allocator.reallocate(Some(owned.ptr), new_len).or_abort() else {
                abort_with("non-zero reallocate returned no block");
            };
            owned.ptr = ptr;
            verify(&allocator, owned, kept);
            owned.len = new_len;
            fill(&allocator, owned);
        } else {
            let owned = live.swap_remove(rng.gen_range(0..live.len()));
            verify(&allocator, &owned, owned.len);
            allocator.deallocate(owned.ptr).or_abort();
        }
    }

    for owned in live {
        verify(&allocator, &owned, owned.len);
        allocator.deallocate(owned.ptr).or_abort();
    }
}

fn fill(allocator: &BlockAllocator, owned: &Owned) {
    let mut payload = allocator.payload(owned.ptr).or_abort();
    payload[..owned.len].fill(owned.tag);
}

fn verify(allocator: &BlockAllocator, owned: &Owned, len: usize) {
    let payload = allocator.payload(owned.ptr).or_abort();
    if let Some(offset) = payload[..len].iter().position(|&b| b != owned.tag) {
        abort_with(format!(
            "payload {} corrupted at byte {offset}: expected {:#04x}, found {:#04x}",
            owned.ptr, owned.tag, payload[offset]
        ));
    }
}
