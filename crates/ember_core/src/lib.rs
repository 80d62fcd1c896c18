//! # EMBER Core
//!
//! The two infrastructure services every other engine subsystem leans on:
//! - A block allocator over a single pre-reserved arena
//! - A bounded work queue feeding a pool of worker threads
//!
//! ## Architecture Rules
//!
//! 1. **One arena, one lock domain** - every allocator call is serialized
//! 2. **No lock on the queue cursors** - slots are claimed with CAS
//! 3. **Corruption is fatal** - invariant violations poison the allocator and
//!    are routed to [`fatal::abort_with`] by callers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ember_core::{BlockAllocator, WorkQueue, WorkQueueConfig};
//! use ember_core::fatal::OrAbort;
//!
//! let allocator = Arc::new(BlockAllocator::new(64 * 1024 * 1024).or_abort());
//! let queue = WorkQueue::provisioned(&WorkQueueConfig::default(), Arc::clone(&allocator)).or_abort();
//!
//! queue.add_work(|n: u32| println!("item {n}"), 7);
//! queue.wait();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod fatal;
pub mod jobs;
pub mod memory;

pub use config::{AllocatorConfig, EmberConfig, WorkQueueConfig};
pub use error::{AllocError, AllocResult, ConfigError, QueueError, QueueResult, Violation};
pub use jobs::{QueueStats, Semaphore, WorkQueue};
pub use memory::{
    AllocatorStats, Arena, ArenaOrigin, BlockAllocator, BlockInfo, BlockState, HeapPtr,
    DEFAULT_ALIGNMENT, HEADER_SIZE, PAGE_SIZE,
};
