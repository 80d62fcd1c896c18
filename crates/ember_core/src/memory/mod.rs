//! # Memory Management
//!
//! One arena, one allocator, one lock.
//!
//! ## Design Philosophy
//!
//! All engine memory comes out of a single region reserved at startup:
//! - Blocks are carved with exact-fit, then first-fit, then bump placement
//! - Freed blocks coalesce with free neighbours immediately
//! - Free space that reaches the frontier folds back into the unformatted tail
//!
//! Block metadata lives beside the arena, not inside it, so payload bytes are
//! never reinterpreted as headers.

mod allocator;
mod arena;
mod block;
mod heap;

pub use allocator::BlockAllocator;
pub use arena::{align_up, Arena, ArenaOrigin, PAGE_SIZE};
pub use block::{BlockInfo, BlockState, HeapPtr, DEFAULT_ALIGNMENT, HEADER_SIZE};

/// Counters and block census for one allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Arena size in bytes.
    pub capacity: usize,
    /// Bytes held by live allocations, headers included.
    pub used: usize,
    /// First byte of the unformatted tail.
    pub frontier: usize,
    /// Live allocations.
    pub allocated_blocks: usize,
    /// Blocks on the free list.
    pub free_blocks: usize,
    /// Largest payload on the free list.
    pub largest_free_block: usize,
    /// Successful allocations since creation.
    pub allocations: u64,
    /// Successful deallocations since creation.
    pub deallocations: u64,
}
