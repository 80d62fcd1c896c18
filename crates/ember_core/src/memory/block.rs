//! # Block Headers
//!
//! Metadata for the header+payload units an allocator carves out of its arena.
//!
//! Headers are not stored inside the arena bytes. They live in a side table
//! keyed by header offset, but every block still reserves [`HEADER_SIZE`]
//! bytes of address space in front of its payload, so offsets and accounting
//! match a classic in-band layout:
//!
//! ```text
//!  0        32          132       164               364
//!  ┌────────┬───────────┬─────────┬─────────────────┬──────────────┐
//!  │ header │ payload A │ header  │    payload B    │  unformatted │
//!  │        │ (100 B)   │         │    (200 B)      │     tail     │
//!  └────────┴───────────┴─────────┴─────────────────┴──────────────┘
//! ```

use std::num::NonZeroU32;

/// Address space reserved in front of every payload.
pub const HEADER_SIZE: usize = 32;

/// Default vector width; aligned requests round sizes up to at least this.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// State of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockState {
    /// Unformatted space past the bump frontier.
    None,
    /// Handed out to a caller.
    Allocated,
    /// On the free list.
    Free,
}

/// Handle to an allocation: the owning allocator's id and the payload's byte
/// offset inside its arena.
///
/// Offsets are never zero because every payload follows a header. Handles
/// are only minted by an allocator, and presenting one to a different
/// allocator is reported as a foreign pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr {
    owner: NonZeroU32,
    offset: usize,
}

impl HeapPtr {
    #[inline]
    pub(crate) const fn new(owner: NonZeroU32, offset: usize) -> Self {
        Self { owner, offset }
    }

    /// Payload offset inside the arena.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }

    /// Id of the allocator that handed this out.
    #[inline]
    #[must_use]
    pub const fn owner(self) -> NonZeroU32 {
        self.owner
    }

    /// Offset of the header in front of this payload, if there is room for one.
    #[inline]
    pub(crate) const fn header(self) -> Option<usize> {
        self.offset.checked_sub(HEADER_SIZE)
    }
}

impl std::fmt::Display for HeapPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}@{}", self.offset, self.owner)
    }
}

/// Side-table entry for a formatted block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub(crate) state: BlockState,
    pub(crate) payload_size: usize,
    /// Header offset of the block immediately before this one in address order.
    pub(crate) physical_prev: Option<usize>,
}

impl BlockHeader {
    #[inline]
    pub(crate) const fn allocated(payload_size: usize, physical_prev: Option<usize>) -> Self {
        Self {
            state: BlockState::Allocated,
            payload_size,
            physical_prev,
        }
    }

    #[inline]
    pub(crate) const fn free(payload_size: usize, physical_prev: Option<usize>) -> Self {
        Self {
            state: BlockState::Free,
            payload_size,
            physical_prev,
        }
    }

    /// Header plus payload.
    #[inline]
    pub(crate) const fn span(&self) -> usize {
        HEADER_SIZE + self.payload_size
    }
}

/// Snapshot of one block, as returned by [`super::BlockAllocator::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Header offset.
    pub header: usize,
    /// Block state. The last entry may be the unformatted tail.
    pub state: BlockState,
    /// Payload bytes following the header.
    pub payload_size: usize,
    /// Header offset of the preceding block.
    pub physical_prev: Option<usize>,
}

impl BlockInfo {
    /// First byte past this block.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.header + HEADER_SIZE + self.payload_size
    }
}
