//! # Block Allocator
//!
//! General-purpose allocator over a single arena.
//!
//! Every public method takes the allocator's one mutex for its whole
//! duration: one arena, one lock domain. Payload bytes are reached through
//! that same lock, either as a mapped guard or by copying in and out.

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use super::arena::Arena;
use super::block::{BlockInfo, HeapPtr, DEFAULT_ALIGNMENT};
use super::heap::Heap;
use super::AllocatorStats;
use crate::config::AllocatorConfig;
use crate::error::{AllocError, AllocResult};

/// Thread-safe block allocator.
///
/// # Example
///
/// ```rust,ignore
/// let allocator = BlockAllocator::new(4096)?;
///
/// let a = allocator.allocate(100)?;
/// let b = allocator.allocate(200)?;
/// allocator.deallocate(a)?;
///
/// // Exact-fit reuse hands the same block back.
/// assert_eq!(allocator.allocate(100)?, a);
/// ```
pub struct BlockAllocator {
    heap: Mutex<Heap>,
    capacity: usize,
}

impl BlockAllocator {
    /// Reserves a zeroed arena of `capacity` bytes (rounded up to whole pages).
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if `capacity` is zero.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        Ok(Self::with_arena(Arena::reserve(capacity)?))
    }

    /// Builds an allocator from startup configuration.
    ///
    /// With `buffer`, the caller's memory becomes the arena and is zeroed
    /// when `config.clear` is set. Without it, `config.capacity` bytes are
    /// reserved; reserved arenas always start zeroed.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if the capacity is zero or the
    /// buffer is empty.
    pub fn from_config(config: &AllocatorConfig, buffer: Option<Box<[u8]>>) -> AllocResult<Self> {
        let arena = match buffer {
            Some(buffer) => Arena::from_buffer(buffer, config.clear)?,
            None => Arena::reserve(config.capacity)?,
        };
        Ok(Self::with_arena(arena))
    }

    /// Adopts caller memory as the arena, optionally zeroing it.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if the buffer is empty.
    pub fn from_buffer(buffer: impl Into<Box<[u8]>>, clear: bool) -> AllocResult<Self> {
        Ok(Self::with_arena(Arena::from_buffer(buffer, clear)?))
    }

    /// Takes ownership of an existing arena.
    #[must_use]
    pub fn with_arena(arena: Arena) -> Self {
        let capacity = arena.capacity();
        tracing::debug!(capacity, origin = ?arena.origin(), "block allocator created");
        Self {
            heap: Mutex::new(Heap::new(arena)),
            capacity,
        }
    }

    /// Arena size in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes held by live allocations, headers included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.heap.lock().used()
    }

    /// Bytes not held by live allocations.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.used()
    }

    /// Allocates `bytes` bytes.
    ///
    /// Prefers an exact-size free block, then splits the first free block
    /// large enough, then carves fresh space at the frontier.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] for a zero-byte request.
    /// - [`AllocError::OutOfMemory`] if no block can be carved.
    pub fn allocate(&self, bytes: usize) -> AllocResult<HeapPtr> {
        self.heap.lock().allocate(bytes)
    }

    /// Allocates with the size rounded up to `max(alignment, DEFAULT_ALIGNMENT)`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if `alignment` is not a power
    /// of two, plus everything [`Self::allocate`] returns.
    pub fn allocate_aligned(&self, bytes: usize, alignment: usize) -> AllocResult<HeapPtr> {
        if bytes == 0 {
            return Err(AllocError::invalid("zero-byte allocation"));
        }
        let size = aligned_size(bytes, alignment)?;
        self.allocate(size)
    }

    /// Frees an allocation and coalesces it with free neighbours.
    ///
    /// The payload is zeroed before the block joins the free list. There is
    /// no null handle; a caller holding an `Option<HeapPtr>` frees it with
    /// `reallocate(ptr, 0)`, which is a no-op for `None`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvariantViolation`] for pointers this allocator
    /// did not hand out and for double frees. Either poisons the allocator.
    pub fn deallocate(&self, ptr: HeapPtr) -> AllocResult<()> {
        self.heap.lock().deallocate(ptr)
    }

    /// Resizes an allocation, in place when the neighbourhood allows.
    ///
    /// - `new_size == 0` frees `ptr` and returns `None`.
    /// - `ptr == None` allocates `new_size` bytes.
    /// - Otherwise the block grows into a following free block or the
    ///   unformatted tail, or shrinks by splitting off a free remainder. If
    ///   neither works the contents move to a fresh block.
    ///
    /// Bytes past the new size are zeroed on shrink.
    ///
    /// # Errors
    ///
    /// Same as [`Self::allocate`] and [`Self::deallocate`].
    pub fn reallocate(&self, ptr: Option<HeapPtr>, new_size: usize) -> AllocResult<Option<HeapPtr>> {
        self.heap.lock().reallocate(ptr, new_size)
    }

    /// [`Self::reallocate`] with the size rounded like [`Self::allocate_aligned`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if `alignment` is not a power
    /// of two, plus everything [`Self::reallocate`] returns.
    pub fn reallocate_aligned(
        &self,
        ptr: Option<HeapPtr>,
        new_size: usize,
        alignment: usize,
    ) -> AllocResult<Option<HeapPtr>> {
        let size = if new_size == 0 {
            if !alignment.is_power_of_two() {
                return Err(AllocError::invalid("alignment must be a power of two"));
            }
            0
        } else {
            aligned_size(new_size, alignment)?
        };
        self.reallocate(ptr, size)
    }

    /// Payload size of a live allocation.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvariantViolation`] if `ptr` is not live.
    pub fn size_of(&self, ptr: HeapPtr) -> AllocResult<usize> {
        self.heap.lock().payload_range(ptr).map(|range| range.len())
    }

    /// Whether `ptr` names a live allocation of this allocator.
    #[must_use]
    pub fn contains(&self, ptr: HeapPtr) -> bool {
        self.heap.lock().contains(ptr)
    }

    /// Locks the allocator and maps the guard onto `ptr`'s payload.
    ///
    /// The allocator stays locked while the guard lives; calling back into it
    /// from the same thread deadlocks.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvariantViolation`] if `ptr` is not live.
    pub fn payload(&self, ptr: HeapPtr) -> AllocResult<MappedMutexGuard<'_, [u8]>> {
        let mut heap = self.heap.lock();
        let range = heap.payload_range(ptr)?;
        Ok(MutexGuard::map(heap, |heap| heap.bytes_mut(range)))
    }

    /// Copies `data` into the payload at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if the write would run past
    /// the payload, or an invariant violation if `ptr` is not live.
    pub fn write(&self, ptr: HeapPtr, offset: usize, data: &[u8]) -> AllocResult<()> {
        let mut payload = self.payload(ptr)?;
        let target = window(&mut payload, offset, data.len())?;
        target.copy_from_slice(data);
        Ok(())
    }

    /// Copies payload bytes starting at `offset` into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if the read would run past
    /// the payload, or an invariant violation if `ptr` is not live.
    pub fn read(&self, ptr: HeapPtr, offset: usize, out: &mut [u8]) -> AllocResult<()> {
        let mut payload = self.payload(ptr)?;
        let source = window(&mut payload, offset, out.len())?;
        out.copy_from_slice(source);
        Ok(())
    }

    /// Stores a plain-old-data value at `offset` inside the payload.
    ///
    /// # Errors
    ///
    /// Same as [`Self::write`].
    pub fn write_pod<T: bytemuck::Pod>(&self, ptr: HeapPtr, offset: usize, value: &T) -> AllocResult<()> {
        self.write(ptr, offset, bytemuck::bytes_of(value))
    }

    /// Loads a plain-old-data value from `offset` inside the payload.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read`].
    pub fn read_pod<T: bytemuck::Pod>(&self, ptr: HeapPtr, offset: usize) -> AllocResult<T> {
        let payload = self.payload(ptr)?;
        let end = offset
            .checked_add(std::mem::size_of::<T>())
            .filter(|&end| end <= payload.len())
            .ok_or(AllocError::invalid("read past end of payload"))?;
        Ok(bytemuck::pod_read_unaligned(&payload[offset..end]))
    }

    /// Snapshot of every block in address order, unformatted tail last.
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockInfo> {
        self.heap.lock().blocks()
    }

    /// Counters and block census.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        self.heap.lock().stats()
    }

    /// Walks the block chain and verifies contiguity, back links, free-list
    /// membership, coalescing and `used` accounting.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvariantViolation`] and poisons the allocator
    /// on the first inconsistency.
    pub fn check_integrity(&self) -> AllocResult<()> {
        self.heap.lock().check_integrity()
    }

    /// Whether an invariant violation has poisoned this allocator.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.heap.lock().is_poisoned()
    }

    /// Tears the allocator down and returns its arena.
    ///
    /// # Panics
    ///
    /// Debug builds panic if allocation and deallocation counts differ.
    #[must_use]
    pub fn destroy(self) -> Arena {
        let arena = self.heap.into_inner().into_arena();
        tracing::debug!(capacity = self.capacity, "block allocator destroyed");
        arena
    }
}

impl std::fmt::Debug for BlockAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Rounds `bytes` up to `max(alignment, DEFAULT_ALIGNMENT)`.
fn aligned_size(bytes: usize, alignment: usize) -> AllocResult<usize> {
    if !alignment.is_power_of_two() {
        return Err(AllocError::invalid("alignment must be a power of two"));
    }
    let align = alignment.max(DEFAULT_ALIGNMENT);
    bytes
        .checked_add(align - 1)
        .map(|padded| padded & !(align - 1))
        .ok_or(AllocError::invalid("aligned size overflows"))
}

/// Bounds-checked sub-slice of a payload.
fn window(payload: &mut [u8], offset: usize, len: usize) -> AllocResult<&mut [u8]> {
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= payload.len())
        .ok_or(AllocError::invalid("access past end of payload"))?;
    Ok(&mut payload[offset..end])
}
