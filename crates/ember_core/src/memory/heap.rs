//! # Heap
//!
//! Block management over one arena, without any locking.
//!
//! [`super::BlockAllocator`] wraps this in its mutex; everything here assumes
//! exclusive access.
//!
//! ## Placement policy
//!
//! 1. Exact fit: first free block whose payload equals the request.
//! 2. First fit with split: first free block that can hold the request plus a
//!    header plus at least one byte; the remainder stays on the free list in
//!    the same position.
//! 3. Bump: carve a new block at the frontier.
//! 4. Whole fit: first free block at least as large as the request, handed
//!    out without splitting.
//!
//! ## Invariants
//!
//! - Blocks tile `[0, frontier)` with no gaps; `physical_prev` always names
//!   the block right before.
//! - No two physically adjacent blocks are both free, and no free block
//!   touches the frontier (it is retracted into the tail instead).
//! - `used` is the sum of allocated payloads plus one header each.
//! - With a cleared arena, every byte outside a live payload is zero.

use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroU32;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use super::arena::Arena;
use super::block::{BlockHeader, BlockInfo, BlockState, HeapPtr, HEADER_SIZE};
use super::AllocatorStats;
use crate::error::{AllocError, AllocResult, Violation};

/// Source of allocator ids stamped into every [`HeapPtr`].
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn next_id() -> NonZeroU32 {
    // Wraps after 2^32 - 1 allocators; zero is skipped.
    loop {
        if let Some(id) = NonZeroU32::new(NEXT_ID.fetch_add(1, Ordering::Relaxed)) {
            return id;
        }
    }
}

pub(crate) struct Heap {
    id: NonZeroU32,
    arena: Arena,
    /// Formatted blocks keyed by header offset.
    blocks: BTreeMap<usize, BlockHeader>,
    /// Header offsets of free blocks; front is the list head.
    free_list: VecDeque<usize>,
    used: usize,
    /// First byte of the unformatted tail.
    frontier: usize,
    /// Header of the block that ends at the frontier.
    last_allocated: Option<usize>,
    allocations: u64,
    deallocations: u64,
    poisoned: bool,
    destroyed: bool,
}

impl Heap {
    pub(crate) fn new(arena: Arena) -> Self {
        Self {
            id: next_id(),
            arena,
            blocks: BTreeMap::new(),
            free_list: VecDeque::new(),
            used: 0,
            frontier: 0,
            last_allocated: None,
            allocations: 0,
            deallocations: 0,
            poisoned: false,
            destroyed: false,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    #[inline]
    pub(crate) fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    // ------------------------------------------------------------------
    // Allocate
    // ------------------------------------------------------------------

    pub(crate) fn allocate(&mut self, bytes: usize) -> AllocResult<HeapPtr> {
        self.ensure_healthy()?;
        if bytes == 0 {
            return Err(AllocError::invalid("zero-byte allocation"));
        }
        let requested = bytes
            .checked_add(HEADER_SIZE)
            .ok_or(AllocError::invalid("allocation size overflows"))?;
        if requested > self.capacity() - self.used {
            return Err(self.out_of_memory(requested));
        }

        let header = if let Some(header) = self.take_first_free(|size| size == bytes) {
            header
        } else if let Some(header) = self.take_split_fit(bytes)? {
            header
        } else if let Some(header) = self.bump(bytes) {
            header
        } else if let Some(header) = self.take_first_free(|size| size >= bytes) {
            header
        } else {
            return Err(self.out_of_memory(requested));
        };

        self.used += self.blocks[&header].span();
        self.allocations += 1;
        Ok(HeapPtr::new(self.id, header + HEADER_SIZE))
    }

    /// Unlinks the first free block whose payload satisfies `fits`.
    fn take_first_free(&mut self, fits: impl Fn(usize) -> bool) -> Option<usize> {
        let position = self
            .free_list
            .iter()
            .position(|header| self.blocks.get(header).is_some_and(|b| fits(b.payload_size)))?;
        let header = self.free_list.remove(position)?;
        self.set_state(header, BlockState::Allocated);
        Some(header)
    }

    fn take_split_fit(&mut self, bytes: usize) -> AllocResult<Option<usize>> {
        let Some(position) = self.free_list.iter().position(|header| {
            self.blocks
                .get(header)
                .is_some_and(|b| b.payload_size > bytes + HEADER_SIZE)
        }) else {
            return Ok(None);
        };

        let header = self.free_list[position];
        let remainder = self.split(header, bytes)?;
        self.free_list[position] = remainder;
        self.set_state(header, BlockState::Allocated);
        Ok(Some(header))
    }

    fn bump(&mut self, bytes: usize) -> Option<usize> {
        let header = self.frontier;
        let end = header.checked_add(HEADER_SIZE + bytes)?;
        if end > self.capacity() {
            return None;
        }
        self.blocks
            .insert(header, BlockHeader::allocated(bytes, self.last_allocated));
        self.last_allocated = Some(header);
        self.frontier = end;
        Some(header)
    }

    /// Cuts `header` down to `payload` bytes and formats the rest as a free
    /// block. The caller guarantees the rest exceeds one header.
    fn split(&mut self, header: usize, payload: usize) -> AllocResult<usize> {
        let Some(block) = self.blocks.get_mut(&header) else {
            return Err(self.violation(Violation::BrokenChain { offset: header }));
        };
        let spare = block.payload_size - payload;
        block.payload_size = payload;

        let remainder = header + HEADER_SIZE + payload;
        self.blocks
            .insert(remainder, BlockHeader::free(spare - HEADER_SIZE, Some(header)));
        self.relink_next(remainder)?;
        Ok(remainder)
    }

    // ------------------------------------------------------------------
    // Deallocate and coalesce
    // ------------------------------------------------------------------

    pub(crate) fn deallocate(&mut self, ptr: HeapPtr) -> AllocResult<()> {
        self.ensure_healthy()?;
        let header = self.live_header(ptr)?;
        let span = self.blocks[&header].span();

        self.set_state(header, BlockState::Free);
        self.zero(ptr.offset()..header + span);
        self.used -= span;
        self.deallocations += 1;
        self.free_list.push_front(header);
        self.coalesce(header)
    }

    /// Merges `header` with free neighbours until no two free blocks touch.
    ///
    /// Forward merges are resolved first, then the walk moves to the
    /// preceding block if it is free.
    fn coalesce(&mut self, mut header: usize) -> AllocResult<()> {
        loop {
            match self.merge_forward(header)? {
                Some(prev) if self.state_of(prev) == Some(BlockState::Free) => header = prev,
                _ => return Ok(()),
            }
        }
    }

    /// Absorbs following free blocks into `header`, retracting it into the
    /// tail if it reaches the frontier. Returns the block's physical prev.
    fn merge_forward(&mut self, header: usize) -> AllocResult<Option<usize>> {
        loop {
            let Some(block) = self.blocks.get(&header).copied() else {
                return Err(self.violation(Violation::BrokenChain { offset: header }));
            };
            let next = header + block.span();

            if next == self.frontier {
                self.retract(header, block)?;
                return Ok(block.physical_prev);
            }

            match self.blocks.get(&next).copied() {
                Some(neighbour) if neighbour.state == BlockState::Free => {
                    self.unlink_free(next)?;
                    self.blocks.remove(&next);
                    self.set_size(header, block.payload_size + neighbour.span());
                    self.relink_next(header)?;
                }
                Some(_) => return Ok(block.physical_prev),
                None => return Err(self.violation(Violation::BrokenChain { offset: next })),
            }
        }
    }

    /// Returns a free block that ends at the frontier to the unformatted tail.
    fn retract(&mut self, header: usize, block: BlockHeader) -> AllocResult<()> {
        self.unlink_free(header)?;
        self.blocks.remove(&header);
        self.zero(header..header + block.span());
        self.frontier = header;
        self.last_allocated = block.physical_prev;
        tracing::trace!(header, "retracted free block into tail");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reallocate
    // ------------------------------------------------------------------

    pub(crate) fn reallocate(
        &mut self,
        ptr: Option<HeapPtr>,
        new_size: usize,
    ) -> AllocResult<Option<HeapPtr>> {
        match (ptr, new_size) {
            (None, 0) => self.ensure_healthy().map(|()| None),
            (Some(ptr), 0) => self.deallocate(ptr).map(|()| None),
            (None, size) => self.allocate(size).map(Some),
            (Some(ptr), size) => self.resize(ptr, size).map(Some),
        }
    }

    fn resize(&mut self, ptr: HeapPtr, new_size: usize) -> AllocResult<HeapPtr> {
        self.ensure_healthy()?;
        let header = self.live_header(ptr)?;
        let old_size = self.blocks[&header].payload_size;

        if new_size == old_size {
            return Ok(ptr);
        }
        if new_size < old_size {
            self.shrink_in_place(header, old_size, new_size)?;
            return Ok(ptr);
        }
        if self.grow_in_place(header, old_size, new_size)? {
            return Ok(ptr);
        }

        let moved = self.allocate(new_size)?;
        self.arena
            .as_mut_slice()
            .copy_within(ptr.offset()..ptr.offset() + old_size, moved.offset());
        self.deallocate(ptr)?;
        Ok(moved)
    }

    fn grow_in_place(&mut self, header: usize, old_size: usize, new_size: usize) -> AllocResult<bool> {
        let next = header + HEADER_SIZE + old_size;
        let growth = new_size - old_size;

        if next == self.frontier {
            let Some(end) = next.checked_add(growth).filter(|&end| end <= self.capacity()) else {
                return Ok(false);
            };
            self.frontier = end;
            self.set_size(header, new_size);
            self.used += growth;
            return Ok(true);
        }

        let Some(neighbour) = self.blocks.get(&next).copied() else {
            return Err(self.violation(Violation::BrokenChain { offset: next }));
        };
        if neighbour.state != BlockState::Free {
            return Ok(false);
        }
        let available = old_size + neighbour.span();
        if new_size > available {
            return Ok(false);
        }

        let position = self.unlink_free(next)?;
        self.blocks.remove(&next);

        let spare = available - new_size;
        let granted = if spare > HEADER_SIZE {
            let remainder = header + HEADER_SIZE + new_size;
            self.blocks
                .insert(remainder, BlockHeader::free(spare - HEADER_SIZE, Some(header)));
            self.free_list.insert(position, remainder);
            self.relink_next(remainder)?;
            new_size
        } else {
            available
        };

        self.set_size(header, granted);
        self.relink_next(header)?;
        self.used += granted - old_size;
        Ok(true)
    }

    fn shrink_in_place(&mut self, header: usize, old_size: usize, new_size: usize) -> AllocResult<()> {
        let payload = header + HEADER_SIZE;
        self.zero(payload + new_size..payload + old_size);

        let spare = old_size - new_size;
        if spare <= HEADER_SIZE {
            return Ok(());
        }

        let remainder = self.split(header, new_size)?;
        self.used -= spare;
        self.free_list.push_front(remainder);
        self.coalesce(remainder)
    }

    // ------------------------------------------------------------------
    // Payload access and introspection
    // ------------------------------------------------------------------

    pub(crate) fn payload_range(&mut self, ptr: HeapPtr) -> AllocResult<Range<usize>> {
        self.ensure_healthy()?;
        let header = self.live_header(ptr)?;
        Ok(ptr.offset()..ptr.offset() + self.blocks[&header].payload_size)
    }

    #[inline]
    pub(crate) fn bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.arena.as_mut_slice()[range]
    }

    pub(crate) fn contains(&self, ptr: HeapPtr) -> bool {
        if ptr.owner() != self.id {
            return false;
        }
        ptr.header()
            .and_then(|header| self.blocks.get(&header))
            .is_some_and(|b| b.state == BlockState::Allocated)
    }

    pub(crate) fn blocks(&self) -> Vec<BlockInfo> {
        let mut out: Vec<BlockInfo> = self
            .blocks
            .iter()
            .map(|(&header, b)| BlockInfo {
                header,
                state: b.state,
                payload_size: b.payload_size,
                physical_prev: b.physical_prev,
            })
            .collect();

        let tail = self.capacity() - self.frontier;
        if tail > HEADER_SIZE {
            out.push(BlockInfo {
                header: self.frontier,
                state: BlockState::None,
                payload_size: tail - HEADER_SIZE,
                physical_prev: self.last_allocated,
            });
        }
        out
    }

    pub(crate) fn stats(&self) -> AllocatorStats {
        let mut stats = AllocatorStats {
            capacity: self.capacity(),
            used: self.used,
            frontier: self.frontier,
            allocated_blocks: 0,
            free_blocks: 0,
            largest_free_block: 0,
            allocations: self.allocations,
            deallocations: self.deallocations,
        };
        for block in self.blocks.values() {
            match block.state {
                BlockState::Allocated => stats.allocated_blocks += 1,
                BlockState::Free => {
                    stats.free_blocks += 1;
                    stats.largest_free_block = stats.largest_free_block.max(block.payload_size);
                }
                BlockState::None => {}
            }
        }
        stats
    }

    /// Walks the whole chain and cross-checks it against the free list and
    /// the `used` counter.
    pub(crate) fn check_integrity(&mut self) -> AllocResult<()> {
        self.ensure_healthy()?;
        match self.find_fault() {
            Some(violation) => Err(self.violation(violation)),
            None => Ok(()),
        }
    }

    fn find_fault(&self) -> Option<Violation> {
        let mut expected = 0;
        let mut prev: Option<(usize, BlockState)> = None;
        let mut measured = 0;
        let mut free = 0;

        for (&header, block) in &self.blocks {
            if header != expected || block.physical_prev != prev.map(|(h, _)| h) {
                return Some(Violation::BrokenChain { offset: header });
            }
            match block.state {
                BlockState::Allocated => measured += block.span(),
                BlockState::Free => {
                    free += 1;
                    let after_free = prev.is_some_and(|(_, state)| state == BlockState::Free);
                    if after_free || !self.free_list.contains(&header) {
                        return Some(Violation::CorruptFreeList { offset: header });
                    }
                }
                BlockState::None => return Some(Violation::BrokenChain { offset: header }),
            }
            expected = header + block.span();
            prev = Some((header, block.state));
        }

        if expected != self.frontier || self.last_allocated != prev.map(|(h, _)| h) {
            return Some(Violation::BrokenChain { offset: expected });
        }
        if let Some((header, BlockState::Free)) = prev {
            return Some(Violation::CorruptFreeList { offset: header });
        }
        if free != self.free_list.len() {
            let offset = self.free_list.front().copied().unwrap_or_default();
            return Some(Violation::CorruptFreeList { offset });
        }
        if measured != self.used {
            return Some(Violation::Accounting {
                recorded: self.used,
                measured,
            });
        }
        None
    }

    /// Hands the arena back. Debug builds insist every allocation was freed.
    pub(crate) fn into_arena(mut self) -> Arena {
        debug_assert_eq!(
            self.allocations, self.deallocations,
            "allocator destroyed with {} live allocations",
            self.allocations.saturating_sub(self.deallocations)
        );
        self.destroyed = true;
        self.arena.take()
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_healthy(&self) -> AllocResult<()> {
        if self.poisoned {
            Err(Violation::Poisoned.into())
        } else {
            Ok(())
        }
    }

    /// Records a violation and poisons the heap.
    fn violation(&mut self, violation: Violation) -> AllocError {
        if !self.poisoned {
            tracing::error!(%violation, used = self.used, frontier = self.frontier, "allocator poisoned");
        }
        self.poisoned = true;
        violation.into()
    }

    fn out_of_memory(&self, requested: usize) -> AllocError {
        AllocError::OutOfMemory {
            requested,
            remaining: self.capacity() - self.used,
        }
    }

    /// Resolves `ptr` to the header of a live allocation.
    fn live_header(&mut self, ptr: HeapPtr) -> AllocResult<usize> {
        if ptr.owner() != self.id {
            return Err(self.violation(Violation::ForeignPointer { offset: ptr.offset() }));
        }
        let state = ptr
            .header()
            .filter(|&header| header < self.frontier)
            .and_then(|header| self.blocks.get(&header).map(|b| (header, b.state)));

        match state {
            Some((header, BlockState::Allocated)) => Ok(header),
            Some((_, BlockState::Free)) => Err(self.violation(Violation::DoubleFree { offset: ptr.offset() })),
            _ => Err(self.violation(Violation::ForeignPointer { offset: ptr.offset() })),
        }
    }

    /// Removes `header` from the free list, returning where it sat.
    fn unlink_free(&mut self, header: usize) -> AllocResult<usize> {
        match self.free_list.iter().position(|&h| h == header) {
            Some(position) => {
                self.free_list.remove(position);
                Ok(position)
            }
            None => Err(self.violation(Violation::CorruptFreeList { offset: header })),
        }
    }

    /// Points the block after `header` back at it.
    fn relink_next(&mut self, header: usize) -> AllocResult<()> {
        let Some(span) = self.blocks.get(&header).map(BlockHeader::span) else {
            return Err(self.violation(Violation::BrokenChain { offset: header }));
        };
        let next = header + span;
        if next == self.frontier {
            return Ok(());
        }
        match self.blocks.get_mut(&next) {
            Some(block) => {
                block.physical_prev = Some(header);
                Ok(())
            }
            None => Err(self.violation(Violation::BrokenChain { offset: next })),
        }
    }

    #[inline]
    fn state_of(&self, header: usize) -> Option<BlockState> {
        self.blocks.get(&header).map(|b| b.state)
    }

    #[inline]
    fn set_state(&mut self, header: usize, state: BlockState) {
        if let Some(block) = self.blocks.get_mut(&header) {
            block.state = state;
        }
    }

    #[inline]
    fn set_size(&mut self, header: usize, payload_size: usize) {
        if let Some(block) = self.blocks.get_mut(&header) {
            block.payload_size = payload_size;
        }
    }

    #[inline]
    fn zero(&mut self, range: Range<usize>) {
        self.arena.as_mut_slice()[range].fill(0);
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if !self.destroyed && self.allocations != self.deallocations {
            tracing::warn!(
                live = self.allocations.saturating_sub(self.deallocations),
                used = self.used,
                "allocator dropped with live allocations"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap(capacity: usize) -> Heap {
        Heap::new(Arena::reserve(capacity).unwrap())
    }

    fn layout(heap: &Heap) -> Vec<(usize, BlockState, usize)> {
        heap.blocks
            .iter()
            .map(|(&header, b)| (header, b.state, b.payload_size))
            .collect()
    }

    #[test]
    fn test_bump_layout_is_contiguous() {
        let mut heap = heap(4096);
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(200).unwrap();

        assert_eq!(a.offset(), HEADER_SIZE);
        assert_eq!(b.offset(), a.offset() + 100 + HEADER_SIZE);
        assert_eq!(heap.frontier, 364);
        assert_eq!(heap.last_allocated, Some(132));
        assert_eq!(heap.used, 364);
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_coalesce_forward_then_backward() {
        let mut heap = heap(4096);
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let c = heap.allocate(64).unwrap();
        let _d = heap.allocate(64).unwrap();

        heap.deallocate(a).unwrap();
        heap.deallocate(c).unwrap();
        heap.deallocate(b).unwrap();

        assert_eq!(
            layout(&heap),
            vec![(0, BlockState::Free, 256), (288, BlockState::Allocated, 64)]
        );
        assert_eq!(heap.free_list, VecDeque::from([0]));
        assert_eq!(heap.blocks[&288].physical_prev, Some(0));
        assert_eq!(heap.used, 96);
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_free_tail_block_retracts_frontier() {
        let mut heap = heap(4096);
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();

        heap.deallocate(b).unwrap();
        assert_eq!(heap.frontier, 96);
        assert_eq!(heap.last_allocated, Some(0));
        assert!(heap.free_list.is_empty());

        heap.deallocate(a).unwrap();
        assert_eq!(heap.frontier, 0);
        assert_eq!(heap.last_allocated, None);
        assert!(heap.blocks.is_empty());
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_retraction_propagates_backward() {
        let mut heap = heap(4096);
        let _a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let c = heap.allocate(64).unwrap();

        heap.deallocate(b).unwrap();
        assert_eq!(heap.free_list.len(), 1);

        heap.deallocate(c).unwrap();
        assert_eq!(heap.frontier, 96);
        assert!(heap.free_list.is_empty());
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_first_fit_split_keeps_list_position() {
        let mut heap = heap(4096);
        let a = heap.allocate(200).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.deallocate(a).unwrap();

        let p = heap.allocate(100).unwrap();
        assert_eq!(p, a);
        assert_eq!(
            layout(&heap),
            vec![
                (0, BlockState::Allocated, 100),
                (132, BlockState::Free, 68),
                (232, BlockState::Allocated, 16),
            ]
        );
        assert_eq!(heap.free_list, VecDeque::from([132]));
        assert_eq!(heap.blocks[&232].physical_prev, Some(132));

        let exact = heap.allocate(68).unwrap();
        assert_eq!(exact.offset(), 164);
        assert!(heap.free_list.is_empty());
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_exact_fit_beats_earlier_split_candidate() {
        let mut heap = heap(4096);
        let big = heap.allocate(500).unwrap();
        let _g1 = heap.allocate(16).unwrap();
        let small = heap.allocate(80).unwrap();
        let _g2 = heap.allocate(16).unwrap();

        heap.deallocate(small).unwrap();
        heap.deallocate(big).unwrap();
        assert_eq!(heap.free_list.front(), Some(&big.header().unwrap()));

        assert_eq!(heap.allocate(80).unwrap(), small);
    }

    #[test]
    fn test_small_remainder_falls_through_to_bump() {
        let mut heap = heap(4096);
        let a = heap.allocate(100).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.deallocate(a).unwrap();

        let p = heap.allocate(90).unwrap();
        assert_eq!(p.offset(), 180 + HEADER_SIZE);
        assert_eq!(heap.free_list, VecDeque::from([0]));
    }

    #[test]
    fn test_whole_block_handout_when_tail_exhausted() {
        let mut heap = Heap::new(Arena::from_buffer(vec![0u8; 512], true).unwrap());
        let a = heap.allocate(100).unwrap();
        let _guard = heap.allocate(16).unwrap();
        let _rest = heap.allocate(300).unwrap();
        assert_eq!(heap.frontier, 512);
        heap.deallocate(a).unwrap();

        let p = heap.allocate(90).unwrap();
        assert_eq!(p, a);
        assert_eq!(heap.blocks[&0].payload_size, 100);
        assert_eq!(heap.used, 512);
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_grow_into_tail() {
        let mut heap = heap(4096);
        let a = heap.allocate(100).unwrap();

        assert_eq!(heap.reallocate(Some(a), 300).unwrap(), Some(a));
        assert_eq!(heap.frontier, 332);
        assert_eq!(heap.used, 332);
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_grow_partially_consumes_free_neighbour() {
        let mut heap = heap(4096);
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(200).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.deallocate(b).unwrap();

        assert_eq!(heap.reallocate(Some(a), 150).unwrap(), Some(a));
        assert_eq!(
            layout(&heap),
            vec![
                (0, BlockState::Allocated, 150),
                (182, BlockState::Free, 150),
                (364, BlockState::Allocated, 16),
            ]
        );
        assert_eq!(heap.free_list, VecDeque::from([182]));
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_grow_fully_consumes_free_neighbour() {
        let mut heap = heap(4096);
        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(200).unwrap();
        let _guard = heap.allocate(16).unwrap();
        heap.deallocate(b).unwrap();

        assert_eq!(heap.reallocate(Some(a), 320).unwrap(), Some(a));
        assert_eq!(heap.blocks[&0].payload_size, 332);
        assert_eq!(heap.blocks[&364].physical_prev, Some(0));
        assert!(heap.free_list.is_empty());
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_grow_past_allocated_neighbour_relocates() {
        let mut heap = heap(4096);
        let a = heap.allocate(100).unwrap();
        let _b = heap.allocate(16).unwrap();
        let pattern: Vec<u8> = (0..100u8).collect();
        let range = heap.payload_range(a).unwrap();
        heap.bytes_mut(range).copy_from_slice(&pattern);

        let moved = heap.reallocate(Some(a), 400).unwrap().unwrap();
        assert_ne!(moved, a);

        let range = heap.payload_range(moved).unwrap();
        let bytes = heap.bytes_mut(range);
        assert_eq!(&bytes[..100], pattern.as_slice());
        assert!(bytes[100..].iter().all(|&b| b == 0));
        assert_eq!(heap.free_list, VecDeque::from([0]));
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_shrink_splits_and_zeroes() {
        let mut heap = heap(4096);
        let a = heap.allocate(200).unwrap();
        let _guard = heap.allocate(16).unwrap();
        let range = heap.payload_range(a).unwrap();
        heap.bytes_mut(range).fill(0xFF);

        assert_eq!(heap.reallocate(Some(a), 50).unwrap(), Some(a));
        assert_eq!(heap.blocks[&0].payload_size, 50);
        assert_eq!(heap.blocks[&82].state, BlockState::Free);
        assert_eq!(heap.blocks[&82].payload_size, 118);
        assert_eq!(heap.used, 82 + 48);

        let reuse = heap.allocate(118).unwrap();
        assert_eq!(reuse.offset(), 114);
        let range = heap.payload_range(reuse).unwrap();
        assert!(heap.bytes_mut(range).iter().all(|&b| b == 0));
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_shrink_last_block_returns_space_to_tail() {
        let mut heap = heap(4096);
        let a = heap.allocate(200).unwrap();

        assert_eq!(heap.reallocate(Some(a), 50).unwrap(), Some(a));
        assert_eq!(heap.frontier, 82);
        assert!(heap.free_list.is_empty());
        heap.check_integrity().unwrap();
    }

    #[test]
    fn test_shrink_by_less_than_header_keeps_block() {
        let mut heap = heap(4096);
        let a = heap.allocate(100).unwrap();
        let range = heap.payload_range(a).unwrap();
        heap.bytes_mut(range).fill(0xAA);

        assert_eq!(heap.reallocate(Some(a), 90).unwrap(), Some(a));
        assert_eq!(heap.blocks[&0].payload_size, 100);
        let range = heap.payload_range(a).unwrap();
        let bytes = heap.bytes_mut(range);
        assert!(bytes[..90].iter().all(|&b| b == 0xAA));
        assert!(bytes[90..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reallocate_edge_cases() {
        let mut heap = heap(4096);
        assert_eq!(heap.reallocate(None, 0).unwrap(), None);

        let p = heap.reallocate(None, 48).unwrap().unwrap();
        assert_eq!(heap.reallocate(Some(p), 48).unwrap(), Some(p));
        assert_eq!(heap.reallocate(Some(p), 0).unwrap(), None);
        assert_eq!(heap.used, 0);
    }

    #[test]
    fn test_integrity_detects_lost_free_block() {
        let mut heap = heap(4096);
        let a = heap.allocate(64).unwrap();
        let _b = heap.allocate(64).unwrap();
        heap.deallocate(a).unwrap();

        heap.free_list.clear();
        assert_eq!(
            heap.check_integrity(),
            Err(AllocError::InvariantViolation(Violation::CorruptFreeList { offset: 0 }))
        );
        assert!(heap.is_poisoned());
    }

    #[test]
    fn test_integrity_detects_accounting_drift() {
        let mut heap = heap(4096);
        let _a = heap.allocate(64).unwrap();
        heap.used += 1;

        assert_eq!(
            heap.check_integrity(),
            Err(AllocError::InvariantViolation(Violation::Accounting {
                recorded: 97,
                measured: 96,
            }))
        );
    }

    #[test]
    fn test_coalesce_reports_missing_free_list_entry() {
        let mut heap = heap(4096);
        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let _c = heap.allocate(64).unwrap();
        heap.deallocate(b).unwrap();
        heap.free_list.clear();

        assert_eq!(
            heap.deallocate(a),
            Err(AllocError::InvariantViolation(Violation::CorruptFreeList { offset: 96 }))
        );
        assert!(heap.is_poisoned());
    }
}
