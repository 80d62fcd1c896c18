//! # Arena
//!
//! A single contiguous, page-aligned byte range that one allocator carves
//! blocks out of.
//!
//! The arena is either reserved up front (zero-filled, rounded up to whole
//! pages) or adopted from a caller-supplied buffer. Either way it is owned by
//! exactly one [`super::BlockAllocator`] for its whole life.

use crate::error::{AllocError, AllocResult};

/// Page granularity used when reserving arenas.
pub const PAGE_SIZE: usize = 4096;

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Where the arena's bytes came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArenaOrigin {
    /// Reserved and zero-filled by [`Arena::reserve`].
    Reserved,
    /// Adopted from the caller through [`Arena::from_buffer`].
    Supplied,
}

/// A contiguous byte range owned by one allocator.
///
/// # Example
///
/// ```rust,ignore
/// let arena = Arena::reserve(10_000)?;
/// assert_eq!(arena.capacity(), 12_288); // three pages
/// ```
pub struct Arena {
    /// Backing storage.
    bytes: Box<[u8]>,
    /// How the storage was obtained.
    origin: ArenaOrigin,
}

impl Arena {
    /// Reserves `capacity` bytes rounded up to [`PAGE_SIZE`], zero-filled.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if `capacity` is zero or the
    /// rounded size overflows.
    pub fn reserve(capacity: usize) -> AllocResult<Self> {
        if capacity == 0 {
            return Err(AllocError::invalid("arena capacity must be greater than zero"));
        }
        if capacity > usize::MAX - PAGE_SIZE {
            return Err(AllocError::invalid("arena capacity overflows page rounding"));
        }

        let rounded = align_up(capacity, PAGE_SIZE);
        Ok(Self {
            bytes: vec![0u8; rounded].into_boxed_slice(),
            origin: ArenaOrigin::Reserved,
        })
    }

    /// Adopts caller memory as the arena, optionally zeroing it first.
    ///
    /// The whole buffer is used; no page rounding is applied.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidArgument`] if the buffer is empty.
    pub fn from_buffer(buffer: impl Into<Box<[u8]>>, clear: bool) -> AllocResult<Self> {
        let mut bytes = buffer.into();
        if bytes.is_empty() {
            return Err(AllocError::invalid("supplied arena buffer is empty"));
        }
        if clear {
            bytes.fill(0);
        }
        Ok(Self {
            bytes,
            origin: ArenaOrigin::Supplied,
        })
    }

    /// Total size in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// How the bytes were obtained.
    #[inline]
    #[must_use]
    pub const fn origin(&self) -> ArenaOrigin {
        self.origin
    }

    /// Read access to the whole range.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Write access to the whole range.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Moves the bytes out, leaving an empty arena behind.
    pub(crate) fn take(&mut self) -> Self {
        Self {
            bytes: std::mem::take(&mut self.bytes),
            origin: self.origin,
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_rounds_to_pages() {
        let arena = Arena::reserve(1).unwrap();
        assert_eq!(arena.capacity(), PAGE_SIZE);

        let arena = Arena::reserve(PAGE_SIZE + 1).unwrap();
        assert_eq!(arena.capacity(), 2 * PAGE_SIZE);
        assert_eq!(arena.origin(), ArenaOrigin::Reserved);
        assert!(arena.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_reserve_rejects_zero() {
        assert!(Arena::reserve(0).is_err());
    }

    #[test]
    fn test_supplied_buffer_clear() {
        let arena = Arena::from_buffer(vec![0xAB; 100], true).unwrap();
        assert_eq!(arena.capacity(), 100);
        assert_eq!(arena.origin(), ArenaOrigin::Supplied);
        assert!(arena.as_slice().iter().all(|&b| b == 0));

        let arena = Arena::from_buffer(vec![0xAB; 100], false).unwrap();
        assert!(arena.as_slice().iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
    }
}
