//! # Error Types
//!
//! All errors that can occur in the allocator, the work queue and config loading.
//!
//! Allocator failures split into two camps. `InvalidArgument` is a caller
//! mistake that leaves the allocator untouched. `OutOfMemory` and
//! `InvariantViolation` are fatal: they are meant to travel up to exactly one
//! handler ([`crate::fatal`]) that logs and aborts.

use std::time::Duration;

use thiserror::Error;

/// Detected corruption or misuse that makes the allocator unsafe to continue with.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// Pointer does not reference a block carved by this allocator.
    #[error("pointer {offset:#x} is not owned by this allocator")]
    ForeignPointer {
        /// Offending payload offset.
        offset: usize,
    },

    /// Block was already free.
    #[error("double free of block at payload {offset:#x}")]
    DoubleFree {
        /// Offending payload offset.
        offset: usize,
    },

    /// A block expected on the free list was missing, or vice versa.
    #[error("free list corrupted at header {offset:#x}")]
    CorruptFreeList {
        /// Header offset where the mismatch was detected.
        offset: usize,
    },

    /// Physical block chain is not contiguous or has stale back links.
    #[error("block chain broken at header {offset:#x}")]
    BrokenChain {
        /// Header offset where the chain broke.
        offset: usize,
    },

    /// Recorded `used` disagrees with the live blocks.
    #[error("used bytes out of sync: recorded {recorded}, measured {measured}")]
    Accounting {
        /// Value the allocator tracked.
        recorded: usize,
        /// Value measured by walking the chain.
        measured: usize,
    },

    /// A previous violation poisoned the allocator.
    #[error("allocator is poisoned by an earlier invariant violation")]
    Poisoned,
}

/// Errors returned by [`crate::memory::BlockAllocator`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Zero-byte request, bad alignment, or out-of-range access.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: &'static str,
    },

    /// Capacity exhausted or no block could be carved.
    #[error("out of memory: requested {requested} bytes, {remaining} remaining")]
    OutOfMemory {
        /// Bytes requested (payload plus header).
        requested: usize,
        /// Bytes not accounted to live allocations.
        remaining: usize,
    },

    /// Allocator state can no longer be trusted.
    #[error("invariant violation: {0}")]
    InvariantViolation(#[from] Violation),
}

impl AllocError {
    /// Returns true for errors after which the process must not continue.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::InvariantViolation(_))
    }

    pub(crate) const fn invalid(reason: &'static str) -> Self {
        Self::InvalidArgument { reason }
    }
}

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors returned by [`crate::jobs::WorkQueue`].
#[derive(Error, Debug)]
pub enum QueueError {
    /// Ring buffer has no free slot right now.
    #[error("work queue full: capacity {capacity}")]
    Full {
        /// Ring capacity (one slot is always kept open).
        capacity: usize,
    },

    /// Ring stayed full for the whole bounded wait.
    #[error("work queue backpressure: still full after {waited:?} (capacity {capacity})")]
    Backpressure {
        /// Ring capacity.
        capacity: usize,
        /// How long the producer waited.
        waited: Duration,
    },

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Backing storage could not be carved from the allocator.
    #[error("failed to provision queue storage: {0}")]
    Provision(#[from] AllocError),
}

/// Result type for work queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but make no sense together.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What was rejected.
        reason: String,
    },
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!AllocError::invalid("zero-byte request").is_fatal());
        assert!(AllocError::OutOfMemory { requested: 64, remaining: 0 }.is_fatal());
        assert!(AllocError::from(Violation::DoubleFree { offset: 32 }).is_fatal());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = AllocError::from(Violation::ForeignPointer { offset: 0x40 });
        assert_eq!(
            err.to_string(),
            "invariant violation: pointer 0x40 is not owned by this allocator"
        );
    }
}
