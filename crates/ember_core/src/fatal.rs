//! # Fatal Error Handler
//!
//! The single top-level handler for unrecoverable conditions.
//!
//! Allocator exhaustion and invariant violations surface as typed errors so
//! they can be inspected in tests. Production call sites route them here,
//! where the error is logged with the caller's location and the process is
//! aborted. Nothing continues with corrupted state.
//!
//! ```rust,ignore
//! use ember_core::fatal::OrAbort;
//!
//! let ptr = allocator.allocate(256).or_abort();
//! ```

use std::fmt::Display;
use std::panic::Location;

/// Logs `err` with the caller's file and line, then aborts the process.
#[cold]
#[track_caller]
pub fn abort_with<E: Display>(err: E) -> ! {
    let location = Location::caller();
    tracing::error!(
        file = location.file(),
        line = location.line(),
        "fatal: {err}"
    );
    eprintln!("fatal at {}:{}: {err}", location.file(), location.line());
    std::process::abort()
}

/// Extension for routing a `Result` to [`abort_with`].
pub trait OrAbort<T> {
    /// Unwraps the value or aborts the process after logging the error.
    fn or_abort(self) -> T;
}

impl<T, E: Display> OrAbort<T> for Result<T, E> {
    #[inline]
    #[track_caller]
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => abort_with(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AllocError;

    #[test]
    fn test_or_abort_passes_values_through() {
        let ok: Result<u32, AllocError> = Ok(7);
        assert_eq!(ok.or_abort(), 7);
    }
}
