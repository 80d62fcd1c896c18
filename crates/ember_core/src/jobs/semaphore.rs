//! # Counting Semaphore
//!
//! Parks idle workers until work is published.
//!
//! The count is capped: releasing past `max_count` is a no-op, so a burst of
//! publishes wakes at most one worker per permit slot instead of piling up
//! stale permits. `close()` wakes every waiter for teardown.

use parking_lot::{Condvar, Mutex};

struct SemaphoreState {
    count: usize,
    closed: bool,
}

/// Counting semaphore with a maximum count.
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    available: Condvar,
    max_count: usize,
}

impl Semaphore {
    /// Creates a semaphore holding `initial` permits, capped at `max_count`.
    #[must_use]
    pub fn new(initial: usize, max_count: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                count: initial.min(max_count),
                closed: false,
            }),
            available: Condvar::new(),
            max_count,
        }
    }

    /// Adds one permit and wakes one waiter.
    ///
    /// Returns false if the count is already at its cap or the semaphore is
    /// closed.
    pub fn release(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.count >= self.max_count {
            return false;
        }
        state.count += 1;
        self.available.notify_one();
        true
    }

    /// Blocks until a permit is available and takes it.
    ///
    /// Returns false once the semaphore is closed.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return false;
            }
            if state.count > 0 {
                state.count -= 1;
                return true;
            }
            self.available.wait(&mut state);
        }
    }

    /// Wakes every waiter; all later acquires fail.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    /// Permits currently available.
    #[must_use]
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Cap on the permit count.
    #[inline]
    #[must_use]
    pub const fn max_count(&self) -> usize {
        self.max_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_release_is_capped() {
        let semaphore = Semaphore::new(0, 2);
        assert!(semaphore.release());
        assert!(semaphore.release());
        assert!(!semaphore.release());
        assert_eq!(semaphore.count(), 2);
        assert_eq!(semaphore.max_count(), 2);

        assert!(semaphore.acquire());
        assert!(semaphore.acquire());
        assert_eq!(semaphore.count(), 0);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let semaphore = Arc::new(Semaphore::new(0, 1));
        let waiter = {
            let semaphore = Arc::clone(&semaphore);
            thread::spawn(move || semaphore.acquire())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(semaphore.release());
        assert!(waiter.join().unwrap());
        assert_eq!(semaphore.count(), 0);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let semaphore = Arc::new(Semaphore::new(0, 4));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let semaphore = Arc::clone(&semaphore);
                thread::spawn(move || semaphore.acquire())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        semaphore.close();
        for waiter in waiters {
            assert!(!waiter.join().unwrap());
        }
        assert!(!semaphore.release());
    }
}
