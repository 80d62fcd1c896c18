//! # Ring Buffer
//!
//! Fixed-capacity slot array shared by every producer and consumer.
//!
//! ## Protocol
//!
//! ```text
//!   read cursor ──┐                 ┌── write cursor
//!                 ▼                 ▼
//!   ┌─────┬─────┬─────┬─────┬─────┬─────┬─────┬─────┐
//!   │     │     │ job │ job │ job │     │     │     │
//!   └─────┴─────┴─────┴─────┴─────┴─────┴─────┴─────┘
//! ```
//!
//! Cursors only move through compare-and-swap and only ever increase; slot
//! indices are the cursors modulo capacity. One slot always stays open, so a
//! ring of capacity `C` holds at most `C - 1` items.
//!
//! Claiming a cursor position and filling the slot are two steps, so every
//! slot carries a small state machine:
//!
//! ```text
//!   EMPTY ──producer──▶ WRITING ──▶ FULL ──consumer──▶ READING ──▶ EMPTY
//! ```
//!
//! A consumer that claims a slot whose producer has not finished writing
//! spins until it turns `FULL`.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;

/// A unit of work.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;
const READING: u8 = 3;

struct Slot {
    state: AtomicU8,
    job: Mutex<Option<Job>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            job: Mutex::new(None),
        }
    }

    fn transition(&self, from: u8, to: u8) {
        let backoff = Backoff::new();
        while self
            .state
            .compare_exchange_weak(from, to, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
    }

    fn store(&self, job: Job) {
        self.transition(EMPTY, WRITING);
        *self.job.lock() = Some(job);
        self.state.store(FULL, Ordering::Release);
    }

    fn take(&self) -> Option<Job> {
        self.transition(FULL, READING);
        let job = self.job.lock().take();
        self.state.store(EMPTY, Ordering::Release);
        job
    }
}

/// Outcome of one claim attempt.
pub(crate) enum Pop {
    /// Nothing unclaimed.
    Empty,
    /// Another consumer won the race; retry.
    Contended,
    /// Claimed a slot. `None` means the slot was claimed but held nothing,
    /// which the slot protocol rules out.
    Item(Option<Job>),
}

/// Lock-free bounded ring of jobs.
pub(crate) struct RingBuffer {
    slots: Box<[Slot]>,
    read: CachePadded<AtomicUsize>,
    write: CachePadded<AtomicUsize>,
}

impl RingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= 2, "ring needs at least two slots");
        Self {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            read: CachePadded::new(AtomicUsize::new(0)),
            write: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Bytes of backing storage one slot occupies.
    pub(crate) const fn slot_size() -> usize {
        std::mem::size_of::<Slot>()
    }

    /// Alignment of one slot.
    pub(crate) const fn slot_align() -> usize {
        std::mem::align_of::<Slot>()
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Published but unclaimed items.
    pub(crate) fn pending(&self) -> usize {
        // Read before write: the write cursor never trails the read cursor.
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        write - read
    }

    /// Claims the next write position and fills it, or hands the job back
    /// if the ring is full.
    pub(crate) fn try_push(&self, job: Job) -> Result<(), Job> {
        let backoff = Backoff::new();
        loop {
            let read = self.read.load(Ordering::Acquire);
            let write = self.write.load(Ordering::Acquire);
            if write - read >= self.capacity() - 1 {
                return Err(job);
            }

            if self
                .write
                .compare_exchange(write, write + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.slots[write % self.capacity()].store(job);
                return Ok(());
            }
            backoff.spin();
        }
    }

    /// Tries once to claim the next read position.
    pub(crate) fn try_pop(&self) -> Pop {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        if read == write {
            return Pop::Empty;
        }

        match self
            .read
            .compare_exchange(read, read + 1, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => Pop::Item(self.slots[read % self.capacity()].take()),
            Err(_) => Pop::Contended,
        }
    }
}
