//! # Work Queue
//!
//! Bounded multi-producer/multi-consumer queue feeding a worker pool.
//!
//! ## Architecture
//!
//! ```text
//!   Producer 1 ──┐                                 ┌──▶ Worker 1
//!   Producer 2 ──┼──▶ [Ring Buffer] ──[Semaphore]──┼──▶ Worker 2
//!   Producer N ──┘     (CAS cursors)                └──▶ Worker N
//!                            ▲
//!                            └──── wait() caller drains too
//! ```
//!
//! - Producers claim ring slots with CAS and release one semaphore permit
//!   per item (capped at the worker count).
//! - Workers claim items with CAS and park on the semaphore when the ring is
//!   empty.
//! - `wait()` turns the calling thread into an extra worker until every
//!   published item has completed, then rewinds the counters for the next
//!   wave. Threads stay alive between waves.
//!
//! A full ring never corrupts anything and never stalls a producer forever:
//! the producer runs pending items itself until a slot opens.
//!
//! A panicking item is caught, logged and counted as completed. That only
//! holds where panics unwind; under the workspace's `panic = "abort"`
//! dev and release profiles a panicking item takes the process down.
//!
//! [`WorkQueue::provisioned`] charges the ring and thread table to an
//! allocator so its capacity accounts for them. The reservation is
//! accounting only: the ring itself lives in ordinary heap memory and never
//! touches the reserved bytes.

use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::{Backoff, CachePadded};

use super::ring::{Job, Pop, RingBuffer};
use super::semaphore::Semaphore;
use crate::config::WorkQueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::memory::{BlockAllocator, HeapPtr};

/// Smallest ring a queue is built with.
pub const MIN_CAPACITY: usize = 8;

/// Snapshot of queue counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueStats {
    /// Ring slots (one always stays open).
    pub capacity: usize,
    /// Worker threads.
    pub workers: usize,
    /// Published items not yet claimed.
    pub pending: usize,
    /// Items published since the last completed `wait()`.
    pub completion_goal: usize,
    /// Items finished since the last completed `wait()`.
    pub completed: usize,
    /// Wake-ups banked for workers that have not parked yet.
    pub idle_permits: usize,
}

/// Result of one attempt to run queued work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Claim {
    Empty,
    Contended,
    Ran,
}

/// State shared between the queue handle and its workers.
struct Shared {
    ring: RingBuffer,
    semaphore: Semaphore,
    completion_goal: CachePadded<AtomicUsize>,
    completed: CachePadded<AtomicUsize>,
    shutdown: AtomicBool,
}

impl Shared {
    fn try_publish(&self, job: Job) -> Result<(), Job> {
        // Raised first so completed never overtakes the goal.
        self.completion_goal.fetch_add(1, Ordering::AcqRel);
        match self.ring.try_push(job) {
            Ok(()) => {
                self.semaphore.release();
                Ok(())
            }
            Err(job) => {
                self.completion_goal.fetch_sub(1, Ordering::AcqRel);
                Err(job)
            }
        }
    }

    fn execute_next(&self) -> Claim {
        match self.ring.try_pop() {
            Pop::Empty => Claim::Empty,
            Pop::Contended => Claim::Contended,
            Pop::Item(job) => {
                // Only reached with unwinding panics; `panic = "abort"` builds
                // never return here from a panicking item.
                match job {
                    Some(job) => {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("work item panicked");
                        }
                    }
                    None => tracing::error!("claimed ring slot held no work item"),
                }
                self.completed.fetch_add(1, Ordering::AcqRel);
                Claim::Ran
            }
        }
    }
}

/// Arena bytes reserved for the queue's ring and thread table.
struct Provision {
    allocator: Arc<BlockAllocator>,
    ptr: HeapPtr,
}

impl Drop for Provision {
    fn drop(&mut self) {
        if let Err(err) = self.allocator.deallocate(self.ptr) {
            tracing::error!(%err, "failed to release work queue storage");
        }
    }
}

/// Bounded work queue with a helping worker pool.
///
/// # Example
///
/// ```rust,ignore
/// let queue = WorkQueue::new(&WorkQueueConfig::default())?;
///
/// for chunk in 0..64 {
///     queue.add_work(process_chunk, chunk);
/// }
/// queue.wait(); // every chunk has run exactly once
/// ```
pub struct WorkQueue {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    provision: Option<Provision>,
}

impl WorkQueue {
    /// Creates the queue and spawns its workers.
    ///
    /// Capacity is `max(max_items, MIN_CAPACITY)`. Without an explicit
    /// `worker_threads`, the pool gets one thread per logical core minus
    /// `reserved_cores`; either way the count is clamped to `[1, capacity]`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Spawn`] if a worker thread cannot be started.
    pub fn new(config: &WorkQueueConfig) -> QueueResult<Self> {
        Self::build(config, None)
    }

    /// Like [`Self::new`], with the size of the ring and thread table
    /// reserved from `allocator`. The reserved bytes are never read or
    /// written; they are returned when the queue drops.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Provision`] if the allocator cannot supply the
    /// storage, or [`QueueError::Spawn`] if a worker cannot be started.
    pub fn provisioned(config: &WorkQueueConfig, allocator: Arc<BlockAllocator>) -> QueueResult<Self> {
        let capacity = ring_capacity(config);
        let workers = worker_count(config, capacity);
        let bytes = capacity * RingBuffer::slot_size() + workers * std::mem::size_of::<JoinHandle<()>>();
        let ptr = allocator.allocate_aligned(bytes, RingBuffer::slot_align())?;
        Self::build(config, Some(Provision { allocator, ptr }))
    }

    fn build(config: &WorkQueueConfig, provision: Option<Provision>) -> QueueResult<Self> {
        let capacity = ring_capacity(config);
        let worker_count = worker_count(config, capacity);

        let shared = Arc::new(Shared {
            ring: RingBuffer::new(capacity),
            semaphore: Semaphore::new(0, worker_count),
            completion_goal: CachePadded::new(AtomicUsize::new(0)),
            completed: CachePadded::new(AtomicUsize::new(0)),
            shutdown: AtomicBool::new(false),
        });

        let mut queue = Self {
            shared,
            workers: Vec::with_capacity(worker_count),
            provision,
        };

        for index in 0..worker_count {
            let shared = Arc::clone(&queue.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || worker_loop(&shared, index))?;
            queue.workers.push(handle);
        }

        tracing::debug!(
            capacity,
            workers = worker_count,
            provisioned = queue.provision.is_some(),
            "work queue created"
        );
        Ok(queue)
    }

    /// Ring slots; `capacity() - 1` items fit at once.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    /// Worker threads in the pool. The semaphore is capped at one permit
    /// per worker.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.semaphore.max_count()
    }

    /// Published items not yet claimed by anyone.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.ring.pending()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity(),
            workers: self.worker_count(),
            pending: self.pending(),
            completion_goal: self.shared.completion_goal.load(Ordering::Acquire),
            completed: self.shared.completed.load(Ordering::Acquire),
            idle_permits: self.shared.semaphore.count(),
        }
    }

    /// Enqueues `proc(arg)`.
    ///
    /// If the ring is full the caller runs pending items until a slot opens.
    pub fn add_work<A: Send + 'static>(&self, proc: fn(A), arg: A) {
        self.add_job(move || proc(arg));
    }

    /// Enqueues a closure. Same full-ring behavior as [`Self::add_work`].
    pub fn add_job<F: FnOnce() + Send + 'static>(&self, job: F) {
        let mut job: Job = Box::new(job);
        let backoff = Backoff::new();
        loop {
            match self.shared.try_publish(job) {
                Ok(()) => return,
                Err(rejected) => {
                    job = rejected;
                    self.help_drain(&backoff);
                }
            }
        }
    }

    /// Enqueues `proc(arg)` only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] if the ring is full; `arg` is dropped.
    pub fn try_add_work<A: Send + 'static>(&self, proc: fn(A), arg: A) -> QueueResult<()> {
        self.shared
            .try_publish(Box::new(move || proc(arg)))
            .map_err(|_| QueueError::Full {
                capacity: self.capacity(),
            })
    }

    /// Enqueues `proc(arg)`, helping drain for at most `timeout` while the
    /// ring is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Backpressure`] if no slot opened in time; `arg`
    /// is dropped.
    pub fn add_work_timeout<A: Send + 'static>(
        &self,
        proc: fn(A),
        arg: A,
        timeout: Duration,
    ) -> QueueResult<()> {
        let started = Instant::now();
        let mut job: Job = Box::new(move || proc(arg));
        let backoff = Backoff::new();
        loop {
            match self.shared.try_publish(job) {
                Ok(()) => return Ok(()),
                Err(rejected) => job = rejected,
            }
            let waited = started.elapsed();
            if waited >= timeout {
                tracing::warn!(capacity = self.capacity(), ?waited, "work queue backpressure");
                return Err(QueueError::Backpressure {
                    capacity: self.capacity(),
                    waited,
                });
            }
            self.help_drain(&backoff);
        }
    }

    /// Runs queued items on the calling thread until every published item
    /// has completed, then rewinds the counters to zero.
    pub fn wait(&self) {
        let backoff = Backoff::new();
        loop {
            // Completed before goal: the goal never trails completions.
            let completed = self.shared.completed.load(Ordering::Acquire);
            let goal = self.shared.completion_goal.load(Ordering::Acquire);
            if completed == goal {
                self.rewind(completed);
                return;
            }
            self.help_drain(&backoff);
        }
    }

    fn rewind(&self, completed: usize) {
        if completed == 0 {
            return;
        }
        if self
            .shared
            .completed
            .compare_exchange(completed, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.completion_goal.fetch_sub(completed, Ordering::AcqRel);
        }
    }

    fn help_drain(&self, backoff: &Backoff) {
        match self.shared.execute_next() {
            Claim::Ran => backoff.reset(),
            Claim::Contended => backoff.spin(),
            Claim::Empty => backoff.snooze(),
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.semaphore.close();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("work queue worker panicked");
            }
        }

        let dropped = self.shared.ring.pending();
        if dropped > 0 {
            tracing::warn!(dropped, "work queue destroyed with pending items");
        }
        tracing::debug!(workers = self.worker_count(), "work queue destroyed");
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").field("stats", &self.stats()).finish()
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    tracing::trace!(index, "worker started");
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        match shared.execute_next() {
            Claim::Ran | Claim::Contended => {}
            Claim::Empty => {
                if !shared.semaphore.acquire() {
                    break;
                }
            }
        }
    }
    tracing::trace!(index, "worker stopped");
}

fn ring_capacity(config: &WorkQueueConfig) -> usize {
    config.max_items.max(MIN_CAPACITY)
}

fn worker_count(config: &WorkQueueConfig, capacity: usize) -> usize {
    let requested = config.worker_threads.unwrap_or_else(|| {
        let cores = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        cores.saturating_sub(config.reserved_cores)
    });
    requested.clamp(1, capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    static HITS: AtomicUsize = AtomicUsize::new(0);

    fn bump(amount: usize) {
        HITS.fetch_add(amount, Ordering::Relaxed);
    }

    #[test]
    fn test_capacity_floor_and_worker_clamp() {
        let config = WorkQueueConfig {
            max_items: 2,
            worker_threads: Some(64),
            ..WorkQueueConfig::default()
        };
        assert_eq!(ring_capacity(&config), MIN_CAPACITY);
        assert_eq!(worker_count(&config, MIN_CAPACITY), MIN_CAPACITY);

        let config = WorkQueueConfig {
            reserved_cores: usize::MAX,
            ..WorkQueueConfig::default()
        };
        assert_eq!(worker_count(&config, 256), 1);
    }

    #[test]
    fn test_add_work_then_wait() {
        let queue = WorkQueue::new(&WorkQueueConfig::with_workers(2)).unwrap();
        for _ in 0..100 {
            queue.add_work(bump, 1);
        }
        queue.wait();
        assert!(HITS.load(Ordering::Relaxed) >= 100);

        let stats = queue.stats();
        assert_eq!(stats.completion_goal, 0);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.workers, 2);
        assert!(stats.idle_permits <= stats.workers);
    }

    #[test]
    fn test_wait_on_idle_queue_returns() {
        let queue = WorkQueue::new(&WorkQueueConfig::single_worker()).unwrap();
        queue.wait();
        assert_eq!(queue.stats().completion_goal, 0);
    }

    #[test]
    fn test_panicking_item_still_completes() {
        let queue = WorkQueue::new(&WorkQueueConfig::single_worker()).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.add_job(|| panic!("boom"));
        {
            let ran = Arc::clone(&ran);
            queue.add_job(move || {
                ran.fetch_add(1, Ordering::Relaxed);
            });
        }
        queue.wait();
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }
}
