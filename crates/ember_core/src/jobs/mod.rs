//! # Job System
//!
//! Callable work items dispatched to a pool of worker threads.
//!
//! ## The Problem
//!
//! ```text
//! Asset streaming, mesh building, file I/O:
//!   many producers, many small items, one frame budget
//! ```
//!
//! ## The Solution
//!
//! A bounded ring claimed through compare-and-swap, a counting semaphore to
//! park idle workers, and a `wait()` that puts the calling thread to work
//! instead of idling it.
//!
//! The queue is an explicitly constructed service. Create it once at startup
//! and pass it by reference to whatever needs it.

mod queue;
mod ring;
mod semaphore;

pub use queue::{QueueStats, WorkQueue, MIN_CAPACITY};
pub use semaphore::Semaphore;
