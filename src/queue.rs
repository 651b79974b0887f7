//! Task transport between the dispatcher and the workers.
//!
//! The dispatcher only ever sees opaque envelope bytes going out and coming
//! back. Any transport with at-least-once delivery and a waitable handle per
//! task fits behind [`TaskQueue`]; [`LocalPool`] is the in-process one.

mod local;

use std::time::Duration;

pub use local::LocalPool;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for task result")]
    Timeout,
}

/// Accepts task payloads and hands back a handle per task.
pub trait TaskQueue {
    type Handle: TaskHandle;

    fn submit(&self, payload: Vec<u8>) -> Result<Self::Handle, QueueError>;
}

/// A future-like handle on one submitted task.
pub trait TaskHandle {
    /// Wait for the task's reply.
    ///
    /// `None` for `timeout` waits indefinitely. `Ok(None)` means the task
    /// faulted and produced nothing; once a handle has returned `Ok`, it
    /// must not be polled again.
    fn get(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, WaitError>;
}
