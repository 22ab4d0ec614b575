use thiserror::Error;
use truss_core::ContextError;

/// Errors returned by [`Pipe`](crate::Pipe) operations.
#[derive(Debug, Error)]
pub enum PipeError {
    /// The pipe was closed; no further writes are accepted.
    #[error("result pipe is closed")]
    Closed,

    /// The context was cancelled while waiting on the pipe.
    #[error(transparent)]
    Cancelled(#[from] ContextError),
}

impl PipeError {
    /// True if the error is the closed-pipe sentinel.
    pub fn is_closed(&self) -> bool {
        matches!(self, PipeError::Closed)
    }
}

/// Errors returned by [`WorkerPool`](crate::WorkerPool) submissions.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is at capacity and was configured non-blocking.
    #[error("worker pool is full: capacity {capacity} reached")]
    Full {
        /// Configured capacity of the rejecting shard.
        capacity: usize,
    },

    /// The pool has been shut down.
    #[error("worker pool is closed")]
    Closed,

    /// The context was cancelled before the task could be scheduled.
    #[error(transparent)]
    Cancelled(#[from] ContextError),
}

impl PoolError {
    /// True if the error indicates the pool was full.
    pub fn is_full(&self) -> bool {
        matches!(self, PoolError::Full { .. })
    }
}
