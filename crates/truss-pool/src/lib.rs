//! Bounded worker pool with typed jobs for the truss framework.
//!
//! Three pieces compose here:
//!
//! - [`Pipe`], a close-once channel carrying `Result` items, with
//!   context-aware reads and writes. Each job owns exactly one.
//! - [`WorkerPool`], a semaphore-bounded executor. Submissions either
//!   queue for a worker or, in non-blocking mode, fail fast with
//!   [`PoolError::Full`]. Multiple shards with least-loaded dispatch are
//!   available for workloads that contend on a single semaphore.
//! - [`Job`], which wraps a user function into a retriable task whose
//!   terminal outcome (value, error, or cancellation) is always delivered
//!   through the pipe, which is closed exactly once.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use truss_core::Context;
//! use truss_pool::{Job, PoolConfig, WorkerPool};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pool = Arc::new(WorkerPool::new(PoolConfig::builder().capacity(4).build()));
//! let ctx = Context::background();
//!
//! let job = Job::new("greet", 0, 1, |_ctx, pipe| {
//!     Box::pin(async move {
//!         pipe.write(&Context::background(), "hello").await?;
//!         Ok(())
//!     })
//! });
//! let job = Arc::new(job);
//! truss_pool::submit(&ctx, &pool, Arc::clone(&job)).await.unwrap();
//!
//! let item = job.pipe().read(&ctx).await.unwrap();
//! assert_eq!(item.unwrap().unwrap(), "hello");
//! pool.shutdown();
//! # }
//! ```

mod error;
mod job;
mod pipe;
mod pool;

pub use error::{PipeError, PoolError};
pub use job::{submit, Job, ProcessFn};
pub use pipe::{Pipe, PipeItem};
pub use pool::{PoolConfig, PoolConfigBuilder, PoolMetrics, WorkerPool};

pub use truss_core::BoxError;
