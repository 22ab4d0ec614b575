use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;
use truss_core::{BoxError, Context};

use crate::error::PoolError;
use crate::pipe::Pipe;
use crate::pool::WorkerPool;

/// The user-supplied body of a [`Job`]. Receives the submission context
/// and the job's pipe; values and in-band errors go through the pipe,
/// the returned error drives the retry loop.
pub type ProcessFn<T> =
    Arc<dyn Fn(Context, Arc<Pipe<T>>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// A retriable unit of background work with an owned result pipe.
///
/// The run counter is monotone and the pipe is closed exactly once, on
/// the terminal attempt, whichever way the job ends.
pub struct Job<T> {
    id: String,
    retries: u32,
    runs: AtomicU32,
    process: Option<ProcessFn<T>>,
    pipe: Arc<Pipe<T>>,
}

impl<T: Send + 'static> Job<T> {
    /// Creates a job from a process function.
    ///
    /// `retries` is the number of re-submissions allowed after the first
    /// failed attempt; `buffer` sizes the result pipe.
    pub fn new<F>(id: impl Into<String>, retries: u32, buffer: usize, process: F) -> Self
    where
        F: Fn(Context, Arc<Pipe<T>>) -> BoxFuture<'static, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            retries,
            runs: AtomicU32::new(0),
            process: Some(Arc::new(process)),
            pipe: Arc::new(Pipe::new(buffer)),
        }
    }

    /// Creates a job with no process function; submitting it delivers an
    /// error through the pipe. Mostly useful in tests of the submission
    /// contract.
    pub fn without_process(id: impl Into<String>, buffer: usize) -> Self {
        Self {
            id: id.into(),
            retries: 0,
            runs: AtomicU32::new(0),
            process: None,
            pipe: Arc::new(Pipe::new(buffer)),
        }
    }

    /// The job identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of attempts started so far.
    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::Acquire)
    }

    /// The job's result pipe, for the consuming side.
    pub fn pipe(&self) -> &Pipe<T> {
        &self.pipe
    }

    fn pipe_arc(&self) -> Arc<Pipe<T>> {
        Arc::clone(&self.pipe)
    }

    fn can_retry(&self) -> bool {
        self.runs() <= self.retries
    }
}

/// Schedules `job` on `pool`.
///
/// The spawned task runs the process function and, on failure, resubmits
/// the job while the retry budget lasts. The terminal attempt writes the
/// last error (if any) and closes the pipe; a cancelled context closes
/// the pipe without an error item.
pub async fn submit<T: Send + 'static>(
    ctx: &Context,
    pool: &Arc<WorkerPool>,
    job: Arc<Job<T>>,
) -> Result<(), PoolError> {
    let task = run_attempt(ctx.clone(), Arc::clone(pool), job);
    pool.submit(ctx, task).await
}

fn run_attempt<T: Send + 'static>(
    ctx: Context,
    pool: Arc<WorkerPool>,
    job: Arc<Job<T>>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(process) = job.process.clone() else {
            let _ = job
                .pipe
                .write_err(&ctx, format!("job {} has no process function", job.id()).into())
                .await;
            job.pipe.close();
            return;
        };

        job.runs.fetch_add(1, Ordering::AcqRel);
        match process(ctx.clone(), job.pipe_arc()).await {
            Ok(()) => job.pipe.close(),
            Err(err) => {
                if ctx.error().is_some() {
                    job.pipe.close();
                    return;
                }
                if job.can_retry() {
                    debug!(job = %job.id(), runs = job.runs(), "resubmitting failed job");
                    let next = run_attempt(ctx.clone(), Arc::clone(&pool), Arc::clone(&job));
                    if pool.submit(&ctx, next).await.is_err() {
                        let _ = job.pipe.write_err(&ctx, err).await;
                        job.pipe.close();
                    }
                } else {
                    let _ = job.pipe.write_err(&ctx, err).await;
                    job.pipe.close();
                }
            }
        }
    })
}
