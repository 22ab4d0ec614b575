use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error};
use truss_core::{Context, ContextError};

use crate::error::PoolError;

type PanicHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Configuration for a [`WorkerPool`].
#[derive(Clone)]
pub struct PoolConfig {
    pub(crate) capacity: usize,
    pub(crate) shards: usize,
    pub(crate) non_blocking: bool,
    pub(crate) name: String,
    pub(crate) panic_handler: Option<PanicHandler>,
}

impl PoolConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }
}

/// Builder for [`PoolConfig`].
pub struct PoolConfigBuilder {
    capacity: usize,
    shards: usize,
    non_blocking: bool,
    name: String,
    panic_handler: Option<PanicHandler>,
}

impl PoolConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults:
    /// - capacity: 100 workers per shard
    /// - shards: 1 (single pool)
    /// - non_blocking: false (submissions queue for a worker)
    /// - name: `"worker-pool"`
    pub fn new() -> Self {
        Self {
            capacity: 100,
            shards: 1,
            non_blocking: false,
            name: "worker-pool".to_string(),
            panic_handler: None,
        }
    }

    /// Sets the worker capacity of each shard (minimum 1).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Splits the pool into `shards` sub-pools with least-loaded dispatch.
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }

    /// When set, a full pool rejects submissions with
    /// [`PoolError::Full`] instead of queueing.
    pub fn non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    /// Sets the pool name used in tracing fields.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Installs a handler invoked with the panic message when a task
    /// panics. The default handler logs at error level.
    pub fn panic_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(f));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> PoolConfig {
        PoolConfig {
            capacity: self.capacity,
            shards: self.shards,
            non_blocking: self.non_blocking,
            name: self.name,
            panic_handler: self.panic_handler,
        }
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of pool load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Total worker capacity across all shards.
    pub capacity: usize,
    /// Permits currently available.
    pub available: usize,
    /// Tasks currently running.
    pub in_flight: usize,
}

/// Semaphore-bounded task executor.
///
/// Each submission holds one worker permit for the lifetime of the task.
/// With more than one shard, submissions go to the shard with the most
/// free permits. [`shutdown`](WorkerPool::shutdown) closes the permit
/// sources: further submissions fail with [`PoolError::Closed`] while
/// in-flight tasks run to completion.
pub struct WorkerPool {
    shards: Vec<Arc<Semaphore>>,
    config: PoolConfig,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Creates a pool from the given configuration.
    pub fn new(config: PoolConfig) -> Self {
        let shards = (0..config.shards)
            .map(|_| Arc::new(Semaphore::new(config.capacity)))
            .collect();
        Self {
            shards,
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Submits a task for execution.
    ///
    /// Contract:
    /// - a cancelled context returns its error without scheduling;
    /// - a full pool returns [`PoolError::Full`] in non-blocking mode,
    ///   otherwise the call waits for a free worker (still racing the
    ///   context);
    /// - a shut-down pool returns [`PoolError::Closed`];
    /// - otherwise the task is spawned and runs to completion.
    pub async fn submit<F>(&self, ctx: &Context, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(err) = ctx.error() {
            return Err(err.into());
        }

        let shard = self.least_loaded();
        let permit = if self.config.non_blocking {
            match shard.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(tokio::sync::TryAcquireError::Closed) => return Err(PoolError::Closed),
                Err(tokio::sync::TryAcquireError::NoPermits) => {
                    debug!(pool = %self.config.name, "submission rejected, pool full");
                    return Err(PoolError::Full {
                        capacity: self.config.capacity,
                    });
                }
            }
        } else {
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(ctx.error().unwrap_or(ContextError::Cancelled).into());
                }
                acquired = shard.clone().acquire_owned() => {
                    acquired.map_err(|_| PoolError::Closed)?
                }
            }
        };

        let in_flight = Arc::clone(&self.in_flight);
        let panic_handler = self.config.panic_handler.clone();
        let name = self.config.name.clone();
        in_flight.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = std::panic::AssertUnwindSafe(task).catch_unwind().await;
            in_flight.fetch_sub(1, Ordering::AcqRel);
            if let Err(payload) = outcome {
                let message = panic_message(payload);
                match panic_handler {
                    Some(handler) => handler(message),
                    None => error!(pool = %name, panic = %message, "worker task panicked"),
                }
            }
        });
        Ok(())
    }

    /// Closes the pool: pending and future submissions fail, running
    /// tasks finish on their own.
    pub fn shutdown(&self) {
        for shard in &self.shards {
            shard.close();
        }
        debug!(pool = %self.config.name, "worker pool shut down");
    }

    /// True once [`shutdown`](WorkerPool::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.shards.iter().all(|s| s.is_closed())
    }

    /// Snapshot of current load.
    pub fn metrics(&self) -> PoolMetrics {
        let available = self.shards.iter().map(|s| s.available_permits()).sum();
        PoolMetrics {
            capacity: self.config.capacity * self.shards.len(),
            available,
            in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }

    fn least_loaded(&self) -> &Arc<Semaphore> {
        self.shards
            .iter()
            .max_by_key(|s| s.available_permits())
            .expect("pool has at least one shard")
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_string()
    }
}
