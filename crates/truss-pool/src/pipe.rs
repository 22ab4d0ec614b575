use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use truss_core::{BoxError, Context, ContextError};

use crate::error::PipeError;

/// A single item carried by a [`Pipe`]: a value or the producer's error.
pub type PipeItem<T> = Result<T, BoxError>;

/// Close-once, single-producer/single-consumer result channel.
///
/// Writes and reads race against the supplied [`Context`]; a cancelled
/// context aborts the operation with its error rather than blocking.
/// [`close`](Pipe::close) is idempotent: the first call drops the sender,
/// later calls are no-ops. After close, writes fail with
/// [`PipeError::Closed`] and reads drain buffered items before signalling
/// end-of-stream with `None`.
pub struct Pipe<T> {
    tx: Mutex<Option<mpsc::Sender<PipeItem<T>>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<PipeItem<T>>>,
    closed: AtomicBool,
}

impl<T: Send> Pipe<T> {
    /// Creates a pipe buffering up to `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Writes a value, waiting for buffer space.
    pub async fn write(&self, ctx: &Context, value: T) -> Result<(), PipeError> {
        self.send(ctx, Ok(value)).await
    }

    /// Writes a producer-side error as an in-band item.
    pub async fn write_err(&self, ctx: &Context, err: BoxError) -> Result<(), PipeError> {
        self.send(ctx, Err(err)).await
    }

    async fn send(&self, ctx: &Context, item: PipeItem<T>) -> Result<(), PipeError> {
        let tx = {
            let guard = self.tx.lock().expect("pipe sender lock poisoned");
            guard.clone()
        };
        let Some(tx) = tx else {
            return Err(PipeError::Closed);
        };
        tokio::select! {
            _ = ctx.cancelled() => Err(ctx.error().unwrap_or(ContextError::Cancelled).into()),
            sent = tx.send(item) => sent.map_err(|_| PipeError::Closed),
        }
    }

    /// Reads the next item.
    ///
    /// Returns `Ok(None)` once the pipe is closed and drained, and
    /// `Err(PipeError::Cancelled)` if the context fires first.
    pub async fn read(&self, ctx: &Context) -> Result<Option<PipeItem<T>>, PipeError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = ctx.cancelled() => Err(ctx.error().unwrap_or(ContextError::Cancelled).into()),
            item = rx.recv() => Ok(item),
        }
    }

    /// Closes the write side. Safe to call from any path, any number of
    /// times; only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut guard = self.tx.lock().expect("pipe sender lock poisoned");
        guard.take();
    }

    /// True once [`close`](Pipe::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
