use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::Extensions;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};

/// Why a [`Context`] is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled explicitly or by a parent.
    #[error("context cancelled")]
    Cancelled,

    /// The context's deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation scope plus immutable request-scoped values.
///
/// Contexts form a tree: [`Context::with_cancel`] and
/// [`Context::with_timeout`] derive children whose tokens fire when the
/// parent's does. Values are copy-on-write: attaching a value produces a
/// new `Context`, the original is never mutated.
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline_hit: Arc<AtomicBool>,
    values: Extensions,
}

impl Context {
    /// A root context that is never cancelled and holds no values.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline_hit: Arc::new(AtomicBool::new(false)),
            values: Extensions::new(),
        }
    }

    /// The underlying cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the context has been cancelled or timed out.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the context is cancelled. Safe to use in `select!`.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The reason the context is dead, or `None` while it is live.
    pub fn error(&self) -> Option<ContextError> {
        if !self.token.is_cancelled() {
            return None;
        }
        if self.deadline_hit.load(Ordering::Acquire) {
            Some(ContextError::DeadlineExceeded)
        } else {
            Some(ContextError::Cancelled)
        }
    }

    /// Derives a child context plus the token that cancels it.
    ///
    /// Cancelling the parent cancels the child; not the other way around.
    pub fn with_cancel(&self) -> (Context, CancellationToken) {
        let child = self.token.child_token();
        let ctx = Context {
            token: child.clone(),
            deadline_hit: Arc::new(AtomicBool::new(false)),
            values: self.values.clone(),
        };
        (ctx, child)
    }

    /// Derives a child context that is cancelled after `timeout`.
    ///
    /// The returned [`DropGuard`] cancels the child when dropped; holders
    /// that want the child to outlive the current scope (a streamed
    /// response body, say) keep the guard alive alongside the stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, DropGuard) {
        let child = self.token.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let timer_token = child.clone();
        let timer_flag = Arc::clone(&deadline_hit);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    timer_flag.store(true, Ordering::Release);
                    timer_token.cancel();
                }
                _ = timer_token.cancelled() => {}
            }
        });
        let ctx = Context {
            token: child.clone(),
            deadline_hit,
            values: self.values.clone(),
        };
        (ctx, child.drop_guard())
    }

    /// Returns a new context carrying `value`, keyed by its type.
    ///
    /// An existing value of the same type is shadowed in the child; the
    /// parent context is untouched.
    pub fn with_value<T>(&self, value: T) -> Context
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut values = self.values.clone();
        values.insert(value);
        Context {
            token: self.token.clone(),
            deadline_hit: Arc::clone(&self.deadline_hit),
            values,
        }
    }

    /// Looks up a value of type `T` attached to this context.
    pub fn value<T>(&self) -> Option<&T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.values.get::<T>()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}
