//! Core context primitives shared across the truss workspace.
//!
//! A [`Context`] carries a cancellation signal and a set of immutable,
//! typed request-scoped values. Every public operation in the framework
//! accepts one; suspension points (`select!` on channel ops, backoff
//! sleeps, HTTP round-trips) race against it and return
//! [`ContextError`] when it fires first.

mod context;

pub use context::{Context, ContextError};

/// Boxed error type used at the framework's dyn seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
