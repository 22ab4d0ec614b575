//! Service framework core for backend services that talk to the
//! outside world.
//!
//! `truss` bundles three subsystems, each also available as its own
//! crate and gated here behind a feature:
//!
//! - **`client`**: a resilient HTTP client with per-host circuit breakers
//!   with LRU+TTL bounded state, retries with body replay, capped
//!   request/response capture, and a JSON/form/streaming invocation
//!   manager whose per-call timeout rides on the response body.
//! - **`pool`**: a bounded worker pool running retriable jobs, each
//!   delivering its outcome through a close-once result pipe.
//! - **`auth`** / **`authz`**: a JWKS-backed JWT authenticator with
//!   live key rotation, claims context carriers, and a relation-tuple
//!   authorization client with tenancy/capability checkers and
//!   self-healing provisioning.
//!
//! Everything shares the [`Context`] cancellation-and-values carrier
//! from `truss-core`.
//!
//! # Quick start
//!
//! ```toml
//! [dependencies]
//! truss = { version = "0.1", features = ["full"] }
//! ```

pub use truss_core::{BoxError, Context, ContextError};

/// Worker pool, jobs, and result pipes.
#[cfg(feature = "pool")]
pub mod pool {
    pub use truss_pool::*;
}

/// Resilient HTTP client and invocation manager.
#[cfg(feature = "client")]
pub mod client {
    pub use truss_client::*;
}

/// JWT authentication, JWKS cache, and claims.
#[cfg(feature = "auth")]
pub mod auth {
    pub use truss_auth::*;
}

/// Relation-tuple authorization and permission checkers.
#[cfg(feature = "authz")]
pub mod authz {
    pub use truss_authz::*;
}
