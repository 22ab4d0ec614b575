//! Resilient HTTP client for the truss framework.
//!
//! The client is a tower [`Service`](tower::Service) stack over a shared
//! `reqwest` connection pool:
//!
//! ```text
//! InvocationManager          high-level JSON / form / streaming calls
//!   └─ Resilient             per-host circuit breakers + retries
//!        └─ HttpLogging      capped request/response body capture
//!             └─ Dial        reqwest execution, context-cancellable
//! ```
//!
//! Requests are `http::Request<reqwest::Body>` values whose extensions
//! carry the caller's [`Context`](truss_core::Context) and, for
//! replayable bodies, a [`ReplayBody`] hook that retries use to rewind.
//!
//! # Example
//!
//! ```no_run
//! use truss_client::{CallOptions, InvocationManager};
//! use truss_core::Context;
//!
//! # async fn example() -> Result<(), truss_client::ClientError> {
//! let manager = InvocationManager::builder().build();
//! let ctx = Context::background();
//!
//! let response = manager
//!     .invoke(
//!         &ctx,
//!         http::Method::POST,
//!         "https://api.example.com/v1/things",
//!         &serde_json::json!({ "name": "truss" }),
//!         http::HeaderMap::new(),
//!         CallOptions::default(),
//!     )
//!     .await?;
//! let body = response.to_bytes(1 << 20).await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod breaker;
mod dial;
mod error;
mod logging;
mod manager;
mod registry;
mod resilience;
mod response;

pub use backoff::RetryPolicy;
pub use breaker::{BreakerConfig, BreakerMetrics, BreakerState};
pub use dial::{Dial, HttpRequest, ReplayBody};
pub use error::ClientError;
pub use logging::{CappedBuffer, HttpLogging, HttpLoggingConfig, HttpLoggingLayer, TeeBody};
pub use manager::{CallOptions, InvocationManager, InvocationManagerBuilder};
pub use registry::BreakerKey;
pub use resilience::{Resilient, ResilientLayer, ResilienceConfig, ResilienceConfigBuilder};
pub use response::InvokeResponse;
