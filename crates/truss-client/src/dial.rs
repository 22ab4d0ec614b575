use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::future::BoxFuture;
use tower::Service;
use truss_core::{Context, ContextError};

use crate::error::ClientError;

/// The request type flowing through the client stack.
///
/// Extensions carry the caller's [`Context`] and, when the body is
/// replayable, a [`ReplayBody`] hook.
pub type HttpRequest = http::Request<reqwest::Body>;

/// Produces a fresh copy of the request body for a retry attempt.
///
/// Installed by the invocation manager for bytes-backed bodies; streamed
/// bodies carry no hook and are never retried.
#[derive(Clone)]
pub struct ReplayBody(pub Arc<dyn Fn() -> reqwest::Body + Send + Sync>);

impl ReplayBody {
    /// A hook that replays the given bytes.
    pub fn from_bytes(bytes: bytes::Bytes) -> Self {
        Self(Arc::new(move || reqwest::Body::from(bytes.clone())))
    }

    /// A fresh body for the next attempt.
    pub fn produce(&self) -> reqwest::Body {
        (self.0)()
    }
}

impl std::fmt::Debug for ReplayBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReplayBody")
    }
}

/// Bottom of the client stack: executes requests on a shared
/// `reqwest::Client`, racing the context so a cancelled caller never
/// waits on the wire.
#[derive(Clone)]
pub struct Dial {
    client: reqwest::Client,
}

impl Dial {
    /// Wraps the given connection pool.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Service<HttpRequest> for Dial {
    type Response = reqwest::Response;
    type Error = ClientError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: HttpRequest) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move {
            let ctx = req
                .extensions()
                .get::<Context>()
                .cloned()
                .unwrap_or_default();
            let req = reqwest::Request::try_from(req).map_err(ClientError::Transport)?;
            tokio::select! {
                _ = ctx.cancelled() => {
                    Err(ctx.error().unwrap_or(ContextError::Cancelled).into())
                }
                result = client.execute(req) => result.map_err(ClientError::Transport),
            }
        })
    }
}
