use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, warn};
use truss_core::{Context, ContextError};

use crate::backoff::RetryPolicy;
use crate::breaker::{BreakerConfig, BreakerMetrics, BreakerState};
use crate::dial::{HttpRequest, ReplayBody};
use crate::error::{is_retryable_status, ClientError};
use crate::registry::{BreakerKey, BreakerRegistry};

/// Configuration for the resilient layer.
#[derive(Clone)]
pub struct ResilienceConfig {
    pub(crate) retry: RetryPolicy,
    pub(crate) breaker: BreakerConfig,
    pub(crate) max_breakers: usize,
    pub(crate) idle_ttl: Duration,
    pub(crate) name: String,
}

impl ResilienceConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ResilienceConfig`].
pub struct ResilienceConfigBuilder {
    retry: RetryPolicy,
    breaker: BreakerConfig,
    max_breakers: usize,
    idle_ttl: Duration,
    name: String,
}

impl ResilienceConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults:
    /// - retry: 3 attempts, exponential backoff from 100ms
    /// - breaker: trip at ≥ 20 requests with ≥ 50% failures, 45s open
    ///   timeout, 3 half-open probes, 30s counter interval
    /// - registry: 1024 breakers max, 15 minute idle TTL
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            max_breakers: 1024,
            idle_ttl: Duration::from_secs(15 * 60),
            name: "resilient-client".to_string(),
        }
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-host breaker tuning.
    pub fn breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Caps the number of live breakers (LRU-evicted beyond this).
    pub fn max_breakers(mut self, max: usize) -> Self {
        self.max_breakers = max.max(1);
        self
    }

    /// Sets the idle TTL after which an untouched breaker is evicted.
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Sets the instance name used in tracing fields.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ResilienceConfig {
        ResilienceConfig {
            retry: self.retry,
            breaker: self.breaker,
            max_breakers: self.max_breakers,
            idle_ttl: self.idle_ttl,
            name: self.name,
        }
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Layer applying [`Resilient`] to an inner service.
///
/// The breaker registry lives in the layer, so every service produced by
/// (or cloned from) it shares one set of per-host breakers.
#[derive(Clone)]
pub struct ResilientLayer {
    config: Arc<ResilienceConfig>,
    registry: Arc<BreakerRegistry>,
}

impl ResilientLayer {
    /// Creates the layer.
    pub fn new(config: ResilienceConfig) -> Self {
        let registry = Arc::new(BreakerRegistry::new(
            config.max_breakers,
            config.idle_ttl,
            config.breaker.clone(),
        ));
        Self {
            config: Arc::new(config),
            registry,
        }
    }
}

impl<S> Layer<S> for ResilientLayer {
    type Service = Resilient<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Resilient {
            inner,
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Middleware adding per-host circuit breaking and retries.
///
/// Each call is one guarded execution: the request's `(method, host)`
/// breaker admits or rejects it up front and records a single outcome
/// when the retry loop finishes. 5xx responses travel through the loop
/// as [`ClientError::UpstreamStatus`] so the breaker counts them as
/// failures, then get unwrapped back into plain responses for the
/// caller.
#[derive(Clone)]
pub struct Resilient<S> {
    inner: S,
    config: Arc<ResilienceConfig>,
    registry: Arc<BreakerRegistry>,
}

impl<S> Resilient<S> {
    /// Metrics snapshot for the breaker guarding `key`, if one exists.
    pub fn breaker_metrics(&self, key: &BreakerKey) -> BreakerMetrics {
        self.registry.get(key).metrics()
    }

    /// Current state of the breaker guarding `key`.
    pub fn breaker_state(&self, key: &BreakerKey) -> BreakerState {
        self.registry.get(key).state()
    }
}

impl<S> Service<HttpRequest> for Resilient<S>
where
    S: Service<HttpRequest, Response = reqwest::Response, Error = ClientError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = reqwest::Response;
    type Error = ClientError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: HttpRequest) -> Self::Future {
        let inner = self.inner.clone();
        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);

        Box::pin(async move {
            let key = BreakerKey::from_request(&req);
            let breaker = registry.get(&key);
            if !breaker.try_acquire() {
                warn!(client = %config.name, key = %key, "circuit open, rejecting call");
                return Err(ClientError::CircuitOpen {
                    key: key.to_string(),
                });
            }

            let result = retry_loop(inner, req, &config).await;
            match &result {
                Ok(_) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }

            match result {
                // Surface 5xx responses to the caller even though the
                // breaker counted them as failures.
                Err(ClientError::UpstreamStatus {
                    response: Some(response),
                    ..
                }) => Ok(*response),
                other => other,
            }
        })
    }
}

async fn retry_loop<S>(
    mut inner: S,
    req: HttpRequest,
    config: &ResilienceConfig,
) -> Result<reqwest::Response, ClientError>
where
    S: Service<HttpRequest, Response = reqwest::Response, Error = ClientError>,
{
    let max_attempts = config.retry.max_attempts();
    let ctx = req
        .extensions()
        .get::<Context>()
        .cloned()
        .unwrap_or_default();
    let (parts, first_body) = req.into_parts();
    let replay = parts.extensions.get::<ReplayBody>().cloned();
    let mut body = Some(first_body);
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            // A non-replayable body is never retried.
            if body.is_none() && replay.is_none() {
                return Err(last_err.unwrap_or(ClientError::NonReplayableBody));
            }
            let delay = config.retry.delay_after(attempt - 1);
            tokio::select! {
                _ = ctx.cancelled() => {
                    return Err(ctx.error().unwrap_or(ContextError::Cancelled).into());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let attempt_body = match body.take() {
            Some(first) => first,
            None => match &replay {
                Some(replay) => replay.produce(),
                None => return Err(last_err.unwrap_or(ClientError::NonReplayableBody)),
            },
        };
        let attempt_req = rebuild_request(&parts, attempt_body)?;

        match inner.call(attempt_req).await {
            Err(err @ ClientError::Cancelled(_)) => return Err(err),
            Err(err) => {
                debug!(client = %config.name, attempt, error = %err, "attempt failed");
                last_err = Some(err);
            }
            Ok(response) => {
                let status = response.status();
                if is_retryable_status(status) && attempt < max_attempts {
                    debug!(client = %config.name, attempt, %status, "retryable status");
                    drop(response);
                    last_err = Some(ClientError::UpstreamStatus {
                        status,
                        response: None,
                    });
                    continue;
                }
                if status.is_server_error() {
                    return Err(ClientError::UpstreamStatus {
                        status,
                        response: Some(Box::new(response)),
                    });
                }
                return Ok(response);
            }
        }
    }

    Err(last_err.unwrap_or(ClientError::NonReplayableBody))
}

fn rebuild_request(
    parts: &http::request::Parts,
    body: reqwest::Body,
) -> Result<HttpRequest, ClientError> {
    let mut builder = http::Request::builder()
        .method(parts.method.clone())
        .uri(parts.uri.clone())
        .version(parts.version);
    if let Some(headers) = builder.headers_mut() {
        *headers = parts.headers.clone();
    }
    let mut req = builder
        .body(body)
        .map_err(|e| ClientError::Request(e.to_string()))?;
    *req.extensions_mut() = parts.extensions.clone();
    Ok(req)
}
