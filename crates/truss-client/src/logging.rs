use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tower::{Layer, Service};
use tracing::debug;

use crate::dial::HttpRequest;
use crate::error::ClientError;

/// Capture settings for the logging middleware.
#[derive(Debug, Clone)]
pub struct HttpLoggingConfig {
    /// Log the request line.
    pub log_request: bool,
    /// Log the response status.
    pub log_response: bool,
    /// Include headers in either direction.
    pub log_headers: bool,
    /// Tee bodies into capped buffers and log them.
    pub log_body: bool,
    /// Per-body capture cap in bytes. Default 4096.
    pub max_logged_bytes: usize,
}

impl Default for HttpLoggingConfig {
    fn default() -> Self {
        Self {
            log_request: true,
            log_response: true,
            log_headers: false,
            log_body: false,
            max_logged_bytes: 4096,
        }
    }
}

/// Byte buffer that records at most `cap` bytes and drops the rest.
#[derive(Clone)]
pub struct CappedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
    cap: usize,
}

impl CappedBuffer {
    /// An empty buffer capped at `cap` bytes.
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
            cap,
        }
    }

    /// Records a chunk, keeping only what fits under the cap.
    pub fn record(&self, chunk: &[u8]) {
        let mut buf = self.inner.lock().expect("capped buffer lock poisoned");
        let room = self.cap.saturating_sub(buf.len());
        if room > 0 {
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    /// The bytes captured so far.
    pub fn logged_body(&self) -> Vec<u8> {
        self.inner.lock().expect("capped buffer lock poisoned").clone()
    }
}

/// Stream adapter that copies passing chunks into a [`CappedBuffer`]
/// without altering what the consumer sees, logging the capture when the
/// stream ends.
pub struct TeeBody<S> {
    inner: S,
    buffer: CappedBuffer,
    label: &'static str,
    done: bool,
}

impl<S> TeeBody<S> {
    /// Tees `inner` into `buffer`, logging under `label` at end-of-stream.
    pub fn new(inner: S, buffer: CappedBuffer, label: &'static str) -> Self {
        Self {
            inner,
            buffer,
            label,
            done: false,
        }
    }
}

impl<S, E> Stream for TeeBody<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.buffer.record(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if !this.done {
                    this.done = true;
                    let captured = this.buffer.logged_body();
                    debug!(
                        label = this.label,
                        bytes = captured.len(),
                        body = %String::from_utf8_lossy(&captured),
                        "captured http body"
                    );
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Layer applying [`HttpLogging`] with the given configuration.
#[derive(Clone)]
pub struct HttpLoggingLayer {
    config: Arc<HttpLoggingConfig>,
}

impl HttpLoggingLayer {
    /// Creates the layer.
    pub fn new(config: HttpLoggingConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for HttpLoggingLayer {
    type Service = HttpLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpLogging {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Middleware that logs requests and responses, teeing bodies through
/// capped buffers so diagnostics never change the payload the caller
/// reads.
#[derive(Clone)]
pub struct HttpLogging<S> {
    inner: S,
    config: Arc<HttpLoggingConfig>,
}

impl<S> Service<HttpRequest> for HttpLogging<S>
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
        let mut inner = self.inner.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async move {
            if config.log_request {
                if config.log_headers {
                    debug!(method = %req.method(), uri = %req.uri(), headers = ?req.headers(), "outbound request");
                } else {
                    debug!(method = %req.method(), uri = %req.uri(), "outbound request");
                }
                if config.log_body {
                    if let Some(bytes) = req.body().as_bytes() {
                        let buffer = CappedBuffer::new(config.max_logged_bytes);
                        buffer.record(bytes);
                        let captured = buffer.logged_body();
                        debug!(
                            bytes = captured.len(),
                            body = %String::from_utf8_lossy(&captured),
                            "outbound request body"
                        );
                    }
                }
            }

            let response = inner.call(req).await?;

            if config.log_response {
                if config.log_headers {
                    debug!(status = %response.status(), headers = ?response.headers(), "inbound response");
                } else {
                    debug!(status = %response.status(), "inbound response");
                }
            }
            if config.log_response && config.log_body {
                return Ok(tee_response(response, config.max_logged_bytes));
            }
            Ok(response)
        })
    }
}

/// Rebuilds `response` with its body routed through a [`TeeBody`].
fn tee_response(response: reqwest::Response, cap: usize) -> reqwest::Response {
    let status = response.status();
    let version = response.version();
    let headers = response.headers().clone();

    let buffer = CappedBuffer::new(cap);
    let stream = TeeBody::new(response.bytes_stream().boxed(), buffer, "response");

    let mut builder = http::Response::builder().status(status).version(version);
    if let Some(h) = builder.headers_mut() {
        *h = headers;
    }
    let rebuilt = builder
        .body(reqwest::Body::wrap_stream(stream))
        .expect("response parts were valid");
    reqwest::Response::from(rebuilt)
}
