use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method};
use serde::Serialize;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use url::Url;

use crate::dial::{Dial, HttpRequest, ReplayBody};
use crate::error::ClientError;
use crate::logging::{HttpLoggingConfig, HttpLoggingLayer};
use crate::resilience::{ResilienceConfig, ResilientLayer};
use crate::response::InvokeResponse;
use truss_core::Context;

fn application_json() -> HeaderValue {
    HeaderValue::from_static("application/json")
}

fn form_urlencoded() -> HeaderValue {
    HeaderValue::from_static("application/x-www-form-urlencoded")
}

/// Per-call knobs.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for the call. The derived context's cancel rides on the
    /// response body, so a streamed body stays readable past the call.
    pub timeout: Option<Duration>,
    /// Default body cap used by [`InvokeResponse::decode`]. 0 = uncapped.
    pub max_body_len: usize,
}

impl CallOptions {
    /// Options with the given timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

type ClientStack = BoxCloneService<HttpRequest, reqwest::Response, ClientError>;

/// High-level client API over the resilient service stack.
///
/// Built once and cloned freely; all clones share one `reqwest`
/// connection pool and one breaker registry. The builder assembles the
/// stack exactly once; an already-wrapped transport is never re-wrapped.
#[derive(Clone)]
pub struct InvocationManager {
    stack: ClientStack,
}

impl InvocationManager {
    /// Creates a builder with the default stack.
    pub fn builder() -> InvocationManagerBuilder {
        InvocationManagerBuilder::new()
    }

    /// JSON-encodes `payload` and invokes `url`.
    ///
    /// Missing `content-type`/`accept` headers default to
    /// `application/json`.
    pub async fn invoke<P: Serialize + ?Sized>(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        payload: &P,
        mut headers: HeaderMap,
        opts: CallOptions,
    ) -> Result<InvokeResponse, ClientError> {
        let body = Bytes::from(serde_json::to_vec(payload)?);
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, application_json());
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, application_json());
        }
        self.invoke_bytes(ctx, method, url, body, headers, opts)
            .await
    }

    /// Form-encodes `values` and invokes `url`.
    pub async fn invoke_form(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        values: &[(String, String)],
        mut headers: HeaderMap,
        opts: CallOptions,
    ) -> Result<InvokeResponse, ClientError> {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in values {
            serializer.append_pair(key, value);
        }
        let body = Bytes::from(serializer.finish());
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, form_urlencoded());
        }
        self.invoke_bytes(ctx, method, url, body, headers, opts)
            .await
    }

    /// Invokes `url` with an arbitrary body the caller provides.
    ///
    /// Streamed bodies carry no replay hook and are therefore never
    /// retried; bytes-backed bodies should go through
    /// [`invoke`](Self::invoke) or [`invoke_bytes`](Self::invoke_bytes).
    pub async fn invoke_stream(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        body: reqwest::Body,
        headers: HeaderMap,
        opts: CallOptions,
    ) -> Result<InvokeResponse, ClientError> {
        self.do_invoke(ctx, method, url, body, None, headers, opts)
            .await
    }

    /// Invokes `url` with a replayable bytes body.
    pub async fn invoke_bytes(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        body: Bytes,
        headers: HeaderMap,
        opts: CallOptions,
    ) -> Result<InvokeResponse, ClientError> {
        let replay = ReplayBody::from_bytes(body.clone());
        self.do_invoke(
            ctx,
            method,
            url,
            reqwest::Body::from(body),
            Some(replay),
            headers,
            opts,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn do_invoke(
        &self,
        ctx: &Context,
        method: Method,
        url: &str,
        body: reqwest::Body,
        replay: Option<ReplayBody>,
        headers: HeaderMap,
        opts: CallOptions,
    ) -> Result<InvokeResponse, ClientError> {
        validate_url(url)?;

        let (call_ctx, cancel) = match opts.timeout {
            Some(timeout) => {
                let (ctx, guard) = ctx.with_timeout(timeout);
                (ctx, Some(guard))
            }
            None => (ctx.clone(), None),
        };

        let mut builder = http::Request::builder().method(method).uri(url);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        let mut req = builder
            .body(body)
            .map_err(|e| ClientError::Request(e.to_string()))?;
        req.extensions_mut().insert(call_ctx.clone());
        if let Some(replay) = replay {
            req.extensions_mut().insert(replay);
        }

        match self.stack.clone().oneshot(req).await {
            Ok(response) => Ok(InvokeResponse::new(
                response,
                call_ctx,
                cancel,
                opts.max_body_len,
            )),
            Err(err) => {
                // The call produced no body to anchor the timeout to;
                // release it now.
                drop(cancel);
                Err(err)
            }
        }
    }
}

fn validate_url(raw: &str) -> Result<(), ClientError> {
    let parsed = Url::parse(raw).map_err(|e| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ClientError::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

/// Builder assembling the service stack for an [`InvocationManager`].
pub struct InvocationManagerBuilder {
    client: Option<reqwest::Client>,
    logging: HttpLoggingConfig,
    resilience: ResilienceConfig,
}

impl InvocationManagerBuilder {
    /// Creates a builder with default logging and resilience settings.
    pub fn new() -> Self {
        Self {
            client: None,
            logging: HttpLoggingConfig::default(),
            resilience: ResilienceConfig::default(),
        }
    }

    /// Uses the given `reqwest` client instead of a fresh default pool.
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Sets the logging configuration.
    pub fn logging(mut self, config: HttpLoggingConfig) -> Self {
        self.logging = config;
        self
    }

    /// Sets the resilience configuration.
    pub fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.resilience = config;
        self
    }

    /// Builds the manager: resilience over logging over dial.
    pub fn build(self) -> InvocationManager {
        let client = self.client.unwrap_or_default();
        let stack = ServiceBuilder::new()
            .layer(ResilientLayer::new(self.resilience))
            .layer(HttpLoggingLayer::new(self.logging))
            .service(Dial::new(client));
        InvocationManager {
            stack: BoxCloneService::new(stack),
        }
    }
}

impl Default for InvocationManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
