use bytes::Bytes;
use http::StatusCode;
use thiserror::Error;
use truss_core::ContextError;

/// Errors returned by the truss HTTP client stack.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request URL failed to parse.
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// The request URL uses a scheme other than http or https.
    #[error("unsupported url scheme {scheme:?}")]
    UnsupportedScheme {
        /// The rejected scheme.
        scheme: String,
    },

    /// The request could not be constructed.
    #[error("invalid request: {0}")]
    Request(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The circuit breaker for the request's `(method, host)` is open.
    #[error("circuit open for {key}")]
    CircuitOpen {
        /// Display form of the breaker key.
        key: String,
    },

    /// The upstream answered with a server-error status.
    ///
    /// Inside the retry loop this doubles as the in-band failure signal
    /// for the circuit breaker; the resilient layer unwraps it back into
    /// a plain response when one is attached, so callers only observe
    /// this variant when no response exists to hand back.
    #[error("upstream returned status {status}")]
    UpstreamStatus {
        /// The 5xx status received.
        status: StatusCode,
        /// The response, when the upstream produced one.
        response: Option<Box<reqwest::Response>>,
    },

    /// A retry was required but the request body cannot be replayed.
    #[error("request body cannot be replayed for retry")]
    NonReplayableBody,

    /// The response body exceeded the caller's byte limit.
    ///
    /// Carries the first `limit` bytes so the caller can choose to
    /// recover with the clipped payload instead of surfacing the error.
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge {
        /// The limit that was exceeded.
        limit: usize,
        /// Exactly `limit` bytes of body prefix.
        truncated: Bytes,
    },

    /// JSON encoding or decoding failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// The context was cancelled or timed out.
    #[error(transparent)]
    Cancelled(#[from] ContextError),
}

impl ClientError {
    /// True if the error indicates an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ClientError::CircuitOpen { .. })
    }

    /// True if the error is the body-size sentinel.
    pub fn is_body_too_large(&self) -> bool {
        matches!(self, ClientError::BodyTooLarge { .. })
    }

    /// The upstream status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Statuses the retry loop treats as transient.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}
