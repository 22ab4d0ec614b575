use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::DropGuard;
use truss_core::{Context, ContextError};

use crate::error::ClientError;

/// Response handed back by the invocation manager.
///
/// Owns the body stream and, when the call carried a timeout, the cancel
/// guard for the derived context, so the body stays readable after the
/// invoking function returns, and releasing the response (explicitly via
/// [`close`](InvokeResponse::close) or by drop) cancels the context.
pub struct InvokeResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<reqwest::Response>,
    ctx: Context,
    cancel: Option<DropGuard>,
    max_body_len: usize,
}

impl InvokeResponse {
    pub(crate) fn new(
        response: reqwest::Response,
        ctx: Context,
        cancel: Option<DropGuard>,
        max_body_len: usize,
    ) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            body: Some(response),
            ctx,
            cancel,
            max_body_len,
        }
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Reads the body into memory, enforcing `max` bytes when `max > 0`.
    ///
    /// A body of exactly `max` bytes succeeds; one byte more returns
    /// [`ClientError::BodyTooLarge`] carrying a hard-clipped slice of
    /// length exactly `max`. `max = 0` streams without a cap.
    pub async fn to_bytes(mut self, max: usize) -> Result<Bytes, ClientError> {
        let Some(mut body) = self.body.take() else {
            return Ok(Bytes::new());
        };
        let mut collected = BytesMut::new();
        loop {
            let chunk = tokio::select! {
                _ = self.ctx.cancelled() => {
                    return Err(self.ctx.error().unwrap_or(ContextError::Cancelled).into());
                }
                chunk = body.chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };
            collected.extend_from_slice(&chunk);
            if max > 0 && collected.len() > max {
                collected.truncate(max);
                self.close();
                return Err(ClientError::BodyTooLarge {
                    limit: max,
                    truncated: collected.freeze(),
                });
            }
        }
        self.close();
        Ok(collected.freeze())
    }

    /// Streams the body into `writer` without buffering it in memory.
    pub async fn to_writer<W>(mut self, writer: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(mut body) = self.body.take() else {
            return Ok(0);
        };
        let mut written = 0u64;
        loop {
            let chunk = tokio::select! {
                _ = self.ctx.cancelled() => {
                    return Err(self.ctx.error().unwrap_or(ContextError::Cancelled).into());
                }
                chunk = body.chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| ClientError::Request(e.to_string()))?;
            written += chunk.len() as u64;
        }
        self.close();
        Ok(written)
    }

    /// Decodes the body as JSON, bounded by the configured
    /// `max_body_len`, and closes the response.
    pub async fn decode<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let max = self.max_body_len;
        let bytes = self.to_bytes(max).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Releases the body and runs the attached cancel guard. Idempotent;
    /// also runs on drop.
    pub fn close(&mut self) {
        self.body.take();
        self.cancel.take();
    }
}

impl std::fmt::Debug for InvokeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeResponse")
            .field("status", &self.status)
            .field("closed", &self.body.is_none())
            .finish_non_exhaustive()
    }
}
