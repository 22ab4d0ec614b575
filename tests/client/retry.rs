use std::time::Duration;

use futures::stream;
use http::{HeaderMap, Method};
use truss_client::CallOptions;
use truss_core::Context;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::test_manager;

/// 502 on the first request, 200 "recovered" on the second: the caller
/// sees the recovery and the server saw exactly two round-trips.
#[tokio::test]
async fn retries_transient_502_until_recovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let manager = test_manager(3, 20);
    let ctx = Context::background();
    let response = manager
        .invoke_stream(
            &ctx,
            Method::GET,
            &format!("{}/flaky", server.uri()),
            reqwest::Body::from(Vec::new()),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body = response.to_bytes(0).await.unwrap();
    assert_eq!(&body[..], b"recovered");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

/// A bytes-backed POST body is replayed byte-for-byte on the retry.
#[tokio::test]
async fn rewindable_body_is_replayed_identically() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let payload = b"fifteen bytes!!";
    assert_eq!(payload.len(), 15);

    let manager = test_manager(3, 20);
    let ctx = Context::background();
    let response = manager
        .invoke_bytes(
            &ctx,
            Method::POST,
            &format!("{}/submit", server.uri()),
            bytes::Bytes::from_static(payload),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, payload.to_vec());
    assert_eq!(requests[0].body, requests[1].body);
}

/// A streamed body has no replay hook: one round-trip, surfaced error.
#[tokio::test]
async fn non_rewindable_body_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let body = reqwest::Body::wrap_stream(stream::iter(vec![Ok::<_, std::io::Error>(
        bytes::Bytes::from_static(b"opaque streamed data"),
    )]));

    let manager = test_manager(3, 20);
    let ctx = Context::background();
    let err = manager
        .invoke_stream(
            &ctx,
            Method::POST,
            &format!("{}/submit", server.uri()),
            body,
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status().map(|s| s.as_u16()), Some(502));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

/// 501 is a server error but not retryable: one round-trip, and the
/// caller still gets the response to read.
#[tokio::test]
async fn non_retryable_5xx_returns_the_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/unimplemented"))
        .respond_with(ResponseTemplate::new(501).set_body_string("not implemented"))
        .mount(&server)
        .await;

    let manager = test_manager(3, 20);
    let ctx = Context::background();
    let response = manager
        .invoke_stream(
            &ctx,
            Method::GET,
            &format!("{}/unimplemented", server.uri()),
            reqwest::Body::from(Vec::new()),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 501);
    let body = response.to_bytes(0).await.unwrap();
    assert_eq!(&body[..], b"not implemented");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

/// Cancellation during backoff aborts the loop: the round-trip count
/// equals the attempts already started.
#[tokio::test]
async fn cancellation_during_backoff_aborts_the_loop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/always-502"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    // Long backoff, short deadline: the sleep between attempts 1 and 2
    // loses the race.
    let manager = truss_client::InvocationManager::builder()
        .resilience(
            truss_client::ResilienceConfig::builder()
                .retry(truss_client::RetryPolicy::fixed(3, Duration::from_secs(30)))
                .build(),
        )
        .build();
    let ctx = Context::background();
    let err = manager
        .invoke_bytes(
            &ctx,
            Method::GET,
            &format!("{}/always-502", server.uri()),
            bytes::Bytes::new(),
            HeaderMap::new(),
            CallOptions::with_timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, truss_client::ClientError::Cancelled(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
