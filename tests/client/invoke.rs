use std::time::Duration;

use http::{HeaderMap, Method};
use serde::Deserialize;
use truss_client::{CallOptions, ClientError};
use truss_core::Context;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::test_manager;

/// `invoke` JSON-encodes the payload and defaults content-type/accept.
#[tokio::test]
async fn invoke_sends_json_with_default_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/things"))
        .and(header("content-type", "application/json"))
        .and(header("accept", "application/json"))
        .and(body_string(r#"{"name":"truss"}"#))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let manager = test_manager(1, 20);
    let response = manager
        .invoke(
            &Context::background(),
            Method::POST,
            &format!("{}/things", server.uri()),
            &serde_json::json!({ "name": "truss" }),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
}

/// `invoke_form` form-encodes pairs with the matching content-type.
#[tokio::test]
async fn invoke_form_sends_urlencoded_pairs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("user=amina&scope=read"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = test_manager(1, 20);
    let response = manager
        .invoke_form(
            &Context::background(),
            Method::POST,
            &format!("{}/login", server.uri()),
            &[
                ("user".to_string(), "amina".to_string()),
                ("scope".to_string(), "read".to_string()),
            ],
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

/// Caller-supplied headers are not overridden by the defaults.
#[tokio::test]
async fn explicit_headers_win_over_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("content-type", "application/vnd.custom+json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        "application/vnd.custom+json".parse().unwrap(),
    );

    let manager = test_manager(1, 20);
    manager
        .invoke(
            &Context::background(),
            Method::POST,
            &server.uri(),
            &serde_json::json!({}),
            headers,
            CallOptions::default(),
        )
        .await
        .unwrap();
}

/// Scheme validation happens before any request is constructed.
#[tokio::test]
async fn non_http_urls_are_rejected_up_front() {
    let manager = test_manager(1, 20);
    let err = manager
        .invoke(
            &Context::background(),
            Method::GET,
            "ftp://example.com/file",
            &serde_json::json!({}),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedScheme { .. }));
}

/// A body of exactly `max` bytes passes; one byte more returns the
/// size-limit sentinel carrying a hard-clipped slice.
#[tokio::test]
async fn to_bytes_enforces_the_cap_exactly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/exact"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 50]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/large"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'y'; 100]))
        .mount(&server)
        .await;

    let manager = test_manager(1, 20);
    let ctx = Context::background();

    let exact = manager
        .invoke_stream(
            &ctx,
            Method::GET,
            &format!("{}/exact", server.uri()),
            reqwest::Body::from(Vec::new()),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(exact.to_bytes(50).await.unwrap().len(), 50);

    let large = manager
        .invoke_stream(
            &ctx,
            Method::GET,
            &format!("{}/large", server.uri()),
            reqwest::Body::from(Vec::new()),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();
    match large.to_bytes(50).await.unwrap_err() {
        ClientError::BodyTooLarge { limit, truncated } => {
            assert_eq!(limit, 50);
            assert_eq!(truncated.len(), 50);
            assert!(truncated.iter().all(|b| *b == b'y'));
        }
        other => panic!("expected size-limit sentinel, got {other:?}"),
    }
}

/// `to_bytes(0)` streams without a cap.
#[tokio::test]
async fn to_bytes_zero_is_uncapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'z'; 4096]))
        .mount(&server)
        .await;

    let manager = test_manager(1, 20);
    let response = manager
        .invoke_stream(
            &Context::background(),
            Method::GET,
            &server.uri(),
            reqwest::Body::from(Vec::new()),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(response.to_bytes(0).await.unwrap().len(), 4096);
}

/// JSON decoding through the response wrapper.
#[tokio::test]
async fn decode_parses_json_bodies() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Thing {
        name: String,
        count: u32,
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "beam",
                "count": 7
            })),
        )
        .mount(&server)
        .await;

    let manager = test_manager(1, 20);
    let response = manager
        .invoke_stream(
            &Context::background(),
            Method::GET,
            &server.uri(),
            reqwest::Body::from(Vec::new()),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
        .unwrap();
    let thing: Thing = response.decode().await.unwrap();
    assert_eq!(
        thing,
        Thing {
            name: "beam".to_string(),
            count: 7
        }
    );
}

/// The per-call timeout is transferred to the response body: the stream
/// stays readable after `invoke` returns, for as long as the response
/// is alive.
#[tokio::test]
async fn timeout_rides_on_the_response_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![b'd'; 1024])
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&server)
        .await;

    let manager = test_manager(1, 20);
    let response = manager
        .invoke_stream(
            &Context::background(),
            Method::GET,
            &server.uri(),
            reqwest::Body::from(Vec::new()),
            HeaderMap::new(),
            CallOptions::with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    // Reading happens after the invoking call returned; the deadline's
    // cancel is anchored to the response we still hold.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(response.to_bytes(0).await.unwrap().len(), 1024);
}
