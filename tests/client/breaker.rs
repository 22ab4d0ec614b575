use std::time::Duration;

use http::{HeaderMap, Method};
use truss_client::{CallOptions, ClientError};
use truss_core::Context;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{test_manager, test_manager_with_timeout};

async fn get(
    manager: &truss_client::InvocationManager,
    url: &str,
) -> Result<truss_client::InvokeResponse, ClientError> {
    manager
        .invoke_stream(
            &Context::background(),
            Method::GET,
            url,
            reqwest::Body::from(Vec::new()),
            HeaderMap::new(),
            CallOptions::default(),
        )
        .await
}

/// With a trip threshold of three, three 500s open the circuit; the
/// fourth call is rejected without contacting the server.
#[tokio::test]
async fn breaker_trips_after_threshold_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/failing"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let manager = test_manager(1, 3);
    let url = format!("{}/failing", server.uri());

    for _ in 0..3 {
        let response = get(&manager, &url).await.unwrap();
        assert_eq!(response.status().as_u16(), 500);
    }

    let err = get(&manager, &url).await.unwrap_err();
    assert!(err.is_circuit_open(), "expected open circuit, got {err:?}");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

/// After the open timeout the breaker lets a probe through; a healthy
/// upstream closes the loop.
#[tokio::test]
async fn breaker_recovers_after_open_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(200).set_body_string("back"))
        .mount(&server)
        .await;

    let manager = test_manager_with_timeout(1, 3, Duration::from_millis(100));
    let url = format!("{}/recovering", server.uri());

    for _ in 0..3 {
        let response = get(&manager, &url).await.unwrap();
        assert_eq!(response.status().as_u16(), 500);
    }
    assert!(get(&manager, &url).await.unwrap_err().is_circuit_open());

    tokio::time::sleep(Duration::from_millis(150)).await;

    let response = get(&manager, &url).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(&response.to_bytes(0).await.unwrap()[..], b"back");
}

/// Breakers are keyed by `(method, host)`: a tripped breaker for one
/// host leaves another untouched.
#[tokio::test]
async fn tripped_breaker_does_not_affect_other_hosts() {
    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&failing)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&healthy)
        .await;

    let manager = test_manager(1, 3);

    for _ in 0..3 {
        let _ = get(&manager, &format!("{}/x", failing.uri())).await.unwrap();
    }
    assert!(get(&manager, &format!("{}/x", failing.uri()))
        .await
        .unwrap_err()
        .is_circuit_open());

    let response = get(&manager, &format!("{}/x", healthy.uri())).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}
