use std::time::Duration;

use truss_auth::claims::{claims_from_context, RawJwt};
use truss_auth::{AuthError, Authenticator, AuthenticatorConfig, JwksCache};
use truss_core::Context;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{jwks_doc, member_claims, sign_token};

const REFRESH: Duration = Duration::from_secs(3600);

async fn cache_for(server: &MockServer) -> JwksCache {
    let cache = JwksCache::new(&format!("{}/jwks.json", server.uri()), REFRESH).unwrap();
    cache.start().await;
    cache
}

fn mount_jwks(server: &MockServer, kid: &str) -> Mock {
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_doc(kid)))
}

/// A signed token round-trips into context claims.
#[tokio::test]
async fn valid_token_attaches_claims_to_context() {
    let server = MockServer::start().await;
    mount_jwks(&server, "signing-key").mount(&server).await;

    let cache = cache_for(&server).await;
    let authenticator = Authenticator::new(
        cache.clone(),
        AuthenticatorConfig {
            audiences: vec!["truss-test".to_string()],
            issuer: Some("https://issuer.test".to_string()),
            disable_security: false,
        },
    );

    let token = sign_token("signing-key", &member_claims());
    let ctx = authenticator
        .authenticate(&Context::background(), &token)
        .await
        .unwrap();

    let claims = claims_from_context(&ctx).unwrap();
    assert_eq!(claims.subject(), Some("user-1"));
    assert_eq!(claims.tenant_id(), Some("t1"));
    assert_eq!(claims.partition_id(), Some("p1"));
    assert_eq!(&*ctx.value::<RawJwt>().unwrap().0, token.as_str());
    cache.stop();
}

/// Audience and issuer mismatches are authentication failures.
#[tokio::test]
async fn audience_and_issuer_are_enforced() {
    let server = MockServer::start().await;
    mount_jwks(&server, "signing-key").mount(&server).await;
    let cache = cache_for(&server).await;

    let wrong_audience = Authenticator::new(
        cache.clone(),
        AuthenticatorConfig {
            audiences: vec!["someone-else".to_string()],
            ..AuthenticatorConfig::default()
        },
    );
    let token = sign_token("signing-key", &member_claims());
    assert!(matches!(
        wrong_audience
            .authenticate(&Context::background(), &token)
            .await,
        Err(AuthError::InvalidToken(_))
    ));

    let wrong_issuer = Authenticator::new(
        cache.clone(),
        AuthenticatorConfig {
            issuer: Some("https://other.test".to_string()),
            ..AuthenticatorConfig::default()
        },
    );
    assert!(matches!(
        wrong_issuer
            .authenticate(&Context::background(), &token)
            .await,
        Err(AuthError::InvalidToken(_))
    ));
    cache.stop();
}

/// An expired token is rejected.
#[tokio::test]
async fn expired_token_is_rejected() {
    let server = MockServer::start().await;
    mount_jwks(&server, "signing-key").mount(&server).await;
    let cache = cache_for(&server).await;

    let mut claims = member_claims();
    claims.exp = Some(super::unix_now() - 3600);
    let token = sign_token("signing-key", &claims);

    let authenticator = Authenticator::new(cache.clone(), AuthenticatorConfig::default());
    assert!(matches!(
        authenticator
            .authenticate(&Context::background(), &token)
            .await,
        Err(AuthError::InvalidToken(_))
    ));
    cache.stop();
}

/// With the initial fetch failed and the kid absent from the cache, a
/// lookup triggers a synchronous refresh and the parse then succeeds.
#[tokio::test]
async fn key_miss_after_failed_refresh_self_heals() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_jwks(&server, "rotated-key").mount(&server).await;

    let cache = cache_for(&server).await;
    assert!(cache.is_empty());
    assert!(cache.last_error().is_some());

    let authenticator = Authenticator::new(cache.clone(), AuthenticatorConfig::default());
    let token = sign_token("rotated-key", &member_claims());
    let ctx = authenticator
        .authenticate(&Context::background(), &token)
        .await
        .unwrap();
    assert!(claims_from_context(&ctx).is_some());
    cache.stop();
}

/// A token without a kid cannot be resolved.
#[tokio::test]
async fn token_without_kid_is_rejected() {
    let server = MockServer::start().await;
    mount_jwks(&server, "signing-key").mount(&server).await;
    let cache = cache_for(&server).await;

    let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    let token =
        jsonwebtoken::encode(&header, &member_claims(), &super::test_key().encoding).unwrap();

    let authenticator = Authenticator::new(cache.clone(), AuthenticatorConfig::default());
    assert!(matches!(
        authenticator
            .authenticate(&Context::background(), &token)
            .await,
        Err(AuthError::MissingKeyId)
    ));
    cache.stop();
}
