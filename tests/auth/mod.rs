mod authenticator;

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use truss_auth::Claims;

/// A freshly generated RSA signing key shared by the auth suites, with
/// its JWKS-ready public components.
pub struct TestKey {
    pub encoding: EncodingKey,
    pub n: String,
    pub e: String,
}

pub fn test_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
        let pem = private
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("pem encode");
        let public = private.to_public_key();
        TestKey {
            encoding: EncodingKey::from_rsa_pem(pem.as_bytes()).expect("pem accepted"),
            n: URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }
    })
}

/// A JWKS document exposing the test key under `kid`.
pub fn jwks_doc(kid: &str) -> serde_json::Value {
    let key = test_key();
    serde_json::json!({
        "keys": [
            {
                "kty": "RSA",
                "kid": kid,
                "alg": "RS256",
                "use": "sig",
                "n": key.n,
                "e": key.e,
            }
        ]
    })
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs()
}

/// Claims for a regular tenant member, expiring an hour from now.
pub fn member_claims() -> Claims {
    Claims {
        sub: Some("user-1".to_string()),
        iss: Some("https://issuer.test".to_string()),
        aud: Some(serde_json::json!("truss-test")),
        exp: Some(unix_now() + 3600),
        tenant_id: Some("t1".to_string()),
        partition_id: Some("p1".to_string()),
        roles: vec!["member".to_string()],
        ..Claims::default()
    }
}

/// Signs `claims` with the shared test key under `kid`.
pub fn sign_token(kid: &str, claims: &Claims) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &test_key().encoding).expect("token signing")
}
