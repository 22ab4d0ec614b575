use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::AuthError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Key-type family of a cached JWK, selecting the signature algorithms
/// a token verified with it may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSA public key (`RS256`/`RS384`/`RS512`).
    Rsa,
    /// NIST P-256 curve point (`ES256`).
    EcP256,
    /// NIST P-384 curve point (`ES384`).
    EcP384,
    /// Ed25519 public key (`EdDSA`).
    Ed25519,
}

impl KeyFamily {
    /// The algorithms tokens signed with this key family may carry.
    pub fn algorithms(&self) -> Vec<Algorithm> {
        match self {
            KeyFamily::Rsa => vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512],
            KeyFamily::EcP256 => vec![Algorithm::ES256],
            KeyFamily::EcP384 => vec![Algorithm::ES384],
            KeyFamily::Ed25519 => vec![Algorithm::EdDSA],
        }
    }
}

/// A parsed JWKS entry: the verification key plus its family tag.
#[derive(Clone)]
pub struct CachedKey {
    /// The verification key.
    pub key: DecodingKey,
    /// Which algorithms apply.
    pub family: KeyFamily,
}

#[derive(Debug, Deserialize)]
struct JwkSetDoc {
    keys: Vec<JwkDoc>,
}

#[derive(Debug, Deserialize)]
struct JwkDoc {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

struct Inner {
    url: Url,
    refresh_interval: Duration,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, CachedKey>>,
    last_error: Mutex<Option<String>>,
    last_refresh: Mutex<Option<Instant>>,
    cancel: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

/// kid → key cache backed by a JWKS URL, refreshed on an interval.
///
/// Cheap to clone; clones share one snapshot and one refresher task.
/// The snapshot swap is atomic under a writer lock: readers either see
/// the previous key set or the complete new one, never a partial
/// update. A failed refresh keeps the previous snapshot and records the
/// failure; [`get_key`](JwksCache::get_key) uses that record to decide
/// whether a miss warrants a synchronous refresh.
#[derive(Clone)]
pub struct JwksCache {
    inner: Arc<Inner>,
}

impl JwksCache {
    /// Creates a cache for the given JWKS URL.
    ///
    /// The URL must use `https`, or `http` against localhost only.
    pub fn new(url: &str, refresh_interval: Duration) -> Result<Self, AuthError> {
        let parsed = Url::parse(url).map_err(|e| AuthError::InvalidJwksUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "https" => {}
            "http" => {
                let host = parsed.host_str().unwrap_or_default();
                if host != "localhost" && host != "127.0.0.1" {
                    return Err(AuthError::InvalidJwksUrl {
                        url: url.to_string(),
                        reason: "http is only allowed for localhost".to_string(),
                    });
                }
            }
            other => {
                return Err(AuthError::InvalidJwksUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme {other:?}"),
                });
            }
        }
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AuthError::InvalidJwksUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            inner: Arc::new(Inner {
                url: parsed,
                refresh_interval,
                http,
                keys: RwLock::new(HashMap::new()),
                last_error: Mutex::new(None),
                last_refresh: Mutex::new(None),
                cancel: CancellationToken::new(),
                refresher: Mutex::new(None),
            }),
        })
    }

    /// Performs the initial fetch, then spawns the interval refresher.
    pub async fn start(&self) {
        self.inner.refresh().await;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => break,
                    _ = ticker.tick() => inner.refresh().await,
                }
            }
            debug!(url = %inner.url, "jwks refresher stopped");
        });
        *self
            .inner
            .refresher
            .lock()
            .expect("jwks refresher lock poisoned") = Some(handle);
    }

    /// Signals the refresher task to exit.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Looks up the key for `kid`.
    ///
    /// A miss while the last refresh failed triggers one synchronous
    /// refresh before giving up; the upstream may have rotated keys
    /// while we were serving the stale snapshot.
    pub async fn get_key(&self, kid: &str) -> Result<CachedKey, AuthError> {
        if let Some(key) = self.inner.lookup(kid) {
            return Ok(key);
        }
        if self.last_error().is_some() {
            self.inner.refresh().await;
            if let Some(key) = self.inner.lookup(kid) {
                return Ok(key);
            }
        }
        Err(AuthError::UnknownKey {
            kid: kid.to_string(),
        })
    }

    /// Number of keys in the current snapshot.
    pub fn len(&self) -> usize {
        self.inner.keys.read().expect("jwks keys lock poisoned").len()
    }

    /// True when no snapshot has been loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The diagnostic recorded by the most recent failed refresh.
    pub fn last_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .expect("jwks error lock poisoned")
            .clone()
    }

    /// Fetches and parses the key set, swapping the snapshot on
    /// success.
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Inner {
    fn lookup(&self, kid: &str) -> Option<CachedKey> {
        self.keys
            .read()
            .expect("jwks keys lock poisoned")
            .get(kid)
            .cloned()
    }

    fn record_error(&self, reason: String) {
        warn!(url = %self.url, error = %reason, "jwks refresh failed");
        *self.last_error.lock().expect("jwks error lock poisoned") = Some(reason);
    }

    async fn refresh(&self) {
        let response = match self.http.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return self.record_error(format!("fetch failed: {e}")),
        };
        if response.status() != reqwest::StatusCode::OK {
            return self.record_error(format!("unexpected status {}", response.status()));
        }
        let doc: JwkSetDoc = match response.json().await {
            Ok(doc) => doc,
            Err(e) => return self.record_error(format!("decode failed: {e}")),
        };

        let mut fresh = HashMap::new();
        for jwk in &doc.keys {
            let Some(kid) = jwk.kid.as_deref().filter(|k| !k.is_empty()) else {
                continue;
            };
            match parse_key(jwk) {
                Ok(key) => {
                    fresh.insert(kid.to_string(), key);
                }
                Err(reason) => {
                    debug!(kid, reason, "skipping unusable jwk");
                }
            }
        }

        if fresh.is_empty() {
            return self.record_error("key set contained no usable keys".to_string());
        }

        let count = fresh.len();
        *self.keys.write().expect("jwks keys lock poisoned") = fresh;
        *self.last_error.lock().expect("jwks error lock poisoned") = None;
        *self
            .last_refresh
            .lock()
            .expect("jwks refresh lock poisoned") = Some(Instant::now());
        debug!(url = %self.url, keys = count, "jwks snapshot replaced");
    }
}

fn parse_key(jwk: &JwkDoc) -> Result<CachedKey, &'static str> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or("rsa key missing modulus")?;
            let e = jwk.e.as_deref().ok_or("rsa key missing exponent")?;
            check_rsa_exponent(e)?;
            let key =
                DecodingKey::from_rsa_components(n, e).map_err(|_| "rsa components rejected")?;
            Ok(CachedKey {
                key,
                family: KeyFamily::Rsa,
            })
        }
        "EC" => {
            let family = match jwk.crv.as_deref() {
                Some("P-256") => KeyFamily::EcP256,
                Some("P-384") => KeyFamily::EcP384,
                // No ES512 support in the verifier; treat like any other
                // unusable key.
                Some("P-521") => return Err("P-521 keys are not supported"),
                _ => return Err("unknown ec curve"),
            };
            let x = jwk.x.as_deref().ok_or("ec key missing x")?;
            let y = jwk.y.as_deref().ok_or("ec key missing y")?;
            let key =
                DecodingKey::from_ec_components(x, y).map_err(|_| "ec components rejected")?;
            Ok(CachedKey { key, family })
        }
        "OKP" => {
            if jwk.crv.as_deref() != Some("Ed25519") {
                return Err("unknown okp curve");
            }
            let x = jwk.x.as_deref().ok_or("okp key missing x")?;
            let decoded = base64_decode(x).ok_or("okp x is not base64url")?;
            if decoded.len() != 32 {
                return Err("ed25519 key must be 32 bytes");
            }
            let key = DecodingKey::from_ed_components(x).map_err(|_| "okp components rejected")?;
            Ok(CachedKey {
                key,
                family: KeyFamily::Ed25519,
            })
        }
        _ => Err("unknown key type"),
    }
}

/// Rejects RSA exponents that are non-positive or overflow a signed
/// 64-bit word.
fn check_rsa_exponent(e: &str) -> Result<(), &'static str> {
    let bytes = base64_decode(e).ok_or("rsa exponent is not base64url")?;
    let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.is_empty() {
        return Err("rsa exponent must be positive");
    }
    if significant.len() > 8 || (significant.len() == 8 && significant[0] & 0x80 != 0) {
        return Err("rsa exponent overflows a signed word");
    }
    Ok(())
}

fn base64_decode(input: &str) -> Option<Vec<u8>> {
    use base64::Engine as _;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(input)
        .ok()
}
