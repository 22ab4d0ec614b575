use std::sync::Arc;

use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::Validation;
use tracing::debug;
use truss_core::Context;

use crate::claims::{claims_to_context, Claims, RawJwt};
use crate::error::AuthError;
use crate::jwks::JwksCache;

/// Validation options for the authenticator.
#[derive(Debug, Clone, Default)]
pub struct AuthenticatorConfig {
    /// When non-empty, the token must carry one of these audiences.
    pub audiences: Vec<String>,
    /// When set, the token must carry this issuer.
    pub issuer: Option<String>,
    /// Skips signature verification. For local development only.
    pub disable_security: bool,
}

/// Validates bearer tokens against a [`JwksCache`] and attaches the
/// resulting claims to the request context.
pub struct Authenticator {
    keys: JwksCache,
    config: AuthenticatorConfig,
}

impl Authenticator {
    /// Creates an authenticator over the given key cache.
    pub fn new(keys: JwksCache, config: AuthenticatorConfig) -> Self {
        Self { keys, config }
    }

    /// Validates `token` and returns a context carrying its claims.
    ///
    /// Any failure leaves the original context untouched and returns the
    /// error.
    pub async fn authenticate(&self, ctx: &Context, token: &str) -> Result<Context, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(AuthError::InvalidToken)?;
        let kid = header.kid.filter(|k| !k.is_empty()).ok_or(AuthError::MissingKeyId)?;
        let cached = self.keys.get_key(&kid).await?;

        let mut validation = Validation::default();
        validation.algorithms = cached.family.algorithms();
        if self.config.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.config.audiences);
        }
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if self.config.disable_security {
            debug!("token signature verification is disabled");
            validation.insecure_disable_signature_validation();
        }

        let data = jsonwebtoken::decode::<Claims>(token, &cached.key, &validation)
            .map_err(AuthError::InvalidToken)?;

        let ctx = claims_to_context(ctx, data.claims);
        Ok(ctx.with_value(RawJwt(Arc::from(token))))
    }
}

/// Extracts the bearer token from an `Authorization` header map.
///
/// Classification: no header at all is a missing token; a non-bearer
/// scheme or an empty credential is a malformed one.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedToken)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedToken)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::MalformedToken);
    }
    Ok(token)
}
