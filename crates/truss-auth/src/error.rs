use thiserror::Error;

/// Errors raised while authenticating a request.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization` header was present.
    #[error("missing token")]
    MissingToken,

    /// The `Authorization` header is not a well-formed bearer token.
    #[error("malformed token")]
    MalformedToken,

    /// The token failed signature or claim validation.
    #[error("invalid token")]
    InvalidToken(#[source] jsonwebtoken::errors::Error),

    /// The token header carries no usable `kid`.
    #[error("token header has no key id")]
    MissingKeyId,

    /// No key for the token's `kid` is available, even after a refresh.
    #[error("no key found for kid {kid:?}")]
    UnknownKey {
        /// The key id that could not be resolved.
        kid: String,
    },

    /// The JWKS URL was rejected at construction time.
    #[error("invalid jwks url {url:?}: {reason}")]
    InvalidJwksUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl AuthError {
    /// True for failures that should map to a 401 at the boundary.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            AuthError::MissingToken
                | AuthError::MalformedToken
                | AuthError::InvalidToken(_)
                | AuthError::MissingKeyId
                | AuthError::UnknownKey { .. }
        )
    }
}
