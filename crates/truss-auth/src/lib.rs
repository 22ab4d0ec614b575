//! JWT authentication for the truss framework.
//!
//! [`JwksCache`] fetches a JSON Web Key Set from a well-known URL,
//! parses RSA / EC / Ed25519 keys into verification keys, and refreshes
//! them on an interval with on-miss recovery. [`Authenticator`] resolves
//! bearer tokens against the cache and attaches the resulting
//! [`Claims`] to the request [`Context`](truss_core::Context), where the
//! carriers in [`claims`] make them available to downstream permission
//! checks, including the secondary-claims mechanism internal system
//! callers use to act on behalf of a tenant.

mod authenticator;
pub mod claims;
mod error;
mod jwks;

pub use authenticator::{bearer_token, Authenticator, AuthenticatorConfig};
pub use claims::{Claims, SecondaryClaims};
pub use error::AuthError;
pub use jwks::{CachedKey, JwksCache, KeyFamily};
