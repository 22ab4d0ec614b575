//! Claims model and context carriers.
//!
//! Two distinct context slots exist: the primary [`Claims`] attached by
//! the authenticator, and the optional [`SecondaryClaims`] an internal
//! system caller attaches to act on behalf of a tenant. Only
//! [`claims_from_context`] synthesizes the merged view, and it always
//! returns a copy; stored claims are never mutated.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use truss_core::Context;

/// Role prefix marking a system-internal caller.
const SYSTEM_INTERNAL_PREFIX: &str = "system_internal";

/// Metadata-map key carrying the tenancy-skip flag.
pub const SKIP_TENANCY_KEY: &str = "skip_tenancy_check";

/// Header names accepted for secondary-claim propagation.
pub mod headers {
    /// Tenant id header.
    pub const TENANT_ID: &str = "X-Tenant-Id";
    /// Partition id header.
    pub const PARTITION_ID: &str = "X-Partition-Id";
    /// Profile id header.
    pub const PROFILE_ID: &str = "X-Profile-Id";
    /// Access id header.
    pub const ACCESS_ID: &str = "X-Access-Id";
    /// Contact id header.
    pub const CONTACT_ID: &str = "X-Contact-Id";
    /// Session id header.
    pub const SESSION_ID: &str = "X-Session-Id";
    /// Device id header.
    pub const DEVICE_ID: &str = "X-Device-Id";
    /// Comma-separated roles header.
    pub const ROLES: &str = "X-Roles";
}

/// The raw bearer token attached to the context after authentication.
#[derive(Clone)]
pub struct RawJwt(pub Arc<str>);

/// Authentication claims carried by a verified token.
///
/// Unknown claims land in the extension map; the typed getters fall
/// back to it, so issuers that put `tenant_id` and friends in
/// non-standard spots still resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (`sub`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Issuer (`iss`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience (`aud`), string or list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    /// Expiry (`exp`), seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Issued-at (`iat`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Not-before (`nbf`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    /// Token id (`jti`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Tenant the caller belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Partition within the tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<String>,
    /// Access record id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_id: Option<String>,
    /// Contact id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    /// Session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Device id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Calling service name, for service-to-service tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Role names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Claims the typed fields do not cover.
    #[serde(flatten)]
    pub ext: BTreeMap<String, Value>,
}

impl Claims {
    fn field<'a>(&'a self, typed: &'a Option<String>, key: &str) -> Option<&'a str> {
        typed
            .as_deref()
            .or_else(|| self.ext.get(key).and_then(Value::as_str))
    }

    /// Subject, from the typed field or the extension map.
    pub fn subject(&self) -> Option<&str> {
        self.field(&self.sub, "sub")
    }

    /// Tenant id, from the typed field or the extension map.
    pub fn tenant_id(&self) -> Option<&str> {
        self.field(&self.tenant_id, "tenant_id")
    }

    /// Partition id, from the typed field or the extension map.
    pub fn partition_id(&self) -> Option<&str> {
        self.field(&self.partition_id, "partition_id")
    }

    /// Access id, from the typed field or the extension map.
    pub fn access_id(&self) -> Option<&str> {
        self.field(&self.access_id, "access_id")
    }

    /// Contact id, from the typed field or the extension map.
    pub fn contact_id(&self) -> Option<&str> {
        self.field(&self.contact_id, "contact_id")
    }

    /// Session id, from the typed field or the extension map.
    pub fn session_id(&self) -> Option<&str> {
        self.field(&self.session_id, "session_id")
    }

    /// Device id, from the typed field or the extension map.
    pub fn device_id(&self) -> Option<&str> {
        self.field(&self.device_id, "device_id")
    }

    /// Service name, from the typed field or the extension map.
    pub fn service_name(&self) -> Option<&str> {
        self.field(&self.service_name, "service_name")
    }

    /// True when the roles collection contains exactly one role with
    /// the system-internal prefix.
    pub fn is_internal_system(&self) -> bool {
        self.roles.len() == 1 && self.roles[0].starts_with(SYSTEM_INTERNAL_PREFIX)
    }

    /// Serializes the identifying fields into a string map suitable for
    /// queue metadata.
    pub fn as_metadata(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let mut put = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value.to_string());
            }
        };
        put("sub", self.subject());
        put("tenant_id", self.tenant_id());
        put("partition_id", self.partition_id());
        put("access_id", self.access_id());
        put("contact_id", self.contact_id());
        put("device_id", self.device_id());
        if !self.roles.is_empty() {
            map.insert("roles".to_string(), self.roles.join(","));
        }
        map
    }

    /// Rebuilds claims from a metadata map written by
    /// [`as_metadata`](Claims::as_metadata).
    pub fn from_metadata(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| map.get(key).cloned();
        Self {
            sub: get("sub"),
            tenant_id: get("tenant_id"),
            partition_id: get("partition_id"),
            access_id: get("access_id"),
            contact_id: get("contact_id"),
            device_id: get("device_id"),
            roles: map
                .get("roles")
                .map(|roles| roles.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            ..Self::default()
        }
    }
}

/// Parallel claim set for internal callers acting on behalf of a
/// tenant. Never merged into the stored primary claims.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecondaryClaims {
    /// Tenant being acted for. Required.
    pub tenant_id: String,
    /// Partition being acted for. Required.
    pub partition_id: String,
    /// Profile id.
    pub profile_id: Option<String>,
    /// Access id.
    pub access_id: Option<String>,
    /// Contact id.
    pub contact_id: Option<String>,
    /// Session id.
    pub session_id: Option<String>,
    /// Device id.
    pub device_id: Option<String>,
    /// Roles asserted for the acted-for identity.
    pub roles: Vec<String>,
}

impl SecondaryClaims {
    /// Reads secondary claims from propagation headers.
    ///
    /// Returns `None` unless both tenant and partition are present.
    pub fn from_headers(map: &HeaderMap) -> Option<Self> {
        let get = |name: &str| {
            map.get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let tenant_id = get(headers::TENANT_ID)?;
        let partition_id = get(headers::PARTITION_ID)?;
        Some(Self {
            tenant_id,
            partition_id,
            profile_id: get(headers::PROFILE_ID),
            access_id: get(headers::ACCESS_ID),
            contact_id: get(headers::CONTACT_ID),
            session_id: get(headers::SESSION_ID),
            device_id: get(headers::DEVICE_ID),
            roles: get(headers::ROLES)
                .map(|roles| roles.split(',').map(|r| r.trim().to_string()).collect())
                .unwrap_or_default(),
        })
    }
}

#[derive(Clone)]
struct ClaimsSlot(Arc<Claims>);

#[derive(Clone)]
struct SecondarySlot(Arc<SecondaryClaims>);

#[derive(Clone, Copy)]
struct SkipTenancy(bool);

/// Attaches claims to the context. Internal-system claims also flip the
/// tenancy-skip flag.
pub fn claims_to_context(ctx: &Context, claims: Claims) -> Context {
    let internal = claims.is_internal_system();
    let ctx = ctx.with_value(ClaimsSlot(Arc::new(claims)));
    if internal {
        ctx.with_value(SkipTenancy(true))
    } else {
        ctx
    }
}

/// Reads the claims attached to the context.
///
/// For an internal-system caller with secondary claims attached, the
/// returned copy is enriched with the secondary tenant, partition, and
/// access ids; the stored claims are left untouched.
pub fn claims_from_context(ctx: &Context) -> Option<Claims> {
    let slot = ctx.value::<ClaimsSlot>()?;
    let mut claims = (*slot.0).clone();
    if claims.is_internal_system() {
        if let Some(secondary) = ctx.value::<SecondarySlot>() {
            claims.tenant_id = Some(secondary.0.tenant_id.clone());
            claims.partition_id = Some(secondary.0.partition_id.clone());
            if secondary.0.access_id.is_some() {
                claims.access_id = secondary.0.access_id.clone();
            }
        }
    }
    Some(claims)
}

/// Attaches secondary claims for an internal-system caller.
///
/// Active only when the current claims are internal-system and the
/// secondary set names both a tenant and a partition; otherwise the
/// context is returned unchanged.
pub fn setup_secondary_claims(ctx: &Context, secondary: SecondaryClaims) -> Context {
    let internal = ctx
        .value::<ClaimsSlot>()
        .map(|slot| slot.0.is_internal_system())
        .unwrap_or(false);
    if !internal || secondary.tenant_id.is_empty() || secondary.partition_id.is_empty() {
        return ctx.clone();
    }
    ctx.with_value(SecondarySlot(Arc::new(secondary)))
}

/// True when tenancy checks should be skipped for this context.
pub fn skip_tenancy_check(ctx: &Context) -> bool {
    ctx.value::<SkipTenancy>().map(|flag| flag.0).unwrap_or(false)
}

/// Writes the tenancy-skip flag into an outbound metadata map.
pub fn skip_tenancy_to_map(ctx: &Context, map: &mut HashMap<String, String>) {
    if skip_tenancy_check(ctx) {
        map.insert(SKIP_TENANCY_KEY.to_string(), "true".to_string());
    }
}

/// Applies an inbound metadata map's tenancy-skip flag to the context.
///
/// An absent key means "keep the context's current value".
pub fn skip_tenancy_from_map(ctx: &Context, map: &HashMap<String, String>) -> Context {
    match map.get(SKIP_TENANCY_KEY) {
        Some(value) => ctx.with_value(SkipTenancy(value == "true")),
        None => ctx.clone(),
    }
}
