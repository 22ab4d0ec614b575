use std::sync::Arc;

use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use truss_client::{CallOptions, InvocationManager, InvokeResponse};
use truss_core::Context;
use url::Url;

use crate::audit::{AccessDecision, AuditLogger, NoopAuditLogger};
use crate::error::AuthzError;
use crate::model::{
    CheckRequest, CheckResult, ObjectRef, RelationTuple, Subject, WireTuple, PROFILE_NAMESPACE,
};

const PERMISSIVE_REASON: &str = "permissive mode";

/// Connection settings for the relation-tuple store.
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    pub(crate) read_uri: String,
    pub(crate) write_uri: String,
    pub(crate) can_read: bool,
    pub(crate) can_write: bool,
    pub(crate) profile_namespace: String,
    pub(crate) max_body_len: usize,
}

impl AuthorizationConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> AuthorizationConfigBuilder {
        AuthorizationConfigBuilder::new()
    }
}

/// Builder for [`AuthorizationConfig`].
pub struct AuthorizationConfigBuilder {
    read_uri: String,
    write_uri: String,
    can_read: bool,
    can_write: bool,
    profile_namespace: String,
    max_body_len: usize,
}

impl AuthorizationConfigBuilder {
    /// Creates a builder with defaults.
    ///
    /// Defaults: empty URIs, reads and writes disabled (permissive
    /// mode), profile subject namespace, 1 MiB response cap.
    pub fn new() -> Self {
        Self {
            read_uri: String::new(),
            write_uri: String::new(),
            can_read: false,
            can_write: false,
            profile_namespace: PROFILE_NAMESPACE.to_string(),
            max_body_len: 1 << 20,
        }
    }

    /// Base URI of the read endpoint; also enables reads.
    pub fn read_uri(mut self, uri: impl Into<String>) -> Self {
        self.read_uri = uri.into();
        self.can_read = !self.read_uri.is_empty();
        self
    }

    /// Base URI of the write endpoint; also enables writes.
    pub fn write_uri(mut self, uri: impl Into<String>) -> Self {
        self.write_uri = uri.into();
        self.can_write = !self.write_uri.is_empty();
        self
    }

    /// Overrides the read flag (permissive mode when false).
    pub fn can_read(mut self, can_read: bool) -> Self {
        self.can_read = can_read;
        self
    }

    /// Overrides the write flag (permissive mode when false).
    pub fn can_write(mut self, can_write: bool) -> Self {
        self.can_write = can_write;
        self
    }

    /// Namespace assumed for bare subject ids.
    pub fn profile_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.profile_namespace = namespace.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> AuthorizationConfig {
        AuthorizationConfig {
            read_uri: self.read_uri,
            write_uri: self.write_uri,
            can_read: self.can_read,
            can_write: self.can_write,
            profile_namespace: self.profile_namespace,
            max_body_len: self.max_body_len,
        }
    }
}

impl Default for AuthorizationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct CheckBody {
    #[serde(default)]
    allowed: bool,
}

#[derive(Debug, Deserialize)]
struct TupleListBody {
    #[serde(default)]
    relation_tuples: Vec<WireTuple>,
}

#[derive(Debug, Serialize)]
struct TupleWriteBody {
    relation_tuples: Vec<WireTuple>,
}

#[derive(Debug, Deserialize)]
struct ExpandBody {
    #[serde(default)]
    subject_ids: Vec<String>,
    #[serde(default)]
    subject_sets: Vec<crate::model::WireSubjectSet>,
}

/// Client for an external relation-tuple store.
///
/// Two booleans govern permissive mode: with `can_read` off, checks
/// allow and listings come back empty; with `can_write` off, writes and
/// deletes succeed without touching the store. The short-circuit runs
/// before any request is constructed, so deployments without a store
/// still boot. Everything else fails closed.
pub struct AuthorizationClient {
    config: AuthorizationConfig,
    manager: Arc<InvocationManager>,
    audit: Arc<dyn AuditLogger>,
}

impl AuthorizationClient {
    /// Creates a client with the default (no-op) audit logger.
    pub fn new(config: AuthorizationConfig, manager: Arc<InvocationManager>) -> Self {
        Self::with_audit(config, manager, Arc::new(NoopAuditLogger))
    }

    /// Creates a client with the given audit logger.
    pub fn with_audit(
        config: AuthorizationConfig,
        manager: Arc<InvocationManager>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            config,
            manager,
            audit,
        }
    }

    /// Checks one permission.
    pub async fn check(&self, ctx: &Context, req: &CheckRequest) -> Result<CheckResult, AuthzError> {
        if !self.config.can_read {
            return Ok(CheckResult::new(true, PERMISSIVE_REASON));
        }

        let mut url = self.read_url("/relation-tuples/check")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("namespace", &req.object.namespace)
                .append_pair("object", &req.object.id)
                .append_pair("relation", &req.permission);
            append_subject(&mut pairs, &req.subject);
        }

        let response = self.get(ctx, url).await?;
        let result = match response.status().as_u16() {
            200 => {
                let body: CheckBody = response
                    .decode()
                    .await
                    .map_err(AuthzError::unavailable)?;
                if body.allowed {
                    CheckResult::new(true, "granted")
                } else {
                    CheckResult::new(false, "denied by policy")
                }
            }
            403 => CheckResult::new(false, "denied by policy"),
            status => {
                return Err(AuthzError::unavailable(format!(
                    "check returned unexpected status {status}"
                )))
            }
        };

        let decision = AccessDecision {
            object: format!("{}:{}", req.object.namespace, req.object.id),
            permission: req.permission.clone(),
            subject: req.subject.display(),
            allowed: result.allowed,
            reason: result.reason.clone(),
            checked_at: result.checked_at,
        };
        if let Err(err) = self.audit.record(&decision).await {
            warn!(error = %err, "audit log write failed");
        }

        Ok(result)
    }

    /// Checks a batch of permissions serially.
    ///
    /// The store has no native batch endpoint; per-item failures
    /// collapse to a denial (fail-closed) instead of failing the batch.
    pub async fn batch_check(&self, ctx: &Context, reqs: &[CheckRequest]) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(reqs.len());
        for req in reqs {
            let result = match self.check(ctx, req).await {
                Ok(result) => result,
                Err(err) => CheckResult::new(false, format!("check failed: {err}")),
            };
            results.push(result);
        }
        results
    }

    /// Writes one relation tuple.
    pub async fn write_tuple(&self, ctx: &Context, tuple: &RelationTuple) -> Result<(), AuthzError> {
        if !self.config.can_write {
            return Ok(());
        }

        let url = self.write_url("/admin/relation-tuples")?;
        let body = TupleWriteBody {
            relation_tuples: vec![WireTuple::from_tuple(tuple)],
        };
        let response = self
            .manager
            .invoke(
                ctx,
                Method::PUT,
                url.as_str(),
                &body,
                HeaderMap::new(),
                self.call_options(),
            )
            .await
            .map_err(AuthzError::unavailable)?;

        match response.status().as_u16() {
            200 | 201 | 204 => Ok(()),
            status => Err(AuthzError::unavailable(format!(
                "tuple write returned unexpected status {status}"
            ))),
        }
    }

    /// Writes several tuples, one request per tuple.
    pub async fn write_tuples(
        &self,
        ctx: &Context,
        tuples: &[RelationTuple],
    ) -> Result<(), AuthzError> {
        for tuple in tuples {
            self.write_tuple(ctx, tuple).await?;
        }
        Ok(())
    }

    /// Deletes one relation tuple. A missing tuple is success.
    pub async fn delete_tuple(
        &self,
        ctx: &Context,
        tuple: &RelationTuple,
    ) -> Result<(), AuthzError> {
        if !self.config.can_write {
            return Ok(());
        }

        let mut url = self.write_url("/admin/relation-tuples")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("namespace", &tuple.namespace)
                .append_pair("object", &tuple.object)
                .append_pair("relation", &tuple.relation);
            append_subject(&mut pairs, &tuple.subject);
        }

        let response = self
            .manager
            .invoke_stream(
                ctx,
                Method::DELETE,
                url.as_str(),
                reqwest::Body::from(Vec::new()),
                HeaderMap::new(),
                self.call_options(),
            )
            .await
            .map_err(AuthzError::unavailable)?;

        match response.status().as_u16() {
            200 | 204 => Ok(()),
            404 => {
                debug!("delete of absent tuple treated as success");
                Ok(())
            }
            status => Err(AuthzError::unavailable(format!(
                "tuple delete returned unexpected status {status}"
            ))),
        }
    }

    /// Deletes several tuples, one request per tuple.
    pub async fn delete_tuples(
        &self,
        ctx: &Context,
        tuples: &[RelationTuple],
    ) -> Result<(), AuthzError> {
        for tuple in tuples {
            self.delete_tuple(ctx, tuple).await?;
        }
        Ok(())
    }

    /// Lists the tuples attached to an object.
    pub async fn list_relations(
        &self,
        ctx: &Context,
        object: &ObjectRef,
    ) -> Result<Vec<RelationTuple>, AuthzError> {
        if !self.config.can_read {
            return Ok(Vec::new());
        }

        let mut url = self.read_url("/relation-tuples")?;
        url.query_pairs_mut()
            .append_pair("namespace", &object.namespace)
            .append_pair("object", &object.id);

        self.fetch_tuples(ctx, url).await
    }

    /// Lists the tuples a subject appears in, optionally filtered by
    /// namespace.
    pub async fn list_subject_relations(
        &self,
        ctx: &Context,
        subject: &Subject,
        namespace: Option<&str>,
    ) -> Result<Vec<RelationTuple>, AuthzError> {
        if !self.config.can_read {
            return Ok(Vec::new());
        }

        let mut url = self.read_url("/relation-tuples")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(namespace) = namespace {
                pairs.append_pair("namespace", namespace);
            }
            append_subject(&mut pairs, subject);
        }

        self.fetch_tuples(ctx, url).await
    }

    /// Expands an object-relation into its subject references.
    ///
    /// Direct subjects come back in the configured profile namespace.
    pub async fn expand(
        &self,
        ctx: &Context,
        object: &ObjectRef,
        relation: &str,
    ) -> Result<Vec<Subject>, AuthzError> {
        if !self.config.can_read {
            return Ok(Vec::new());
        }

        let mut url = self.read_url("/relation-tuples/expand")?;
        url.query_pairs_mut()
            .append_pair("namespace", &object.namespace)
            .append_pair("object", &object.id)
            .append_pair("relation", relation)
            .append_pair("max-depth", "3");

        let response = self.get(ctx, url).await?;
        if response.status().as_u16() != 200 {
            return Err(AuthzError::unavailable(format!(
                "expand returned unexpected status {}",
                response.status()
            )));
        }
        let body: ExpandBody = response.decode().await.map_err(AuthzError::unavailable)?;

        let mut subjects = Vec::with_capacity(body.subject_ids.len() + body.subject_sets.len());
        for id in body.subject_ids {
            subjects.push(Subject::Direct {
                namespace: self.config.profile_namespace.clone(),
                id,
            });
        }
        for set in body.subject_sets {
            subjects.push(Subject::Set {
                namespace: set.namespace,
                object: set.object,
                relation: set.relation,
            });
        }
        Ok(subjects)
    }

    async fn fetch_tuples(
        &self,
        ctx: &Context,
        url: Url,
    ) -> Result<Vec<RelationTuple>, AuthzError> {
        let response = self.get(ctx, url).await?;
        if response.status().as_u16() != 200 {
            return Err(AuthzError::unavailable(format!(
                "list returned unexpected status {}",
                response.status()
            )));
        }
        let body: TupleListBody = response.decode().await.map_err(AuthzError::unavailable)?;
        Ok(body
            .relation_tuples
            .into_iter()
            .map(WireTuple::into_tuple)
            .collect())
    }

    async fn get(&self, ctx: &Context, url: Url) -> Result<InvokeResponse, AuthzError> {
        self.manager
            .invoke_stream(
                ctx,
                Method::GET,
                url.as_str(),
                reqwest::Body::from(Vec::new()),
                HeaderMap::new(),
                self.call_options(),
            )
            .await
            .map_err(AuthzError::unavailable)
    }

    fn call_options(&self) -> CallOptions {
        CallOptions {
            timeout: None,
            max_body_len: self.config.max_body_len,
        }
    }

    fn read_url(&self, path: &str) -> Result<Url, AuthzError> {
        join_url(&self.config.read_uri, path)
    }

    fn write_url(&self, path: &str) -> Result<Url, AuthzError> {
        join_url(&self.config.write_uri, path)
    }
}

fn join_url(base: &str, path: &str) -> Result<Url, AuthzError> {
    Url::parse(&format!("{}{}", base.trim_end_matches('/'), path))
        .map_err(|e| AuthzError::unavailable(format!("invalid store uri {base:?}: {e}")))
}

fn append_subject(pairs: &mut url::form_urlencoded::Serializer<'_, url::UrlQuery<'_>>, subject: &Subject) {
    match subject {
        Subject::Direct { namespace, id } => {
            if namespace == PROFILE_NAMESPACE {
                pairs.append_pair("subject_id", id);
            } else {
                pairs.append_pair("subject_id", &format!("{namespace}:{id}"));
            }
        }
        Subject::Set {
            namespace,
            object,
            relation,
        } => {
            pairs
                .append_pair("subject_set.namespace", namespace)
                .append_pair("subject_set.object", object)
                .append_pair("subject_set.relation", relation);
        }
    }
}
