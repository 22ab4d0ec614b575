use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use truss_auth::claims::claims_from_context;
use truss_auth::Claims;
use truss_core::{BoxError, Context};

use crate::client::AuthorizationClient;
use crate::error::AuthzError;
use crate::model::{CheckRequest, ObjectRef, Subject, PROFILE_NAMESPACE};

/// Callback that creates missing tuples when a tenancy check is denied.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provisions whatever the denied caller is missing.
    async fn provision(&self, ctx: &Context, claims: &Claims) -> Result<(), BoxError>;
}

#[async_trait]
impl<F> Provisioner for F
where
    F: Fn(&Context, &Claims) -> Result<(), BoxError> + Send + Sync,
{
    async fn provision(&self, ctx: &Context, claims: &Claims) -> Result<(), BoxError> {
        self(ctx, claims)
    }
}

fn check_request_from_claims(
    namespace: &str,
    subject_namespace: &str,
    permission: &str,
    claims: &Claims,
) -> Result<CheckRequest, AuthzError> {
    let subject = claims
        .subject()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthzError::InvalidSubject("claims carry no subject".to_string()))?;
    let tenant = claims
        .tenant_id()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthzError::InvalidObject("claims carry no tenant".to_string()))?;
    let partition = claims
        .partition_id()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AuthzError::InvalidObject("claims carry no partition".to_string()))?;

    Ok(CheckRequest {
        object: ObjectRef::new(namespace, format!("{tenant}/{partition}")),
        permission: permission.to_string(),
        subject: Subject::Direct {
            namespace: subject_namespace.to_string(),
            id: subject.to_string(),
        },
    })
}

fn denied(req: &CheckRequest, reason: &str) -> AuthzError {
    AuthzError::PermissionDenied {
        object: format!("{}:{}", req.object.namespace, req.object.id),
        permission: req.permission.clone(),
        subject: req.subject.display(),
        reason: reason.to_string(),
    }
}

/// Enforces tenant/partition access with optional self-healing.
///
/// On denial, a configured provisioner runs once and the check is
/// retried exactly once; a provisioner error turns straight into a
/// denial.
pub struct TenancyChecker {
    authorizer: Arc<AuthorizationClient>,
    namespace: String,
    subject_namespace: String,
    provisioner: Option<Arc<dyn Provisioner>>,
}

impl TenancyChecker {
    /// Creates a builder over the given authorizer.
    pub fn builder(authorizer: Arc<AuthorizationClient>) -> TenancyCheckerBuilder {
        TenancyCheckerBuilder {
            authorizer,
            namespace: "tenancy".to_string(),
            subject_namespace: PROFILE_NAMESPACE.to_string(),
            provisioner: None,
        }
    }

    /// Checks that the calling claims hold `permission` on their
    /// tenant/partition object.
    pub async fn check_access(&self, ctx: &Context, permission: &str) -> Result<(), AuthzError> {
        let claims = claims_from_context(ctx)
            .ok_or_else(|| AuthzError::InvalidSubject("no claims in context".to_string()))?;
        let req = check_request_from_claims(
            &self.namespace,
            &self.subject_namespace,
            permission,
            &claims,
        )?;

        let result = self.authorizer.check(ctx, &req).await?;
        if result.allowed {
            return Ok(());
        }

        let Some(provisioner) = &self.provisioner else {
            return Err(denied(&req, &result.reason));
        };

        if let Err(err) = provisioner.provision(ctx, &claims).await {
            debug!(error = %err, "tenancy provisioning failed");
            return Err(denied(&req, &result.reason));
        }

        // The provisioner reported success; re-check exactly once.
        let retried = self.authorizer.check(ctx, &req).await?;
        if retried.allowed {
            Ok(())
        } else {
            Err(denied(&req, &retried.reason))
        }
    }
}

/// Builder for [`TenancyChecker`].
pub struct TenancyCheckerBuilder {
    authorizer: Arc<AuthorizationClient>,
    namespace: String,
    subject_namespace: String,
    provisioner: Option<Arc<dyn Provisioner>>,
}

impl TenancyCheckerBuilder {
    /// Object namespace holding tenancy tuples. Default `"tenancy"`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Namespace asserted for check subjects. Default profile.
    pub fn subject_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.subject_namespace = namespace.into();
        self
    }

    /// Installs the provision-on-deny callback.
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Builds the checker.
    pub fn build(self) -> TenancyChecker {
        TenancyChecker {
            authorizer: self.authorizer,
            namespace: self.namespace,
            subject_namespace: self.subject_namespace,
            provisioner: self.provisioner,
        }
    }
}

/// Gates per-namespace business capabilities.
///
/// Same request shape as the tenancy checker but no provisioning loop:
/// one check, one answer.
pub struct FunctionChecker {
    authorizer: Arc<AuthorizationClient>,
    namespace: String,
    subject_namespace: String,
}

impl FunctionChecker {
    /// Creates a checker for the given capability namespace.
    pub fn new(authorizer: Arc<AuthorizationClient>, namespace: impl Into<String>) -> Self {
        Self {
            authorizer,
            namespace: namespace.into(),
            subject_namespace: PROFILE_NAMESPACE.to_string(),
        }
    }

    /// Checks that the calling claims hold `permission` in the
    /// capability namespace.
    pub async fn check_function(&self, ctx: &Context, permission: &str) -> Result<(), AuthzError> {
        let claims = claims_from_context(ctx)
            .ok_or_else(|| AuthzError::InvalidSubject("no claims in context".to_string()))?;
        let req = check_request_from_claims(
            &self.namespace,
            &self.subject_namespace,
            permission,
            &claims,
        )?;

        let result = self.authorizer.check(ctx, &req).await?;
        if result.allowed {
            Ok(())
        } else {
            Err(denied(&req, &result.reason))
        }
    }
}
