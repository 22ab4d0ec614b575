//! Relation-tuple authorization for the truss framework.
//!
//! [`AuthorizationClient`] speaks to an external relation-tuple store
//! (check, batch-check, tuple CRUD, expand) through the resilient
//! invocation manager, fails closed on errors, and short-circuits to
//! permissive mode when reads or writes are disabled. On top of it,
//! [`TenancyChecker`] enforces tenant/partition access with optional
//! provision-on-miss self-healing, and [`FunctionChecker`] gates
//! per-namespace capabilities.

mod audit;
mod checker;
mod client;
mod error;
mod model;

pub use audit::{AccessDecision, AuditLogger, NoopAuditLogger, TracingAuditLogger};
pub use checker::{FunctionChecker, Provisioner, TenancyChecker, TenancyCheckerBuilder};
pub use client::{AuthorizationClient, AuthorizationConfig, AuthorizationConfigBuilder};
pub use error::AuthzError;
pub use model::{
    CheckRequest, CheckResult, ObjectRef, RelationTuple, Subject, PROFILE_NAMESPACE,
};
