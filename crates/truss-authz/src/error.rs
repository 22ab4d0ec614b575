use http::StatusCode;
use thiserror::Error;
use truss_core::BoxError;

/// Errors raised by authorization operations.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The caller's identity is missing or unusable.
    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    /// The target object cannot be derived from the request.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// No relation tuple matched.
    #[error("relation tuple not found")]
    TupleNotFound,

    /// The check came back denied.
    #[error("permission {permission:?} denied on {object:?} for {subject:?}: {reason}")]
    PermissionDenied {
        /// Object the check targeted.
        object: String,
        /// Permission (relation) that was checked.
        permission: String,
        /// Subject the check was made for.
        subject: String,
        /// Denial reason reported by the store or checker.
        reason: String,
    },

    /// The relation-tuple store could not be reached or answered with an
    /// unexpected status. Unwrappable to the underlying cause.
    #[error("authorization service unavailable")]
    ServiceUnavailable {
        /// The transport or status error underneath.
        #[source]
        source: BoxError,
    },
}

impl AuthzError {
    /// The HTTP status a transport boundary should answer with.
    pub fn http_status(&self) -> StatusCode {
        match self {
            AuthzError::InvalidSubject(_) => StatusCode::UNAUTHORIZED,
            AuthzError::InvalidObject(_)
            | AuthzError::TupleNotFound
            | AuthzError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            AuthzError::ServiceUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The gRPC (and Connect-compatible) code for this error.
    pub fn grpc_code(&self) -> tonic::Code {
        match self {
            AuthzError::InvalidSubject(_) => tonic::Code::Unauthenticated,
            AuthzError::InvalidObject(_)
            | AuthzError::TupleNotFound
            | AuthzError::PermissionDenied { .. } => tonic::Code::PermissionDenied,
            AuthzError::ServiceUnavailable { .. } => tonic::Code::Internal,
        }
    }

    /// True when the error is a denial rather than a fault.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AuthzError::PermissionDenied { .. })
    }

    pub(crate) fn unavailable(source: impl Into<BoxError>) -> Self {
        AuthzError::ServiceUnavailable {
            source: source.into(),
        }
    }
}
