use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::info;
use truss_core::BoxError;

/// A permission decision handed to the audit logger.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    /// Object display form.
    pub object: String,
    /// Permission that was checked.
    pub permission: String,
    /// Subject display form.
    pub subject: String,
    /// Whether access was granted.
    pub allowed: bool,
    /// Reason attached to the decision.
    pub reason: String,
    /// When the decision was made.
    pub checked_at: DateTime<Utc>,
}

/// Sink for permission decisions. Audit failures are logged and dropped
/// by the caller; they never fail the original operation.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records one decision.
    async fn record(&self, decision: &AccessDecision) -> Result<(), BoxError>;
}

/// The default audit logger: discards everything.
#[derive(Debug, Clone, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn record(&self, _decision: &AccessDecision) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Audit logger that samples decisions into the tracing stream.
#[derive(Debug, Clone)]
pub struct TracingAuditLogger {
    rate: f64,
}

impl TracingAuditLogger {
    /// Creates a sampler. The rate is clamped to `[0, 1]`; a rate of
    /// exactly 0 is the explicit "always log" sentinel.
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }

    fn should_log(&self) -> bool {
        self.rate == 0.0 || rand::thread_rng().gen::<f64>() < self.rate
    }
}

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn record(&self, decision: &AccessDecision) -> Result<(), BoxError> {
        if self.should_log() {
            info!(
                object = %decision.object,
                permission = %decision.permission,
                subject = %decision.subject,
                allowed = decision.allowed,
                reason = %decision.reason,
                "authorization decision"
            );
        }
        Ok(())
    }
}
