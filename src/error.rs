//! Pipeline error taxonomy.
//!
//! Every collaborator and step reports failures through [`PipelineError`] so
//! that the orchestrator can tag them with the failing step and the HTTP
//! surface can map them to status codes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required collaborator or setting is missing, or a workflow graph is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Step '{step}' produced invalid output: {reason}")]
    SchemaViolation { step: String, reason: String },

    #[error("{service} error: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    /// On-chain mint reverted or its confirmation wait failed.
    #[error("Settlement failed: {0}")]
    SettlementFailure(String),

    /// A queued ledger write outlived its confirmation wait. It may still be
    /// mined; `queue_id` is the handle to look it up later.
    #[error("Settlement unconfirmed (queue {queue_id}): {message}")]
    SettlementUnconfirmed { queue_id: String, message: String },

    /// Optimistic concurrency check lost against a concurrent writer.
    #[error("Concurrent update detected for {id}")]
    StoreConflict { id: String },

    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Run cancelled before step dispatch")]
    Cancelled,
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn external(service: &'static str, message: impl std::fmt::Display) -> Self {
        Self::ExternalService {
            service,
            message: message.to_string(),
        }
    }

    pub fn schema(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Strip `StepFailed` wrappers down to the originating error.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// The step identifier this error was tagged with, if any.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Whether retrying the same idempotent call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), Self::ExternalService { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_root_and_tag() {
        let err = PipelineError::StepFailed {
            step: "fetchMessage".to_string(),
            source: Box::new(PipelineError::not_found("message", "m-1")),
        };
        assert_eq!(err.failed_step(), Some("fetchMessage"));
        assert!(matches!(err.root(), PipelineError::NotFound { .. }));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("message not found: m-1"));
    }

    #[test]
    fn test_external_is_transient() {
        assert!(PipelineError::external("ledger", "timeout").is_transient());
        assert!(!PipelineError::SettlementFailure("reverted".into()).is_transient());
        let unconfirmed = PipelineError::SettlementUnconfirmed {
            queue_id: "q-1".into(),
            message: "not mined within 60s".into(),
        };
        assert!(!unconfirmed.is_transient());
        assert!(unconfirmed.to_string().contains("queue q-1"));
    }
}
