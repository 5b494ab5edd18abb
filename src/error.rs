//! Error types for the fan-out dispatch coordinator.
//!
//! The taxonomy mirrors the outcomes an operator can observe: bad configuration aborts
//! before any side effect, rejected invocations propagate so an orphaned batch surfaces
//! as a timeout rather than silent success, ledger failures are transient, and a reused
//! workflow execution id is non-fatal.

use crate::clients::{InvokerError, LedgerError, ObjectStoreError, WorkflowEngineError};
use crate::config::ConfigurationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FanoutError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invocation of {function} failed: {reason}")]
    InvocationFailure { function: String, reason: String },

    #[error("Completion ledger query failed for job {job_id}: {reason}")]
    LedgerQueryFailure { job_id: String, reason: String },

    #[error("Workflow execution {execution_id} already exists")]
    WorkflowStartConflict { execution_id: String },

    #[error("Workflow engine error: {0}")]
    WorkflowEngine(String),

    #[error("Object store error for {key}: {reason}")]
    ObjectStore { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FanoutError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn invocation_failure(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvocationFailure {
            function: function.into(),
            reason: reason.into(),
        }
    }

    pub fn ledger_query_failure(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LedgerQueryFailure {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    pub fn object_store(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ObjectStore {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Errors that abort a job before anything was dispatched
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for FanoutError {
    fn from(error: serde_json::Error) -> Self {
        FanoutError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<ConfigurationError> for FanoutError {
    fn from(error: ConfigurationError) -> Self {
        FanoutError::InvalidConfig(error.to_string())
    }
}

impl From<InvokerError> for FanoutError {
    fn from(error: InvokerError) -> Self {
        match error {
            InvokerError::Rejected { function, reason }
            | InvokerError::Throttled { function, reason }
            | InvokerError::Transport { function, reason } => {
                FanoutError::InvocationFailure { function, reason }
            }
            InvokerError::Payload(reason) => FanoutError::Serialization(reason),
        }
    }
}

impl From<WorkflowEngineError> for FanoutError {
    fn from(error: WorkflowEngineError) -> Self {
        match error {
            WorkflowEngineError::AlreadyExists { execution_id } => {
                FanoutError::WorkflowStartConflict { execution_id }
            }
            other => FanoutError::WorkflowEngine(other.to_string()),
        }
    }
}

impl From<LedgerError> for FanoutError {
    fn from(error: LedgerError) -> Self {
        let job_id = error.job_id().to_string();
        FanoutError::LedgerQueryFailure {
            job_id,
            reason: error.to_string(),
        }
    }
}

impl From<ObjectStoreError> for FanoutError {
    fn from(error: ObjectStoreError) -> Self {
        let key = error.key().to_string();
        FanoutError::ObjectStore {
            key,
            reason: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FanoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoker_errors_map_to_invocation_failure() {
        let error: FanoutError = InvokerError::Rejected {
            function: "worker".to_string(),
            reason: "403".to_string(),
        }
        .into();

        assert_eq!(
            error,
            FanoutError::invocation_failure("worker", "403"),
        );
        assert!(!error.is_config_error());
    }

    #[test]
    fn test_already_exists_maps_to_start_conflict() {
        let error: FanoutError = WorkflowEngineError::AlreadyExists {
            execution_id: "job-1".to_string(),
        }
        .into();

        assert!(matches!(
            error,
            FanoutError::WorkflowStartConflict { ref execution_id } if execution_id == "job-1"
        ));
    }

    #[test]
    fn test_display_includes_context() {
        let error = FanoutError::ledger_query_failure("abc", "throttled");
        assert_eq!(
            error.to_string(),
            "Completion ledger query failed for job abc: throttled"
        );
    }
}
