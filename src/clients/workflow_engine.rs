//! # Workflow Engine
//!
//! Contract for the engine that runs the monitor state machine. Execution ids are
//! unique per engine; starting an id twice fails with `AlreadyExists`, which callers
//! treat as the first start having succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Handle of a started execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHandle {
    pub execution_id: String,
    pub execution_ref: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowEngineError {
    #[error("Execution {execution_id} already exists")]
    AlreadyExists { execution_id: String },

    #[error("State machine definition not found: {definition}")]
    DefinitionNotFound { definition: String },

    #[error("Workflow engine unavailable: {reason}")]
    Unavailable { reason: String },
}

#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start `definition` as execution `execution_id` with `input`
    async fn start_execution(
        &self,
        definition: &str,
        execution_id: &str,
        input: Value,
    ) -> Result<ExecutionHandle, WorkflowEngineError>;
}
