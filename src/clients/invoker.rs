//! # Invoker
//!
//! Contract for the elastic invocation substrate that runs dispatchers and workers.
//! Fire-and-forget invocations return once the substrate has accepted the payload;
//! request-response invocations return the callee's result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::FunctionRef;

/// Acknowledgement of an accepted asynchronous invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationReceipt {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvokerError {
    #[error("Invocation of {function} rejected: {reason}")]
    Rejected { function: String, reason: String },

    #[error("Invocation of {function} throttled: {reason}")]
    Throttled { function: String, reason: String },

    #[error("Transport error invoking {function}: {reason}")]
    Transport { function: String, reason: String },

    #[error("Invalid invocation payload: {0}")]
    Payload(String),
}

impl InvokerError {
    pub fn rejected(function: &FunctionRef, reason: impl Into<String>) -> Self {
        Self::Rejected {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    pub fn throttled(function: &FunctionRef, reason: impl Into<String>) -> Self {
        Self::Throttled {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transport(function: &FunctionRef, reason: impl Into<String>) -> Self {
        Self::Transport {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same invocation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Transport { .. })
    }
}

/// Remote function invocation
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Queue `payload` for `function` and return once it is accepted
    async fn invoke_async(
        &self,
        function: &FunctionRef,
        payload: Value,
    ) -> Result<InvocationReceipt, InvokerError>;

    /// Run `function` with `payload` and wait for its result
    async fn invoke_sync(&self, function: &FunctionRef, payload: Value)
        -> Result<Value, InvokerError>;
}
