//! # Monitor State Machine
//!
//! Renders the declarative wait loop the external workflow engine executes:
//!
//! ```text
//! Monitor -> IsTimedOut -> AreWeDoneYet -> Wait -> Monitor
//!                |              |
//!                +----> Reduce <+ -> EndState
//! ```
//!
//! The monitor task retries engine throttling errors at a fixed interval. Without a
//! combiner function both exits go straight to `EndState`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::FanoutConfig;
use crate::constants::{
    retryable_errors, states, DEFAULT_MONITOR_INTERVAL_SECS, MONITOR_THROTTLE_MAX_ATTEMPTS,
};
use crate::error::Result;
use crate::models::FunctionRef;

const DEFAULT_COMMENT: &str = "Monitors a fan-out job and reduces its results on completion";

/// Builder for the monitor loop definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStateMachineDefinition {
    pub comment: String,
    pub monitor_function: FunctionRef,
    pub combiner_function: Option<FunctionRef>,
    pub wait_seconds: u64,
    pub throttle_retry_interval_secs: u64,
    pub throttle_retry_max_attempts: u32,
}

impl MonitorStateMachineDefinition {
    pub fn new(monitor_function: FunctionRef) -> Self {
        Self {
            comment: DEFAULT_COMMENT.to_string(),
            monitor_function,
            combiner_function: None,
            wait_seconds: DEFAULT_MONITOR_INTERVAL_SECS,
            throttle_retry_interval_secs: 1,
            throttle_retry_max_attempts: MONITOR_THROTTLE_MAX_ATTEMPTS,
        }
    }

    /// Definition for a deployment; the combiner and poll interval come from `config`
    pub fn from_config(monitor_function: FunctionRef, config: &FanoutConfig) -> Self {
        Self::new(monitor_function)
            .with_combiner(config.combiner_function())
            .with_wait_seconds(config.monitor_interval_secs)
    }

    pub fn with_combiner(mut self, combiner: Option<FunctionRef>) -> Self {
        self.combiner_function = combiner;
        self
    }

    pub fn with_wait_seconds(mut self, seconds: u64) -> Self {
        self.wait_seconds = seconds.max(1);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn to_value(&self) -> Value {
        let finish = if self.combiner_function.is_some() {
            states::REDUCE
        } else {
            states::END
        };

        let mut state_map = serde_json::Map::new();
        state_map.insert(
            states::MONITOR.to_string(),
            json!({
                "Type": "Task",
                "Resource": self.monitor_function.as_str(),
                "Retry": [{
                    "ErrorEquals": [retryable_errors::TOO_MANY_REQUESTS],
                    "IntervalSeconds": self.throttle_retry_interval_secs,
                    "MaxAttempts": self.throttle_retry_max_attempts,
                }],
                "Next": states::IS_TIMED_OUT,
            }),
        );
        state_map.insert(
            states::IS_TIMED_OUT.to_string(),
            choice("$.timed_out", finish, states::ARE_WE_DONE_YET),
        );
        state_map.insert(
            states::ARE_WE_DONE_YET.to_string(),
            choice("$.completed", finish, states::WAIT),
        );
        state_map.insert(
            states::WAIT.to_string(),
            json!({
                "Type": "Wait",
                "Seconds": self.wait_seconds,
                "Next": states::MONITOR,
            }),
        );
        if let Some(combiner) = &self.combiner_function {
            state_map.insert(
                states::REDUCE.to_string(),
                json!({
                    "Type": "Task",
                    "Resource": combiner.as_str(),
                    "Next": states::END,
                }),
            );
        }
        state_map.insert(
            states::END.to_string(),
            json!({"Type": "Pass", "End": true}),
        );

        json!({
            "Comment": self.comment,
            "StartAt": states::MONITOR,
            "States": Value::Object(state_map),
        })
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_value())?)
    }
}

fn choice(variable: &str, when_true: &str, default: &str) -> Value {
    json!({
        "Type": "Choice",
        "Choices": [{
            "Variable": variable,
            "BooleanEquals": true,
            "Next": when_true,
        }],
        "Default": default,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_with_reducer() {
        let definition = MonitorStateMachineDefinition::new(FunctionRef::new("monitor"))
            .with_combiner(Some(FunctionRef::new("combine")))
            .to_value();

        assert_eq!(definition["StartAt"], "Monitor");
        let states = &definition["States"];
        assert_eq!(states["Monitor"]["Resource"], "monitor");
        assert_eq!(
            states["Monitor"]["Retry"][0]["ErrorEquals"][0],
            "Lambda.TooManyRequestsException"
        );
        assert_eq!(states["Monitor"]["Retry"][0]["MaxAttempts"], 100);
        assert_eq!(states["IsTimedOut"]["Choices"][0]["Variable"], "$.timed_out");
        assert_eq!(states["IsTimedOut"]["Choices"][0]["Next"], "Reduce");
        assert_eq!(states["AreWeDoneYet"]["Default"], "Wait");
        assert_eq!(states["Wait"]["Next"], "Monitor");
        assert_eq!(states["Reduce"]["Resource"], "combine");
        assert_eq!(states["EndState"]["End"], true);
    }

    #[test]
    fn test_loop_without_reducer_ends_directly() {
        let definition = MonitorStateMachineDefinition::new(FunctionRef::new("monitor")).to_value();
        let states = &definition["States"];
        assert!(states.get("Reduce").is_none());
        assert_eq!(states["AreWeDoneYet"]["Choices"][0]["Next"], "EndState");
    }

    #[test]
    fn test_wait_interval_from_config() {
        let config = FanoutConfig {
            monitor_interval_secs: 5,
            combiner_function_ref: Some("combine".to_string()),
            ..FanoutConfig::default()
        };
        let definition =
            MonitorStateMachineDefinition::from_config(FunctionRef::new("monitor"), &config);
        assert_eq!(definition.wait_seconds, 5);
        assert_eq!(definition.to_value()["States"]["Wait"]["Seconds"], 5);
        assert!(definition.to_json_string().unwrap().contains("\"Reduce\""));
    }
}
