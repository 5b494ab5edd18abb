//! # Fan-out Configuration
//!
//! Settings consumed by the root dispatcher and the monitor. Values are layered:
//! built-in defaults, an optional TOML file, `FANOUT__*` environment variables, and
//! finally the per-job overrides carried by the root dispatch event. Validation runs on
//! the merged result, before any dispatch is issued.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_fanout::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_file("config/fanout.toml")
//!     .load()?;
//!
//! println!("max parallelism: {}", config.max_parallelism);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

use crate::constants::{
    DEFAULT_DESCRIPTOR_TTL_SECS, DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_MAX_INLINE_PAYLOAD_BYTES,
    DEFAULT_MAX_LEDGER_PAGES, DEFAULT_MAX_PARALLELISM, DEFAULT_MONITOR_INTERVAL_SECS,
    DEFAULT_NUM_LEVELS,
};
use crate::models::{FunctionRef, IndexRange};
use crate::resilience::RetryPolicy;
use crate::utils::serde::{
    deserialize_integer, deserialize_level, deserialize_optional_integer,
    deserialize_optional_level,
};

/// Root configuration for a fan-out deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// First dataset index (inclusive)
    #[serde(deserialize_with = "deserialize_integer")]
    pub dataset_start_index: u64,

    /// End of the dataset (exclusive); required
    #[serde(deserialize_with = "deserialize_optional_integer")]
    pub dataset_end_index: Option<u64>,

    /// Desired indices per batch; required
    #[serde(deserialize_with = "deserialize_optional_integer")]
    pub batch_size: Option<u64>,

    /// Depth of the dispatch tree
    #[serde(deserialize_with = "deserialize_level")]
    pub num_levels: u32,

    /// Ceiling on the number of batches
    #[serde(deserialize_with = "deserialize_integer")]
    pub max_parallelism: u64,

    /// Wall-clock budget before the monitor reports a timeout
    #[serde(deserialize_with = "deserialize_integer")]
    pub job_timeout_secs: u64,

    /// Function run once per batch; required
    pub worker_function_ref: Option<String>,

    /// Function that reduces batch results once the monitor finishes
    pub combiner_function_ref: Option<String>,

    /// Function that runs intermediate dispatch levels
    pub dispatch_function_ref: Option<String>,

    /// Monitor state machine definition; the monitor is started only when set
    pub state_machine_ref: Option<String>,

    /// Cap on batches emitted per throttled dispatch round
    #[serde(deserialize_with = "deserialize_optional_integer")]
    pub max_concurrent_jobs: Option<u64>,

    /// Descriptor pages larger than this are parked in the object store
    #[serde(deserialize_with = "deserialize_integer")]
    pub max_inline_payload_bytes: u64,

    /// Expiry of parked descriptor pages
    #[serde(deserialize_with = "deserialize_integer")]
    pub descriptor_ttl_secs: u64,

    /// Wait between monitor polls in the state machine definition
    #[serde(deserialize_with = "deserialize_integer")]
    pub monitor_interval_secs: u64,

    /// Cut-off for ledger pagination in a single monitor poll
    #[serde(deserialize_with = "deserialize_integer")]
    pub max_ledger_pages: u64,

    /// Backoff for invocation and object store calls
    pub retry: RetryPolicy,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            dataset_start_index: 0,
            dataset_end_index: None,
            batch_size: None,
            num_levels: DEFAULT_NUM_LEVELS,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            worker_function_ref: None,
            combiner_function_ref: None,
            dispatch_function_ref: None,
            state_machine_ref: None,
            max_concurrent_jobs: None,
            max_inline_payload_bytes: DEFAULT_MAX_INLINE_PAYLOAD_BYTES as u64,
            descriptor_ttl_secs: DEFAULT_DESCRIPTOR_TTL_SECS,
            monitor_interval_secs: DEFAULT_MONITOR_INTERVAL_SECS,
            max_ledger_pages: DEFAULT_MAX_LEDGER_PAGES as u64,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-job settings a root dispatch event may carry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(
        alias = "startIndex",
        deserialize_with = "deserialize_optional_integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub dataset_start_index: Option<u64>,

    #[serde(
        alias = "endIndex",
        deserialize_with = "deserialize_optional_integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub dataset_end_index: Option<u64>,

    #[serde(
        alias = "batchSize",
        deserialize_with = "deserialize_optional_integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub batch_size: Option<u64>,

    #[serde(
        alias = "numLevels",
        deserialize_with = "deserialize_optional_level",
        skip_serializing_if = "Option::is_none"
    )]
    pub num_levels: Option<u32>,

    #[serde(
        alias = "maxParallelism",
        deserialize_with = "deserialize_optional_integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_parallelism: Option<u64>,

    #[serde(
        alias = "jobTimeoutSecs",
        deserialize_with = "deserialize_optional_integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub job_timeout_secs: Option<u64>,

    #[serde(
        alias = "workerFunctionName",
        alias = "workerFunctionArn",
        skip_serializing_if = "Option::is_none"
    )]
    pub worker_function_ref: Option<String>,

    #[serde(
        alias = "reduceFunctionName",
        alias = "reduceFunctionArn",
        skip_serializing_if = "Option::is_none"
    )]
    pub combiner_function_ref: Option<String>,

    #[serde(
        alias = "maxConcurrentJobs",
        deserialize_with = "deserialize_optional_integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_concurrent_jobs: Option<u64>,
}

impl FanoutConfig {
    /// Apply per-job overrides on top of the deployment configuration
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(start) = overrides.dataset_start_index {
            merged.dataset_start_index = start;
        }
        if overrides.dataset_end_index.is_some() {
            merged.dataset_end_index = overrides.dataset_end_index;
        }
        if overrides.batch_size.is_some() {
            merged.batch_size = overrides.batch_size;
        }
        if let Some(levels) = overrides.num_levels {
            merged.num_levels = levels;
        }
        if let Some(max_parallelism) = overrides.max_parallelism {
            merged.max_parallelism = max_parallelism;
        }
        if let Some(timeout) = overrides.job_timeout_secs {
            merged.job_timeout_secs = timeout;
        }
        if overrides.worker_function_ref.is_some() {
            merged.worker_function_ref = overrides.worker_function_ref.clone();
        }
        if overrides.combiner_function_ref.is_some() {
            merged.combiner_function_ref = overrides.combiner_function_ref.clone();
        }
        if overrides.max_concurrent_jobs.is_some() {
            merged.max_concurrent_jobs = overrides.max_concurrent_jobs;
        }
        merged
    }

    /// Validate everything the root dispatcher needs before its first side effect
    pub fn validate(&self) -> ConfigResult<()> {
        let context = "fanout configuration";

        let end = self
            .dataset_end_index
            .ok_or_else(|| ConfigurationError::missing_required_field("dataset_end_index", context))?;
        if self.dataset_start_index > end {
            return Err(ConfigurationError::invalid_value(
                "dataset_start_index",
                self.dataset_start_index,
                format!("must not exceed dataset_end_index ({end})"),
            ));
        }

        let batch_size = self
            .batch_size
            .ok_or_else(|| ConfigurationError::missing_required_field("batch_size", context))?;
        if batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch_size",
                batch_size,
                "must be a positive integer",
            ));
        }

        if self.num_levels == 0 {
            return Err(ConfigurationError::invalid_value(
                "num_levels",
                self.num_levels,
                "the dispatch tree needs at least one level",
            ));
        }
        if self.max_parallelism == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_parallelism",
                self.max_parallelism,
                "must be a positive integer",
            ));
        }
        if self.max_concurrent_jobs == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "max_concurrent_jobs",
                0,
                "must be a positive integer when set",
            ));
        }

        require_reference("worker_function_ref", self.worker_function_ref.as_deref(), context)?;
        if self.num_levels > 1 {
            require_reference(
                "dispatch_function_ref",
                self.dispatch_function_ref.as_deref(),
                "multi-level dispatch",
            )?;
        }
        if self.max_concurrent_jobs.is_some() {
            require_reference(
                "dispatch_function_ref",
                self.dispatch_function_ref.as_deref(),
                "throttled dispatch",
            )?;
        }
        Ok(())
    }

    /// Dataset range; call after [`validate`](Self::validate)
    pub fn dataset_range(&self) -> ConfigResult<IndexRange> {
        let end = self.dataset_end_index.ok_or_else(|| {
            ConfigurationError::missing_required_field("dataset_end_index", "fanout configuration")
        })?;
        IndexRange::new(self.dataset_start_index, end).map_err(|e| {
            ConfigurationError::invalid_value("dataset_start_index", self.dataset_start_index, e.to_string())
        })
    }

    pub fn worker_function(&self) -> Option<FunctionRef> {
        non_blank(self.worker_function_ref.as_deref()).map(FunctionRef::new)
    }

    pub fn dispatch_function(&self) -> Option<FunctionRef> {
        non_blank(self.dispatch_function_ref.as_deref()).map(FunctionRef::new)
    }

    pub fn combiner_function(&self) -> Option<FunctionRef> {
        non_blank(self.combiner_function_ref.as_deref()).map(FunctionRef::new)
    }

    pub fn descriptor_ttl(&self) -> Duration {
        Duration::from_secs(self.descriptor_ttl_secs)
    }

    pub fn max_inline_payload_bytes(&self) -> usize {
        usize::try_from(self.max_inline_payload_bytes).unwrap_or(usize::MAX)
    }

    pub fn max_ledger_pages(&self) -> usize {
        usize::try_from(self.max_ledger_pages).unwrap_or(usize::MAX).max(1)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn require_reference(field: &str, value: Option<&str>, context: &str) -> ConfigResult<()> {
    match non_blank(value) {
        Some(_) => Ok(()),
        None => Err(ConfigurationError::missing_required_field(field, context)),
    }
}
