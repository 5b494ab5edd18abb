//! # System Constants
//!
//! Defaults and operational limits shared by the planner, walker, paginator and
//! monitor. Configuration overrides most of these; the rest are wire-level names the
//! external workflow engine depends on.

/// Depth of the dispatch tree when the caller does not specify one
pub const DEFAULT_NUM_LEVELS: u32 = 2;

/// Ceiling on concurrently running batches when the caller does not specify one
pub const DEFAULT_MAX_PARALLELISM: u64 = 3000;

/// Wall-clock budget for a job before the monitor reports a timeout
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 600;

/// Largest descriptor page passed inline in an invocation payload (256 KiB)
pub const DEFAULT_MAX_INLINE_PAYLOAD_BYTES: usize = 256 * 1024;

/// Expiry applied to descriptor pages parked in the object store
pub const DEFAULT_DESCRIPTOR_TTL_SECS: u64 = 3600;

/// Interval between monitor polls driven by the workflow engine
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 1;

/// Upper bound on ledger result pages aggregated for a single decision
pub const DEFAULT_MAX_LEDGER_PAGES: usize = 10_000;

/// Object store bucket used for descriptor pages
pub const DEFAULT_SCRATCH_BUCKET: &str = "fanout-scratch";

/// Status reported by the invoker when an asynchronous invocation is queued
pub const INVOCATION_ACCEPTED_STATUS: u16 = 202;

/// State names of the monitor state machine run by the workflow engine
pub mod states {
    pub const MONITOR: &str = "Monitor";
    pub const IS_TIMED_OUT: &str = "IsTimedOut";
    pub const ARE_WE_DONE_YET: &str = "AreWeDoneYet";
    pub const WAIT: &str = "Wait";
    pub const REDUCE: &str = "Reduce";
    pub const END: &str = "EndState";
}

/// Error names the workflow engine retries the monitor task on
pub mod retryable_errors {
    pub const TOO_MANY_REQUESTS: &str = "Lambda.TooManyRequestsException";
}

/// Retry budget the workflow engine applies to throttled monitor calls
pub const MONITOR_THROTTLE_MAX_ATTEMPTS: u32 = 100;
