//! # Structured Logging Module
//!
//! Environment-aware structured logging for dispatch and monitor invocations. Every
//! invocation runs in its own short-lived execution context, so the subscriber is
//! installed lazily and at most once per process.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::models::{JobId, MonitorReport};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("RUST_LOG")
            .map(EnvFilter::new)
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json_output = use_json_format();

        let console_layer = if json_output {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // Host runtimes sometimes install their own subscriber first
        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            json = json_output,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("FANOUT_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var("FANOUT_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for a dispatch step
pub fn log_dispatch_operation(
    operation: &str,
    job_id: &JobId,
    level: u32,
    range_start: u64,
    range_end: u64,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        level = level,
        range_start = range_start,
        range_end = range_end,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 DISPATCH_OPERATION"
    );
}

/// Log the decision the monitor hands back to the workflow engine
pub fn log_monitor_decision(report: &MonitorReport) {
    tracing::info!(
        job_id = %report.params.job_id,
        num_batches = report.params.num_batches,
        num_remaining = report.num_remaining,
        elapsed_secs = report.elapsed_secs,
        completed = report.completed,
        timed_out = report.timed_out,
        with_errors = report.with_errors,
        "🔍 MONITOR_DECISION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
