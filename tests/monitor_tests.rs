//! Monitor polling against the in-memory ledger, including a simulated run of the
//! wait loop definition the workflow engine executes.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tasker_fanout::clients::{CompletionLedger, LedgerError, LedgerPage};
use tasker_fanout::models::{FunctionRef, JobId, JobOutcome, MonitorParams, MonitorReport};
use tasker_fanout::orchestration::{
    CompletionMonitor, FixedClock, JobMonitor, MonitorHandler, MonitorStateMachineDefinition,
};

/// Ledger replaying a fixed sequence of page responses
struct ScriptedLedger {
    pages: Mutex<VecDeque<Result<LedgerPage, LedgerError>>>,
}

impl ScriptedLedger {
    fn new(pages: Vec<Result<LedgerPage, LedgerError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
        }
    }
}

#[async_trait]
impl CompletionLedger for ScriptedLedger {
    async fn query_page(
        &self,
        job_id: &JobId,
        _page_token: Option<&str>,
    ) -> Result<LedgerPage, LedgerError> {
        self.pages.lock().pop_front().unwrap_or_else(|| {
            Err(LedgerError::Unavailable {
                job_id: job_id.to_string(),
                reason: "script exhausted".to_string(),
            })
        })
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
}

fn params(num_batches: u64, timeout_secs: u64) -> MonitorParams {
    MonitorParams {
        job_id: JobId::new(),
        num_batches,
        start_time: start(),
        timeout_secs,
        combiner_function: Some(FunctionRef::new(COMBINER)),
    }
}

fn monitor(ledger: Arc<dyn CompletionLedger>, elapsed_secs: i64) -> JobMonitor {
    JobMonitor::new(ledger).with_clock(Arc::new(FixedClock(
        start() + Duration::seconds(elapsed_secs),
    )))
}

#[tokio::test]
async fn test_pages_of_seven_and_three_make_ten() {
    let ledger = Arc::new(ScriptedLedger::new(vec![
        Ok(LedgerPage::continued(7, "page-2")),
        Ok(LedgerPage::last(3)),
    ]));

    let report = monitor(ledger, 30).poll(&params(10, 300)).await;

    assert!(report.completed);
    assert!(!report.timed_out);
    assert!(!report.with_errors);
    assert_eq!(report.num_remaining, Some(0));
}

#[tokio::test]
async fn test_decision_table() {
    let cases = [
        (10, 30, true, false, Some(0)),
        (4, 500, false, true, Some(6)),
        (4, 100, false, false, Some(6)),
    ];

    for (num_complete, elapsed, completed, timed_out, remaining) in cases {
        let ledger = Arc::new(ScriptedLedger::new(vec![Ok(LedgerPage::last(num_complete))]));
        let report = monitor(ledger, elapsed).poll(&params(10, 300)).await;
        assert_eq!(report.completed, completed, "complete={num_complete} elapsed={elapsed}");
        assert_eq!(report.timed_out, timed_out, "complete={num_complete} elapsed={elapsed}");
        assert_eq!(report.num_remaining, remaining);
    }
}

#[tokio::test]
async fn test_failure_on_second_page_fails_open() {
    let ledger = Arc::new(ScriptedLedger::new(vec![
        Ok(LedgerPage::continued(7, "page-2")),
        Err(LedgerError::Throttled {
            job_id: "job".to_string(),
            reason: "slow down".to_string(),
        }),
    ]));

    let report = monitor(ledger, 30).poll(&params(10, 300)).await;

    assert!(report.completed);
    assert!(!report.timed_out);
    assert!(report.with_errors);
    assert_eq!(
        JobOutcome::from_report(&report),
        Some(JobOutcome::CompletedUnverified)
    );
}

#[tokio::test]
async fn test_runaway_pagination_is_cut_off() {
    let pages = (0..5)
        .map(|i| Ok(LedgerPage::continued(1, format!("page-{i}"))))
        .collect();
    let ledger = Arc::new(ScriptedLedger::new(pages));

    let report = monitor(ledger, 30)
        .with_max_ledger_pages(3)
        .poll(&params(10, 300))
        .await;

    assert!(report.with_errors);
}

#[tokio::test]
async fn test_in_memory_ledger_pagination_and_duplicate_rows() {
    let harness = Harness::with_ledger_page_size(7);
    let params = params(10, 300);
    for batch_id in 0..10 {
        harness.ledger.append(params.job_id, batch_id);
    }
    // A retried worker writes its row again
    harness.ledger.append(params.job_id, 3);

    let reply = harness
        .monitor_handler(start() + Duration::seconds(10))
        .handle(serde_json::to_value(&params).unwrap())
        .await
        .unwrap();

    assert_eq!(reply["completed"], true);
    assert_eq!(reply["num_remaining"], 0);
    assert_eq!(reply["outcome"], "completed");
    assert_eq!(harness.ledger.query_count(), 2);
}

#[tokio::test]
async fn test_rows_of_other_jobs_are_not_counted() {
    let harness = Harness::new();
    let params = params(4, 300);
    for batch_id in 0..4 {
        harness.ledger.append(JobId::new(), batch_id);
    }
    harness.ledger.append(params.job_id, 0);

    let reply = harness
        .monitor_handler(start())
        .handle(serde_json::to_value(&params).unwrap())
        .await
        .unwrap();

    assert_eq!(reply["completed"], false);
    assert_eq!(reply["num_remaining"], 3);
}

/// Run the monitor loop definition the way the workflow engine would. Each `Wait`
/// advances the clock and lets `completions_per_wait` more batches finish.
async fn run_wait_loop(
    harness: &Harness,
    definition: &Value,
    input: Value,
    completions_per_wait: u64,
) -> (Value, Vec<String>) {
    let params: MonitorParams = serde_json::from_value(input.clone()).unwrap();
    let states = &definition["States"];
    let mut state = definition["StartAt"].as_str().unwrap().to_string();
    let mut data = input;
    let mut now = params.start_time;
    let mut completed_batches = 0;
    let mut trail = Vec::new();

    for _ in 0..1_000 {
        trail.push(state.clone());
        let spec = &states[state.as_str()];
        match spec["Type"].as_str().unwrap() {
            "Task" if spec["Resource"] == COMBINER => {
                data["reduced"] = json!(true);
            }
            "Task" => {
                data = harness.monitor_handler(now).handle(data).await.unwrap();
            }
            "Choice" => {
                let choice = &spec["Choices"][0];
                let field = choice["Variable"].as_str().unwrap().trim_start_matches("$.");
                let next = if data[field] == choice["BooleanEquals"] {
                    &choice["Next"]
                } else {
                    &spec["Default"]
                };
                state = next.as_str().unwrap().to_string();
                continue;
            }
            "Wait" => {
                now += Duration::seconds(spec["Seconds"].as_i64().unwrap() * 30);
                let target = (completed_batches + completions_per_wait).min(params.num_batches);
                for batch_id in completed_batches..target {
                    harness.ledger.append(params.job_id, batch_id);
                }
                completed_batches = target;
            }
            "Pass" if spec["End"] == true => return (data, trail),
            other => panic!("unexpected state type {other}"),
        }
        state = spec["Next"].as_str().unwrap().to_string();
    }
    panic!("wait loop did not terminate");
}

fn loop_definition() -> Value {
    MonitorStateMachineDefinition::new(FunctionRef::new("monitor"))
        .with_combiner(Some(FunctionRef::new(COMBINER)))
        .to_value()
}

#[tokio::test]
async fn test_wait_loop_finishes_when_all_batches_complete() {
    let harness = Harness::new();
    let input = serde_json::to_value(params(10, 3_600)).unwrap();

    let (output, trail) = run_wait_loop(&harness, &loop_definition(), input, 4).await;

    let report: MonitorReport = serde_json::from_value(output.clone()).unwrap();
    assert!(report.completed);
    assert!(!report.timed_out);
    assert_eq!(output["reduced"], true);
    assert_eq!(output["outcome"], "completed");
    // Three waits: 4, 8, then 10 completed
    assert_eq!(trail.iter().filter(|s| s.as_str() == "Wait").count(), 3);
    assert_eq!(trail.last().map(String::as_str), Some("EndState"));
}

#[tokio::test]
async fn test_wait_loop_times_out_with_partial_results() {
    let harness = Harness::new();
    let input = serde_json::to_value(params(10, 60)).unwrap();

    let (output, _) = run_wait_loop(&harness, &loop_definition(), input, 1).await;

    assert_eq!(output["timed_out"], true);
    assert_eq!(output["completed"], false);
    assert_eq!(output["outcome"], "completed_after_timeout");
    assert_eq!(output["reduced"], true);
    assert!(output["num_remaining"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_wait_loop_exits_on_ledger_outage() {
    let harness = Harness::new();
    harness.ledger.fail_next_queries(1);
    let input = serde_json::to_value(params(10, 3_600)).unwrap();

    let (output, trail) = run_wait_loop(&harness, &loop_definition(), input, 4).await;

    assert_eq!(output["with_errors"], true);
    assert_eq!(output["outcome"], "completed_unverified");
    assert!(!trail.iter().any(|s| s == "Wait"));
}

#[test]
fn test_monitor_handler_rejects_malformed_events() {
    let harness = Harness::new();
    let handler: MonitorHandler = harness.monitor_handler(start());

    let result = tokio_test::block_on(handler.handle(json!({"num_batches": "ten"})));
    assert!(result.unwrap_err().is_config_error());
}
