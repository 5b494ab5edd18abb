//! Dispatch Benchmarks
//!
//! Planner arithmetic and a full in-memory tree walk.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use tasker_fanout::clients::InMemoryInvoker;
use tasker_fanout::models::{DispatchInvocation, FunctionRef, IndexRange, Job, JobId};
use tasker_fanout::orchestration::{plan, DispatchTreeWalker};
use tasker_fanout::resilience::RetryPolicy;

fn benchmark_partition_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_plan");
    for levels in [1u32, 2, 3, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(levels), &levels, |b, &levels| {
            b.iter(|| plan(black_box(10_000_000), black_box(37), black_box(3000), levels))
        });
    }
    group.finish();
}

fn benchmark_tree_walk(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    let range = IndexRange::new(0, 100_000).expect("range");
    let job = Job::new(
        JobId::new(),
        range,
        plan(range.len(), 100, 3000, 2).expect("plan"),
        2,
        600,
        json!({}),
        FunctionRef::new("worker"),
        Some(FunctionRef::new("dispatcher")),
    );
    let dispatcher = FunctionRef::new("dispatcher");

    c.bench_function("walk_two_level_tree", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let invoker = Arc::new(InMemoryInvoker::new());
                let walker = DispatchTreeWalker::with_retry(invoker.clone(), RetryPolicy::no_retry());

                walker
                    .step(&DispatchInvocation::root(job.clone()))
                    .await
                    .expect("root step");
                for recorded in invoker.drain_for(&dispatcher) {
                    let child: DispatchInvocation =
                        serde_json::from_value(recorded.payload).expect("child payload");
                    walker.step(&child).await.expect("child step");
                }
                black_box(invoker.accepted_count())
            })
        })
    });
}

criterion_group!(benches, benchmark_partition_planning, benchmark_tree_walk);
criterion_main!(benches);
