use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use steward::adapters::tools::SetContextTool;
use steward::domain::models::{Context, Step, Task};
use steward::domain::ports::ToolRegistry;
use steward::services::dag_executor::ready_steps;
use steward::services::{CircuitBreakerService, DagExecutor, ExecutorConfig, RetryEngine, RetryPolicy};

/// Layered plan: every step depends on up to two steps of the previous layer.
fn layered_plan(layers: usize, width: usize) -> Vec<Step> {
    let mut plan = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for slot in 0..width {
            let mut step = Step::new("set_context", format!("step {layer}.{slot}"))
                .with_id(format!("s{layer}_{slot}"))
                .with_param(format!("k{layer}_{slot}"), json!(slot));
            if layer > 0 {
                step = step
                    .with_dependency(format!("s{}_{slot}", layer - 1))
                    .with_dependency(format!("s{}_{}", layer - 1, (slot + 1) % width));
            }
            plan.push(step);
        }
    }
    plan
}

fn bench_ready_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_steps");
    for size in [10usize, 50, 200] {
        let mut plan = layered_plan(size, 8);
        // Half the layers done so the scan sees a mix of states.
        for step in plan.iter_mut().take(size * 4) {
            step.mark_completed(json!(null));
        }
        group.bench_with_input(BenchmarkId::from_parameter(size * 8), &plan, |b, plan| {
            b.iter(|| ready_steps(black_box(plan)));
        });
    }
    group.finish();
}

fn bench_execute_plan(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let policy = RetryPolicy {
        base_delay: Duration::from_millis(1),
        immediate_delay: Duration::ZERO,
        jitter: 0.0,
        step_timeout: Duration::from_secs(5),
    };
    let executor = DagExecutor::new(
        RetryEngine::new(policy, Arc::new(CircuitBreakerService::default())),
        Arc::new(ToolRegistry::new().with("set_context", Arc::new(SetContextTool))),
        ExecutorConfig { max_concurrency: 8 },
    );

    let mut group = c.benchmark_group("execute_plan");
    for layers in [4usize, 16] {
        let plan = layered_plan(layers, 8);
        group.bench_with_input(BenchmarkId::from_parameter(layers * 8), &plan, |b, plan| {
            b.to_async(&runtime).iter(|| async {
                let mut task = Task::new("bench", "Benchmark plan execution", Context::new());
                task.plan = plan.clone();
                executor.execute_plan(&mut task).await.expect("plan runs")
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ready_steps, bench_execute_plan);
criterion_main!(benches);
