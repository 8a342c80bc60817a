//! Planning Benchmarks
//!
//! Measures coordinator planning and plan graph queries:
//! - Explicit and keyword classification
//! - Topological ordering
//! - Transitive dependents

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use dp_core::{Config, Coordinator, Registry, Task};

fn coordinator() -> Coordinator {
    let registry = Registry::from_config(Config::default_pipeline()).unwrap();
    Coordinator::new(Arc::new(registry))
}

/// Benchmark plan construction
fn bench_plan(c: &mut Criterion) {
    let coordinator = coordinator();
    let mut group = c.benchmark_group("plan");

    let tasks = [
        ("single", Task::new("stats").with_requires(["analyze"])),
        (
            "explicit_chain",
            Task::new("pipeline").with_requires(["collect", "clean", "analyze", "visualize"]),
        ),
        (
            "keywords",
            Task::new("Load the file, clean missing values, analyze correlations and plot a chart"),
        ),
    ];

    for (name, task) in &tasks {
        group.bench_with_input(BenchmarkId::new("coordinator", name), task, |b, task| {
            b.iter(|| black_box(coordinator.plan(task).unwrap()))
        });
    }

    group.finish();
}

/// Benchmark graph queries on a built plan
fn bench_plan_queries(c: &mut Criterion) {
    let coordinator = coordinator();
    let task = Task::new("pipeline").with_requires(["collect", "clean", "analyze", "visualize"]);
    let plan = coordinator.plan(&task).unwrap();
    let root = plan.roots()[0].clone();

    let mut group = c.benchmark_group("plan_queries");

    group.bench_function("topological_order", |b| {
        b.iter(|| black_box(plan.topological_order().unwrap()))
    });

    group.bench_function("transitive_dependents", |b| {
        b.iter(|| black_box(plan.transitive_dependents(&root)))
    });

    group.bench_function("shape", |b| b.iter(|| black_box(plan.shape())));

    group.finish();
}

criterion_group!(benches, bench_plan, bench_plan_queries);
criterion_main!(benches);
