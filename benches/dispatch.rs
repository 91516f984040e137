//! Benchmarks for dispatch batching over the task DAG.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use uuid::Uuid;

use conductor::domain::models::Task;
use conductor::services::DependencyResolver;

/// A layered DAG: `layers` ranks of `width` tasks, each depending on
/// every task in the previous rank.
fn layered_dag(layers: usize, width: usize) -> Vec<Task> {
    let now = Utc::now();
    let ticket = Uuid::new_v4();
    let phase = Uuid::new_v4();
    let mut tasks: Vec<Task> = Vec::with_capacity(layers * width);

    for layer in 0..layers {
        let prev_rank: Vec<Uuid> = if layer == 0 {
            Vec::new()
        } else {
            tasks[(layer - 1) * width..layer * width].iter().map(|t| t.id).collect()
        };
        for i in 0..width {
            let mut task = Task::new(ticket, phase, format!("l{layer}-t{i}"), "bench", now);
            for dep in &prev_rank {
                task.depends_on.insert(*dep);
            }
            tasks.push(task);
        }
    }
    tasks
}

fn bench_independent_subset(c: &mut Criterion) {
    let mut group = c.benchmark_group("independent_subset");
    let resolver = DependencyResolver::new();

    for (layers, width) in [(4, 8), (8, 16), (16, 16)] {
        let tasks = layered_dag(layers, width);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{layers}x{width}")),
            &tasks,
            |b, tasks| {
                b.iter(|| resolver.independent_subset(black_box(tasks), black_box(tasks), 32));
            },
        );
    }
    group.finish();
}

fn bench_cycle_detection(c: &mut Criterion) {
    let resolver = DependencyResolver::new();
    let tasks = layered_dag(16, 16);
    c.bench_function("detect_cycle_256_tasks", |b| {
        b.iter(|| resolver.detect_cycle(black_box(&tasks)));
    });
}

criterion_group!(benches, bench_independent_subset, bench_cycle_detection);
criterion_main!(benches);
