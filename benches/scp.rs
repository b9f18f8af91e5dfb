//! Benchmarks for projection construction and online SCP queries.
//!
//! Run with:
//! ```bash
//! cargo bench --bench scp
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use scp_rs::abstraction::Abstraction;
use scp_rs::generator::{generate, GeneratorConfig};
use scp_rs::online::{OnlineConfig, OnlineScpHeuristic};
use scp_rs::projection::Projection;
use scp_rs::task::{Operator, Task};
use scp_rs::types::Fact;

// ============================================================================
// Helper: synthetic chain tasks
// ============================================================================

/// A chain of `n` variables with `domain` values each: variable `i` can be
/// incremented once variable `i - 1` has reached its maximum. The goal asks
/// for the last variable at its maximum.
fn chain_task(n: usize, domain: usize) -> Task {
    let top = domain - 1;
    let mut operators = Vec::new();
    for var in 0..n {
        for value in 0..top {
            let mut pre = vec![Fact::new(var, value)];
            if var > 0 {
                pre.push(Fact::new(var - 1, top));
            }
            operators.push(Operator::new(
                (var + 1) as i32,
                pre,
                vec![Fact::new(var, value + 1)],
            ));
        }
    }
    Task::new(
        vec![domain; n],
        operators,
        vec![0; n],
        vec![Fact::new(n - 1, top)],
    )
}

/// Random reachable-looking states for query benchmarks.
fn random_states(task: &Task, count: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            (0..task.num_variables())
                .map(|var| rng.random_range(0..task.domain(var)))
                .collect()
        })
        .collect()
}

// ============================================================================
// Benchmark: projection construction + distance computation
// ============================================================================

fn bench_projection_distances(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection/distances");

    for n in [6usize, 8, 10] {
        let task = chain_task(n, 3);
        let pattern: Vec<usize> = (0..n).collect();
        let costs = task.operator_costs();
        group.bench_with_input(BenchmarkId::new("full_pattern", n), &n, |b, _| {
            b.iter(|| {
                let projection = Projection::new(&task, pattern.clone()).unwrap();
                projection.compute_goal_distances(&costs)
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: pattern collection generation
// ============================================================================

fn bench_generate_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("generator/collect");
    group.sample_size(20);

    for n in [6usize, 8] {
        let task = chain_task(n, 3);
        let config = GeneratorConfig::default().with_max_pattern_size(3);
        group.bench_with_input(BenchmarkId::new("max_size_3", n), &n, |b, _| {
            b.iter(|| generate(&task, &config).unwrap());
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: online queries
// ============================================================================

fn bench_online_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("online/queries");
    group.sample_size(20);

    let task = chain_task(8, 3);
    let states = random_states(&task, 256, 42);

    for interval in [1i64, 10] {
        group.bench_with_input(
            BenchmarkId::new("interval", interval),
            &interval,
            |b, &interval| {
                b.iter(|| {
                    let collection = generate(
                        &task,
                        &GeneratorConfig::default().with_max_pattern_size(2),
                    )
                    .unwrap();
                    let mut heuristic = OnlineScpHeuristic::new(
                        &task,
                        collection.projections,
                        &collection.stored_orders,
                        &OnlineConfig::default().with_interval(interval),
                    )
                    .unwrap();
                    heuristic.notify_initial_state(task.initial_state());
                    let mut sum = 0i64;
                    for state in &states {
                        if let Some(h) = heuristic.compute_heuristic(state) {
                            sum += h as i64;
                        }
                    }
                    sum
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_projection_distances,
    bench_generate_collection,
    bench_online_queries,
);

criterion_main!(benches);
