//! Store Performance Benchmarks
//!
//! These benchmarks measure the cost of the tick-driven pipeline:
//! - Reducer set application (snapshot assembly) as the domain count grows
//! - Full dispatch-to-completion latency with and without middleware
//! - Ticks spent on a parked middleware (the per-frame idle cost)
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flux_store_core::reducer::CountingReducer;
use flux_store_core::{Action, ActionKind, MiddlewareChain, MiddlewareError, Next, ReducerSet, Snapshot};
use flux_store_runtime::Store;
use flux_store_testing::Gate;
use std::sync::Arc;

const INCR: ActionKind = ActionKind::new(1);

fn reducers(domains: usize) -> ReducerSet {
    (0..domains).fold(ReducerSet::new(), |set, i| {
        set.with(CountingReducer::new(format!("domain-{i}"), INCR))
    })
}

fn passthrough(_: &Arc<Snapshot>, action: Action, next: Next) -> Result<(), MiddlewareError> {
    let _ = next.resolve(action);
    Ok(())
}

fn store(middleware: MiddlewareChain, domains: usize) -> Store {
    let mut store = Store::new();
    store
        .initialize(Snapshot::new(), middleware, reducers(domains))
        .expect("Failed to initialize store");
    store
}

/// Benchmark snapshot assembly in isolation (no Store overhead)
fn benchmark_reducer_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("reducer_set");
    group.throughput(Throughput::Elements(1));

    for domains in [1usize, 8, 64] {
        let set = reducers(domains);
        let snapshot = set.seed(Snapshot::new()).expect("Failed to seed snapshot");
        let action = Action::new(INCR);

        group.bench_with_input(BenchmarkId::new("apply", domains), &domains, |b, _| {
            b.iter(|| set.apply(black_box(&snapshot), black_box(&action)));
        });
    }

    group.finish();
}

/// Benchmark dispatch-to-completion through the tick loop
fn benchmark_dispatch_to_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_to_completion");
    group.throughput(Throughput::Elements(1));

    for middleware in [0usize, 1, 4] {
        let chain = (0..middleware).fold(MiddlewareChain::new(), |chain, _| chain.with(passthrough));
        let mut store = store(chain, 8);

        group.bench_with_input(BenchmarkId::new("middleware", middleware), &middleware, |b, _| {
            b.iter(|| {
                store
                    .dispatch_with(black_box(Action::new(INCR)), |_| {})
                    .expect("dispatch");
                while !store.is_idle() {
                    store.tick().expect("tick");
                }
            });
        });
    }

    group.finish();
}

/// Benchmark the cost of ticking while a middleware holds its continuation
fn benchmark_parked_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("parked_tick");
    group.throughput(Throughput::Elements(1));

    let gate = Gate::new();
    let mut store = store(MiddlewareChain::new().with(gate.middleware()), 8);
    store
        .dispatch_with(Action::new(INCR), |_| {})
        .expect("dispatch");
    store.tick().expect("dequeue");
    store.tick().expect("invoke");

    group.bench_function("waiting", |b| {
        b.iter(|| black_box(store.tick().expect("tick")));
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_reducer_set,
    benchmark_dispatch_to_completion,
    benchmark_parked_tick,
);
criterion_main!(benches);
