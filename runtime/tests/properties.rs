//! Property tests for Store ordering and snapshot guarantees

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use flux_store_core::reducer::CountingReducer;
use flux_store_core::{Action, ActionKind, MiddlewareChain, ReducerSet, Snapshot};
use flux_store_runtime::Store;
use flux_store_testing::Gate;
use flux_store_testing::properties::actions;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

const KINDS: i32 = 8;

fn counting_reducers() -> ReducerSet {
    (0..KINDS).fold(ReducerSet::new(), |set, kind| {
        set.with(CountingReducer::new(format!("kind-{kind}"), ActionKind::new(kind)))
    })
}

proptest! {
    #[test]
    fn completions_follow_dispatch_order(
        batch in actions(24),
        release_every in 1usize..5,
    ) {
        let gate = Gate::new();
        let mut store = Store::new();
        store
            .initialize(Snapshot::new(), MiddlewareChain::new().with(gate.middleware()), counting_reducers())
            .unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut ids = Vec::new();
        for action in batch.clone() {
            let order = Arc::clone(&order);
            let id = store
                .dispatch_with(action, move |done: Action| order.lock().unwrap().push(done.kind()))
                .unwrap();
            ids.push(id);
        }
        prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let mut ticks = 0usize;
        while !store.is_idle() {
            ticks += 1;
            prop_assert!(ticks < 10_000, "store never drained");
            // Never more than one action parked in the middleware
            prop_assert!(gate.pending() <= 1);
            if ticks % release_every == 0 {
                gate.release_all();
            }
            store.tick().unwrap();
        }

        let expected: Vec<ActionKind> = batch.iter().map(Action::kind).collect();
        prop_assert_eq!(order.lock().unwrap().clone(), expected);
    }

    #[test]
    fn snapshot_holds_every_domain_with_reduced_value(batch in actions(32)) {
        let mut store = Store::new();
        store
            .initialize(Snapshot::new(), MiddlewareChain::new(), counting_reducers())
            .unwrap();
        let initial = store.snapshot();

        for action in batch.clone() {
            store.dispatch_with(action, |_| {}).unwrap();
        }
        while !store.is_idle() {
            store.tick().unwrap();
            prop_assert_eq!(store.snapshot().len(), KINDS as usize);
        }

        for kind in 0..KINDS {
            let expected = batch.iter().filter(|a| a.kind().value() == kind).count() as u64;
            let domain = format!("kind-{kind}");
            prop_assert_eq!(store.state::<u64>(&domain), Some(&expected));
            prop_assert_eq!(initial.get::<u64>(&domain), Some(&0));
        }
    }

    #[test]
    fn clean_queue_only_drops_unstarted_work(
        batch in actions(16),
        ticks_before_clean in 0usize..6,
    ) {
        let mut store = Store::new();
        store
            .initialize(Snapshot::new(), MiddlewareChain::new(), counting_reducers())
            .unwrap();

        let done = Arc::new(Mutex::new(0usize));
        for action in batch.clone() {
            let done = Arc::clone(&done);
            store.dispatch_with(action, move |_| *done.lock().unwrap() += 1).unwrap();
        }
        for _ in 0..ticks_before_clean {
            store.tick().unwrap();
        }
        let started_or_done = batch.len() - store.queue_len();
        let discarded = store.clean_queue();
        prop_assert_eq!(discarded + started_or_done, batch.len());

        while !store.is_idle() {
            store.tick().unwrap();
        }
        prop_assert_eq!(*done.lock().unwrap(), started_or_done);
    }
}
