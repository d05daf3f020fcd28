//! Integration tests for the Store pipeline
//!
//! Drives a real Store tick by tick and checks ordering, snapshot and
//! completion guarantees.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use flux_store_core::reducer::CountingReducer;
use flux_store_core::{
    Action, ActionError, ActionKind, DomainState, FnReducer, MiddlewareChain, MiddlewareError, Next,
    ReducerSet, Snapshot, Stage,
};
use flux_store_runtime::{Progress, Store, StoreConfig, StoreError};
use flux_store_testing::helpers::{init_tracing, tick_n, tick_until_idle};
use flux_store_testing::reducer_test::assertions::{assert_completed_ok, assert_failed_with};
use flux_store_testing::{CallLog, FailingMiddleware, Gate, RecordingMiddleware};
use std::sync::{Arc, Mutex};

// ============================================================================
// Test Fixtures
// ============================================================================

const INCR: ActionKind = ActionKind::new(1);
const LOAD: ActionKind = ActionKind::new(2);
const NOOP: ActionKind = ActionKind::new(3);

type Completed = Arc<Mutex<Vec<(u64, Action)>>>;

fn store_with(middleware: MiddlewareChain, reducers: ReducerSet) -> Store {
    init_tracing();
    let mut store = Store::new();
    store
        .initialize(Snapshot::new(), middleware, reducers)
        .expect("initialize");
    store
}

fn counter() -> CountingReducer {
    CountingReducer::new("counter", INCR)
}

/// Dispatch `action` with a callback that records `(tag, action)` into `sink`
fn dispatch_recorded(store: &mut Store, sink: &Completed, tag: u64, action: Action) {
    let sink = Arc::clone(sink);
    store
        .dispatch_with(action, move |done| sink.lock().unwrap().push((tag, done)))
        .unwrap();
}

fn completed_tags(sink: &Completed) -> Vec<u64> {
    sink.lock().unwrap().iter().map(|(tag, _)| *tag).collect()
}

// ============================================================================
// Basic pipeline
// ============================================================================

#[test]
fn test_no_middleware_completes_on_tick_after_dequeue() {
    let mut store = store_with(MiddlewareChain::new(), ReducerSet::new().with(counter()));
    let sink = Completed::default();

    dispatch_recorded(&mut store, &sink, 1, Action::new(INCR));
    assert!(sink.lock().unwrap().is_empty(), "dispatch never runs synchronously");

    let first = store.tick().unwrap();
    assert_eq!(first.progress, Progress::Idle);
    assert!(sink.lock().unwrap().is_empty());
    assert_eq!(store.state::<u64>("counter"), Some(&0));

    store.tick().unwrap();
    let delivered = sink.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_completed_ok(&delivered[0].1);
    assert_eq!(store.state::<u64>("counter"), Some(&1));
    assert!(store.is_idle());
}

#[test]
fn test_deferred_middleware_blocks_following_dispatch() {
    let gate = Gate::new();
    let log = CallLog::new();
    let mut store = store_with(
        MiddlewareChain::new()
            .with(RecordingMiddleware::new("recorder", &log))
            .with(gate.middleware()),
        ReducerSet::new().with(counter()),
    );
    let sink = Completed::default();

    dispatch_recorded(&mut store, &sink, 1, Action::new(INCR));
    dispatch_recorded(&mut store, &sink, 2, Action::new(INCR));

    // dequeue, recorder, deferred
    tick_n(&mut store, 3).unwrap();
    assert_eq!(gate.pending(), 1);
    assert_eq!(log.len(), 1);

    // The deferred middleware continues on the third tick after invocation
    for _ in 0..2 {
        store.tick().unwrap();
        assert_eq!(log.len(), 1, "second action must not start early");
        assert!(sink.lock().unwrap().is_empty());
    }
    assert!(gate.release_next());
    let report = store.tick().unwrap();
    assert!(matches!(report.progress, Progress::Completed { .. }));
    assert_eq!(completed_tags(&sink), vec![1]);
    assert_eq!(log.len(), 1, "second action is only dequeued on completion");

    // Second action: recorder runs on the following tick
    store.tick().unwrap();
    assert_eq!(log.len(), 2);
    store.tick().unwrap();
    assert_eq!(gate.release_all(), 1);
    tick_until_idle(&mut store, 5);

    assert_eq!(completed_tags(&sink), vec![1, 2]);
    assert_eq!(store.state::<u64>("counter"), Some(&2));
}

#[test]
fn test_unrelated_action_recomputes_every_domain() {
    let mut store = store_with(
        MiddlewareChain::new(),
        ReducerSet::new()
            .with(FnReducer::new("a", vec![1, 2, 3], |s: &Vec<i32>, _: &Action| s.clone()))
            .with(FnReducer::new("b", String::from("b"), |s: &String, _: &Action| s.clone())),
    );
    let before = store.snapshot();

    store.dispatch_with(Action::new(NOOP), |_| {}).unwrap();
    tick_until_idle(&mut store, 5);
    let after = store.snapshot();

    assert!(!Arc::ptr_eq(&before, &after));
    assert!(before.value_eq(&after));
    assert!(before.changed_domains(&after).is_empty());
    assert_eq!(after.len(), 2);
}

#[test]
fn test_middleware_sees_updated_action_from_previous_middleware() {
    let log = CallLog::new();
    let seen = Arc::new(Mutex::new(None));
    let seen_by_second = Arc::clone(&seen);
    let second = move |_: &Arc<Snapshot>, action: Action, next: Next| -> Result<(), MiddlewareError> {
        *seen_by_second.lock().unwrap() = Some(action.payload.contains_key("first"));
        let _ = next.resolve(action);
        Ok(())
    };
    let mut store = store_with(
        MiddlewareChain::new()
            .with(RecordingMiddleware::new("first", &log))
            .with(second),
        ReducerSet::new(),
    );

    let mut handle = store.dispatch(Action::new(LOAD)).unwrap();
    tick_until_idle(&mut store, 10);

    assert_eq!(*seen.lock().unwrap(), Some(true));
    let action = handle.try_take().unwrap().unwrap();
    assert!(action.payload.contains_key("first"));
    assert_eq!(log.names(), vec!["first".to_string()]);
}

#[test]
fn test_one_pipeline_step_per_tick() {
    let log = CallLog::new();
    let mut store = store_with(
        MiddlewareChain::new()
            .with(RecordingMiddleware::new("m0", &log))
            .with(RecordingMiddleware::new("m1", &log))
            .with(RecordingMiddleware::new("m2", &log)),
        ReducerSet::new().with(counter()),
    );
    let handle = store.dispatch(Action::new(INCR)).unwrap();
    let id = handle.id();

    let progress: Vec<Progress> = tick_n(&mut store, 5)
        .unwrap()
        .into_iter()
        .map(|report| report.progress)
        .collect();

    assert_eq!(
        progress,
        vec![
            Progress::Idle,
            Progress::Invoked { id, index: 0 },
            Progress::Invoked { id, index: 1 },
            Progress::Invoked { id, index: 2 },
            Progress::Completed { id, kind: INCR },
        ]
    );
    assert_eq!(log.names(), vec!["m0", "m1", "m2"]);
}

// ============================================================================
// Queue management
// ============================================================================

#[test]
fn test_clean_queue_keeps_current_work_item() {
    let gate = Gate::new();
    let mut store = store_with(
        MiddlewareChain::new().with(gate.middleware()),
        ReducerSet::new().with(counter()),
    );
    let sink = Completed::default();

    for tag in 1..=4 {
        dispatch_recorded(&mut store, &sink, tag, Action::new(INCR));
    }
    tick_n(&mut store, 2).unwrap();
    assert_eq!(store.queue_len(), 3);

    assert_eq!(store.clean_queue(), 3);
    assert_eq!(store.queue_len(), 0);
    assert!(!store.is_idle());

    gate.release_all();
    tick_until_idle(&mut store, 5);
    assert_eq!(completed_tags(&sink), vec![1]);
    assert_eq!(store.state::<u64>("counter"), Some(&1));
}

#[test]
fn test_clean_queue_resolves_handles_as_discarded() {
    let mut store = store_with(MiddlewareChain::new(), ReducerSet::new());
    let mut first = store.dispatch(Action::new(NOOP)).unwrap();
    store.tick().unwrap();
    let mut queued = store.dispatch(Action::new(NOOP)).unwrap();

    store.clean_queue();
    assert_eq!(queued.try_take(), Err(StoreError::Discarded));

    store.tick().unwrap();
    assert!(first.try_take().unwrap().is_some());
}

#[test]
fn test_is_idle_tracks_queue_and_current() {
    let gate = Gate::new();
    let mut store = store_with(MiddlewareChain::new().with(gate.middleware()), ReducerSet::new());
    assert!(store.is_idle());

    store.dispatch_with(Action::new(NOOP), |_| {}).unwrap();
    assert!(!store.is_idle());
    store.tick().unwrap();
    assert!(!store.is_idle());
    assert_eq!(store.current_stage(), Some(Stage::Ready { index: 0 }));

    store.tick().unwrap();
    assert_eq!(
        store.current_stage(),
        Some(Stage::InMiddleware { index: 0, waited: 0 })
    );

    gate.release_all();
    store.tick().unwrap();
    assert!(store.is_idle());
    assert_eq!(store.current_stage(), None);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_middleware_failure_is_carried_in_action() {
    let log = CallLog::new();
    let mut store = store_with(
        MiddlewareChain::new()
            .with(FailingMiddleware::new(LOAD, MiddlewareError::with_code(404, "not found")))
            .with(RecordingMiddleware::new("after", &log)),
        ReducerSet::new().with(CountingReducer::new("loads", LOAD)),
    );
    let sink = Completed::default();

    dispatch_recorded(&mut store, &sink, 1, Action::new(LOAD));
    dispatch_recorded(&mut store, &sink, 2, Action::new(INCR));
    tick_until_idle(&mut store, 20);

    let delivered = sink.lock().unwrap();
    assert_failed_with(&delivered[0].1, 404);
    assert_completed_ok(&delivered[1].1);
    // Only the second action reached the recorder
    assert_eq!(log.kinds(), vec![INCR]);
    // Reducers still ran for the failed action
    assert_eq!(store.state::<u64>("loads"), Some(&1));
}

#[test]
fn test_dropped_continuation_does_not_wedge_queue() {
    let dropper = |_: &Arc<Snapshot>, _: Action, _: Next| -> Result<(), MiddlewareError> { Ok(()) };
    let mut store = store_with(MiddlewareChain::new().with(dropper), ReducerSet::new().with(counter()));
    let sink = Completed::default();

    dispatch_recorded(&mut store, &sink, 1, Action::new(INCR));
    dispatch_recorded(&mut store, &sink, 2, Action::new(INCR));
    tick_until_idle(&mut store, 20);

    let delivered = sink.lock().unwrap();
    assert_eq!(delivered.len(), 2);
    assert_failed_with(&delivered[0].1, ActionError::CONTINUATION_DROPPED);
    assert_failed_with(&delivered[1].1, ActionError::CONTINUATION_DROPPED);
}

#[test]
fn test_stall_timeout_abandons_middleware() {
    init_tracing();
    let gate = Gate::new();
    let mut store = Store::with_config(StoreConfig::default().with_stall_timeout_ticks(3));
    store
        .initialize(
            Snapshot::new(),
            MiddlewareChain::new().with(gate.middleware()),
            ReducerSet::new().with(counter()),
        )
        .unwrap();

    let mut handle = store.dispatch(Action::new(INCR)).unwrap();
    let reports = tick_n(&mut store, 6).unwrap();
    assert!(matches!(
        reports[5].progress,
        Progress::Failed { ref error, .. } if error.code == ActionError::STALLED
    ));

    store.tick().unwrap();
    let action = handle.try_take().unwrap().unwrap();
    assert_failed_with(&action, ActionError::STALLED);
    // A late resolve is refused
    assert!(!gate.release_next());
}

#[test]
fn test_without_stall_timeout_waits_forever() {
    let gate = Gate::new();
    let mut store = store_with(MiddlewareChain::new().with(gate.middleware()), ReducerSet::new());
    store.dispatch_with(Action::new(NOOP), |_| {}).unwrap();

    tick_n(&mut store, 1_000).unwrap();
    assert_eq!(
        store.current_stage(),
        Some(Stage::InMiddleware { index: 0, waited: 998 })
    );
    assert!(gate.release_next());
    store.tick().unwrap();
    assert!(store.is_idle());
}

#[test]
#[should_panic(expected = "reducer bug")]
fn test_reducer_panic_propagates() {
    let mut store = store_with(
        MiddlewareChain::new(),
        ReducerSet::new().with(FnReducer::new("bad", 0u8, |_: &u8, _: &Action| -> u8 {
            panic!("reducer bug")
        })),
    );
    store.dispatch_with(Action::new(NOOP), |_| {}).unwrap();
    store.tick().unwrap();
    store.tick().unwrap();
}

// ============================================================================
// Snapshots and observers
// ============================================================================

#[test]
fn test_snapshot_reference_is_never_mutated() {
    let mut store = store_with(MiddlewareChain::new(), ReducerSet::new().with(counter()));
    let held = store.snapshot();

    for _ in 0..3 {
        store.dispatch_with(Action::new(INCR), |_| {}).unwrap();
    }
    tick_until_idle(&mut store, 20);

    assert_eq!(held.get::<u64>("counter"), Some(&0));
    assert_eq!(store.state::<u64>("counter"), Some(&3));
}

#[test]
fn test_observer_receives_old_and_new_snapshot_once_per_dispatch() {
    let mut store = store_with(
        MiddlewareChain::new(),
        ReducerSet::new()
            .with(counter())
            .with(CountingReducer::new("loads", LOAD)),
    );
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    store.subscribe(move |old, new| {
        let changed: Vec<String> = old.changed_domains(new).into_iter().map(String::from).collect();
        sink.lock().unwrap().push(changed);
    });

    store.dispatch_with(Action::new(INCR), |_| {}).unwrap();
    store.dispatch_with(Action::new(LOAD), |_| {}).unwrap();
    store.dispatch_with(Action::new(NOOP), |_| {}).unwrap();
    tick_until_idle(&mut store, 20);

    assert_eq!(
        *changes.lock().unwrap(),
        vec![vec!["counter".to_string()], vec!["loads".to_string()], vec![]]
    );
}

#[test]
fn test_completion_callback_runs_before_observers() {
    let mut store = store_with(MiddlewareChain::new(), ReducerSet::new().with(counter()));
    let events = Arc::new(Mutex::new(Vec::new()));

    let observed = Arc::clone(&events);
    store.subscribe(move |_, new| {
        observed
            .lock()
            .unwrap()
            .push(format!("observer:{}", new.get::<u64>("counter").unwrap()));
    });
    let completed = Arc::clone(&events);
    store
        .dispatch_with(Action::new(INCR), move |done| {
            completed.lock().unwrap().push(format!("callback:{}", done.kind()));
        })
        .unwrap();
    tick_until_idle(&mut store, 10);

    assert_eq!(
        *events.lock().unwrap(),
        vec![format!("callback:{INCR}"), "observer:1".to_string()]
    );
}

#[test]
fn test_get_state_returns_type_erased_domain() {
    let store = store_with(MiddlewareChain::new(), ReducerSet::new().with(counter()));
    let state = store.get_state("counter").unwrap();
    assert_eq!(state.as_any().downcast_ref::<u64>(), Some(&0));
    assert!(store.get_state("missing").is_none());
}

// ============================================================================
// Setup errors
// ============================================================================

#[test]
fn test_initialize_rejects_unregistered_initial_domain() {
    let mut store = Store::new();
    let err = store
        .initialize(
            Snapshot::new().with_state("ghost", 1u8),
            MiddlewareChain::new(),
            ReducerSet::new().with(counter()),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Reducer(_)));
    assert_eq!(store.dispatch(Action::new(INCR)).unwrap_err(), StoreError::NotInitialized);
}

#[test]
fn test_initial_entries_are_reset_to_defaults() {
    let store = store_with_initial(Snapshot::new().with_state("counter", 41u64));
    assert_eq!(store.state::<u64>("counter"), Some(&0));
}

fn store_with_initial(initial: Snapshot) -> Store {
    let mut store = Store::new();
    store
        .initialize(initial, MiddlewareChain::new(), ReducerSet::new().with(counter()))
        .unwrap();
    store
}

// ============================================================================
// Async completion
// ============================================================================

#[tokio::test]
async fn test_dispatch_handle_resolves_while_ticking_elsewhere() {
    let gate = Gate::new();
    let mut store = store_with(
        MiddlewareChain::new().with(gate.middleware()),
        ReducerSet::new().with(counter()),
    );
    let handle = store.dispatch(Action::new(INCR)).unwrap();

    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(1));
        while !store.is_idle() {
            interval.tick().await;
            if gate.pending() > 0 {
                gate.release_all();
            }
            store.tick().unwrap();
        }
        store
    });

    let action = handle
        .wait_with_timeout(std::time::Duration::from_secs(5))
        .await
        .unwrap();
    assert_completed_ok(&action);

    let store = ticker.await.unwrap();
    assert_eq!(store.state::<u64>("counter"), Some(&1));
}
