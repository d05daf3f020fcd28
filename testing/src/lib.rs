//! # Flux Store Testing
//!
//! Testing utilities and helpers for the Flux Store.
//!
//! This crate provides:
//! - Scriptable middleware (deferred, recording, failing)
//! - Tick-loop helpers
//! - Property-based testing strategies
//! - Given-When-Then assertions for reducers
//!
//! ## Example
//!
//! ```
//! use flux_store_core::{Action, ActionKind, MiddlewareChain, ReducerSet, Snapshot};
//! use flux_store_core::reducer::CountingReducer;
//! use flux_store_runtime::Store;
//! use flux_store_testing::{Gate, helpers::tick_until_idle};
//!
//! const LOAD: ActionKind = ActionKind::new(1);
//!
//! let gate = Gate::new();
//! let mut store = Store::new();
//! store
//!     .initialize(
//!         Snapshot::new(),
//!         MiddlewareChain::new().with(gate.middleware()),
//!         ReducerSet::new().with(CountingReducer::new("loads", LOAD)),
//!     )
//!     .unwrap();
//!
//! store.dispatch_with(Action::new(LOAD), |_| {}).unwrap();
//! store.tick().unwrap();
//! store.tick().unwrap();
//! assert_eq!(gate.pending(), 1);
//!
//! gate.release_all();
//! tick_until_idle(&mut store, 10);
//! assert_eq!(store.state::<u64>("loads"), Some(&1));
//! ```


/// Scriptable middleware for driving the pipeline from tests
pub mod mocks {
    use flux_store_core::{Action, ActionKind, Middleware, MiddlewareError, Next, Snapshot};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    type Parked = Vec<(Action, Next)>;

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared control over continuations held by a [`DeferredMiddleware`]
    ///
    /// The middleware parks every action it sees; the test decides when
    /// (and with what) each one continues.
    #[derive(Debug, Clone, Default)]
    pub struct Gate {
        parked: Arc<Mutex<Parked>>,
    }

    impl Gate {
        /// Create an empty gate
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A middleware that parks its continuation in this gate
        #[must_use]
        pub fn middleware(&self) -> DeferredMiddleware {
            DeferredMiddleware {
                parked: Arc::clone(&self.parked),
            }
        }

        /// Number of parked continuations
        #[must_use]
        pub fn pending(&self) -> usize {
            lock(&self.parked).len()
        }

        /// Kinds of the parked actions, oldest first
        #[must_use]
        pub fn pending_kinds(&self) -> Vec<ActionKind> {
            lock(&self.parked).iter().map(|(action, _)| action.kind()).collect()
        }

        /// Resolve the oldest parked continuation with its action unchanged
        ///
        /// Returns `false` if nothing was parked or the work item had
        /// already stopped waiting.
        pub fn release_next(&self) -> bool {
            self.release_next_with(|action| action)
        }

        /// Resolve the oldest parked continuation with a transformed action
        pub fn release_next_with<F>(&self, transform: F) -> bool
        where
            F: FnOnce(Action) -> Action,
        {
            let parked = {
                let mut guard = lock(&self.parked);
                if guard.is_empty() { None } else { Some(guard.remove(0)) }
            };
            parked.is_some_and(|(action, next)| next.resolve(transform(action)).is_ok())
        }

        /// Resolve every parked continuation; returns how many were accepted
        pub fn release_all(&self) -> usize {
            let parked = std::mem::take(&mut *lock(&self.parked));
            parked
                .into_iter()
                .map(|(action, next)| next.resolve(action))
                .filter(Result::is_ok)
                .count()
        }

        /// Drop every parked continuation without resolving it
        pub fn abandon_all(&self) -> usize {
            let parked = std::mem::take(&mut *lock(&self.parked));
            parked.len()
        }
    }

    /// Middleware that defers every action until its [`Gate`] releases it
    #[derive(Debug)]
    pub struct DeferredMiddleware {
        parked: Arc<Mutex<Parked>>,
    }

    impl Middleware for DeferredMiddleware {
        fn handle(
            &mut self,
            _snapshot: &Arc<Snapshot>,
            action: Action,
            next: Next,
        ) -> Result<(), MiddlewareError> {
            lock(&self.parked).push((action, next));
            Ok(())
        }

        fn name(&self) -> &str {
            "deferred"
        }
    }

    /// Passes actions straight through and records what it saw
    #[derive(Debug, Clone)]
    pub struct RecordingMiddleware {
        name: String,
        seen: Arc<Mutex<Vec<(String, ActionKind)>>>,
    }

    impl RecordingMiddleware {
        /// Record into `log` under `name`
        ///
        /// Several recorders may share one log to check invocation order.
        #[must_use]
        pub fn new(name: impl Into<String>, log: &CallLog) -> Self {
            Self {
                name: name.into(),
                seen: Arc::clone(&log.entries),
            }
        }
    }

    impl Middleware for RecordingMiddleware {
        fn handle(
            &mut self,
            _snapshot: &Arc<Snapshot>,
            action: Action,
            next: Next,
        ) -> Result<(), MiddlewareError> {
            lock(&self.seen).push((self.name.clone(), action.kind()));
            let _ = next.resolve(action.with_entry(self.name.clone(), true));
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// Invocation log shared by [`RecordingMiddleware`] instances
    #[derive(Debug, Clone, Default)]
    pub struct CallLog {
        entries: Arc<Mutex<Vec<(String, ActionKind)>>>,
    }

    impl CallLog {
        /// Create an empty log
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Middleware names in invocation order
        #[must_use]
        pub fn names(&self) -> Vec<String> {
            lock(&self.entries).iter().map(|(name, _)| name.clone()).collect()
        }

        /// Action kinds in invocation order
        #[must_use]
        pub fn kinds(&self) -> Vec<ActionKind> {
            lock(&self.entries).iter().map(|(_, kind)| *kind).collect()
        }

        /// Number of recorded invocations
        #[must_use]
        pub fn len(&self) -> usize {
            lock(&self.entries).len()
        }

        /// Whether nothing was recorded
        #[must_use]
        pub fn is_empty(&self) -> bool {
            lock(&self.entries).is_empty()
        }
    }

    /// Fails actions of one kind, passes every other action through
    #[derive(Debug, Clone)]
    pub struct FailingMiddleware {
        kind: ActionKind,
        error: MiddlewareError,
    }

    impl FailingMiddleware {
        /// Fail every action of `kind` with `error`
        #[must_use]
        pub const fn new(kind: ActionKind, error: MiddlewareError) -> Self {
            Self { kind, error }
        }
    }

    impl Middleware for FailingMiddleware {
        fn handle(
            &mut self,
            _snapshot: &Arc<Snapshot>,
            action: Action,
            next: Next,
        ) -> Result<(), MiddlewareError> {
            if action.kind() == self.kind {
                return Err(self.error.clone());
            }
            let _ = next.resolve(action);
            Ok(())
        }

        fn name(&self) -> &str {
            "failing"
        }
    }
}

/// Tick-loop helpers
pub mod helpers {
    use flux_store_runtime::{Store, StoreError, TickReport};

    /// Tick `n` times and collect the reports
    ///
    /// # Errors
    ///
    /// Stops at the first tick error.
    pub fn tick_n(store: &mut Store, n: usize) -> Result<Vec<TickReport>, StoreError> {
        (0..n).map(|_| store.tick()).collect()
    }

    /// Tick until the store is idle; returns the number of ticks taken
    ///
    /// # Panics
    ///
    /// Panics if a tick fails or the store is still busy after `max_ticks`.
    #[allow(clippy::panic)] // Test helper
    pub fn tick_until_idle(store: &mut Store, max_ticks: usize) -> usize {
        for taken in 0..max_ticks {
            if store.is_idle() {
                return taken;
            }
            if let Err(error) = store.tick() {
                panic!("tick {taken} failed: {error}");
            }
        }
        assert!(store.is_idle(), "store still busy after {max_ticks} ticks: {store:?}");
        max_ticks
    }

    /// Install a test-friendly tracing subscriber (respects `RUST_LOG`)
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use flux_store_core::{Action, ActionKind, Payload};
    use proptest::prelude::*;
    use serde_json::Value;

    /// Action kinds in a small range so generated sequences collide often
    pub fn action_kind() -> impl Strategy<Value = ActionKind> {
        (0..8i32).prop_map(ActionKind::new)
    }

    /// Payloads with a handful of scalar entries
    pub fn payload() -> impl Strategy<Value = Payload> {
        prop::collection::btree_map(
            "[a-z]{1,6}",
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
                "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
            ],
            0..4,
        )
        .prop_map(Payload::from)
    }

    /// Actions with arbitrary kind and payload
    pub fn action() -> impl Strategy<Value = Action> {
        (action_kind(), payload()).prop_map(|(kind, payload)| Action::with_payload(kind, payload))
    }

    /// Sequences of actions to dispatch
    pub fn actions(max_len: usize) -> impl Strategy<Value = Vec<Action>> {
        prop::collection::vec(action(), 0..=max_len)
    }
}

// Re-export commonly used items
pub use mocks::{CallLog, DeferredMiddleware, FailingMiddleware, Gate, RecordingMiddleware};
pub use reducer_test::ReducerTest;
