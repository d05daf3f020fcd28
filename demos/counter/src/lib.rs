//! # Counter Demo
//!
//! A counter driven by the Flux Store from a tick loop.
//!
//! This demo showcases:
//! - Reducers for two domains (`counter` and `requests`)
//! - A middleware that answers "remote" actions asynchronously, resolving
//!   its continuation from a tokio task while the host keeps ticking
//! - Per-action failures carried inside the finalized action
//!
//! ## Example
//!
//! ```
//! use counter::{store, INCREMENT};
//! use flux_store_core::Action;
//!
//! let mut store = store(None).unwrap();
//! store.dispatch_with(Action::new(INCREMENT), |_| {}).unwrap();
//! while !store.is_idle() {
//!     store.tick().unwrap();
//! }
//! assert_eq!(store.state::<counter::CounterState>("counter").map(|s| s.count), Some(1));
//! ```

use flux_store_core::{
    Action, ActionKind, Middleware, MiddlewareChain, MiddlewareError, Next, Reducer, ReducerSet,
    Snapshot,
};
use flux_store_runtime::{Store, StoreConfig, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Add one
pub const INCREMENT: ActionKind = ActionKind::new(1);
/// Subtract one
pub const DECREMENT: ActionKind = ActionKind::new(2);
/// Back to zero
pub const RESET: ActionKind = ActionKind::new(3);
/// Add the payload's `amount`
pub const ADD: ActionKind = ActionKind::new(4);

/// Payload key read by [`ADD`]
pub const AMOUNT: &str = "amount";

/// Error code recorded when the remote lookup fails
pub const REMOTE_FAILED: i64 = 502;

/// Counter state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterState {
    /// Current count value
    pub count: i64,
}

/// Counter reducer
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterReducer;

impl Reducer for CounterReducer {
    type State = CounterState;

    fn name(&self) -> &str {
        "counter"
    }

    fn default_state(&self) -> CounterState {
        CounterState::default()
    }

    fn reduce(&self, state: &CounterState, action: &Action) -> CounterState {
        // Failed actions leave the count alone
        if action.is_failed() {
            return state.clone();
        }

        let count = match action.kind() {
            INCREMENT => state.count.saturating_add(1),
            DECREMENT => state.count.saturating_sub(1),
            RESET => 0,
            ADD => {
                let amount = action.payload.get_as::<i64>(AMOUNT).ok().flatten().unwrap_or(0);
                state.count.saturating_add(amount)
            },
            _ => state.count,
        };
        CounterState { count }
    }
}

/// Outcome counts for actions that went to the remote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestLog {
    /// Remote actions that completed successfully
    pub succeeded: u64,
    /// Remote actions that completed with an error
    pub failed: u64,
    /// Last error message, if any
    pub last_error: Option<String>,
}

/// Tracks remote action outcomes
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestReducer;

impl Reducer for RequestReducer {
    type State = RequestLog;

    fn name(&self) -> &str {
        "requests"
    }

    fn default_state(&self) -> RequestLog {
        RequestLog::default()
    }

    fn reduce(&self, state: &RequestLog, action: &Action) -> RequestLog {
        if action.request.address.is_none() {
            return state.clone();
        }
        match &action.error {
            None => RequestLog {
                succeeded: state.succeeded + 1,
                ..state.clone()
            },
            Some(error) => RequestLog {
                failed: state.failed + 1,
                last_error: Some(error.message.clone()),
                ..state.clone()
            },
        }
    }
}

/// Answers an address with an amount, or an error message
pub type Responder = Arc<dyn Fn(&str) -> Result<i64, String> + Send + Sync>;

/// Middleware that looks up `amount` for actions carrying a request address
///
/// The lookup runs on a tokio task after a simulated latency; the
/// continuation is resolved from that task. Actions without an address
/// pass straight through.
pub struct RemoteMiddleware {
    runtime: Handle,
    latency: Duration,
    responder: Responder,
}

impl RemoteMiddleware {
    /// Create a middleware that spawns lookups on `runtime`
    #[must_use]
    pub fn new(runtime: Handle, latency: Duration, responder: Responder) -> Self {
        Self {
            runtime,
            latency,
            responder,
        }
    }
}

impl Middleware for RemoteMiddleware {
    fn handle(
        &mut self,
        _snapshot: &Arc<Snapshot>,
        action: Action,
        next: Next,
    ) -> Result<(), MiddlewareError> {
        let Some(address) = action.request.address.clone() else {
            let _ = next.resolve(action);
            return Ok(());
        };

        let latency = self.latency.min(action.request.timeout);
        let responder = Arc::clone(&self.responder);
        self.runtime.spawn(async move {
            tokio::time::sleep(latency).await;

            let mut action = action;
            match responder(&address) {
                Ok(amount) => {
                    tracing::debug!(%address, amount, "Remote lookup succeeded");
                    action.response = Some(amount.to_string());
                    action.payload.insert(AMOUNT, amount);
                },
                Err(message) => {
                    tracing::warn!(%address, %message, "Remote lookup failed");
                    action.fail(REMOTE_FAILED, message);
                },
            }
            if next.resolve(action).is_err() {
                tracing::warn!(%address, "Store stopped waiting for remote lookup");
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "remote"
    }
}

/// Build an initialized counter store
///
/// With `remote`, the chain holds a [`RemoteMiddleware`]; otherwise it is empty.
///
/// # Errors
///
/// Returns the store's setup error.
pub fn store(remote: Option<RemoteMiddleware>) -> Result<Store, StoreError> {
    let middleware = match remote {
        Some(remote) => MiddlewareChain::new().with(remote),
        None => MiddlewareChain::new(),
    };

    let mut store = Store::with_config(
        StoreConfig::default()
            .with_stall_timeout_ticks(600)
            .with_max_queue_len(64),
    );
    store.initialize(
        Snapshot::new(),
        middleware,
        ReducerSet::new().with(CounterReducer).with(RequestReducer),
    )?;
    Ok(store)
}
