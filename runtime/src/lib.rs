//! # Flux Store Runtime
//!
//! Runtime implementation of the Flux Store.
//!
//! This crate provides the [`Store`](store::Store): the orchestrator that owns
//! the current snapshot, the reducer set, the middleware chain and a FIFO
//! queue of pending work items, and advances them one step per tick.
//!
//! ## Core Components
//!
//! - **Store**: dispatch queue, pipeline scheduler and atomic snapshot swaps
//! - **`DispatchHandle`**: single-resolution completion handle for a dispatch
//! - **`StoreConfig`**: stall policy, queue bound and follow-up chaining
//! - **Health & metrics**: `HealthCheck` reporting and Prometheus metrics
//!
//! ## Example
//!
//! ```
//! use flux_store_core::{Action, ActionKind, MiddlewareChain, ReducerSet, Snapshot};
//! use flux_store_core::reducer::CountingReducer;
//! use flux_store_runtime::Store;
//!
//! const INCR: ActionKind = ActionKind::new(1);
//!
//! let mut store = Store::new();
//! store
//!     .initialize(
//!         Snapshot::new(),
//!         MiddlewareChain::new(),
//!         ReducerSet::new().with(CountingReducer::new("counter", INCR)),
//!     )
//!     .unwrap();
//!
//! let mut handle = store.dispatch(Action::new(INCR)).unwrap();
//! store.tick().unwrap(); // dequeue
//! store.tick().unwrap(); // chain exhausted: reduce, swap, complete
//!
//! let action = handle.try_take().unwrap().unwrap();
//! assert!(action.is_completed());
//! assert_eq!(store.state::<u64>("counter"), Some(&1));
//! ```

use flux_store_core::Action;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Store orchestration
pub mod store;

/// Prometheus metrics for observability
pub mod metrics;

pub use error::StoreError;
pub use store::{Progress, Store, SubscriptionId, TickReport};

/// Error types for the Store runtime
pub mod error {
    use flux_store_core::ReducerError;
    use thiserror::Error;

    /// Structural errors surfaced to the embedding application
    ///
    /// Per-action failures never show up here; they travel inside the
    /// finalized action's `error` field.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// `dispatch` or `tick` was called before `initialize`
        #[error("Store is not initialized")]
        NotInitialized,

        /// `initialize` was called a second time
        #[error("Store is already initialized")]
        AlreadyInitialized,

        /// The reducer set is malformed, or could not assemble a snapshot
        #[error("Reducer failure: {0}")]
        Reducer(#[from] ReducerError),

        /// The store has been torn down and accepts no more work
        #[error("Store has been torn down")]
        TornDown,

        /// The configured queue bound was reached
        #[error("Dispatch queue is full ({0} pending)")]
        QueueFull(usize),

        /// The work item was dropped by `clean_queue` or `teardown`
        #[error("Work item was discarded before completing")]
        Discarded,

        /// The finalized action was already taken from this handle
        #[error("Completed action was already taken")]
        AlreadyTaken,

        /// Waiting for completion timed out
        #[error("Timeout waiting for completion")]
        Timeout,
    }
}

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Store is fully operational
    Healthy,

    /// Store is operational but a middleware is slow or the queue is backing up
    Degraded,

    /// Store accepts no more work
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Check if status is unhealthy
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Optional metadata (queue depth, waiting ticks, ...)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Configuration for Store instances
///
/// The defaults match the baseline contract: no stall timeout, an unbounded
/// queue and no follow-up chaining.
///
/// # Example
///
/// ```
/// use flux_store_runtime::{Store, StoreConfig};
///
/// let config = StoreConfig::default()
///     .with_stall_timeout_ticks(600)
///     .with_max_queue_len(256);
///
/// let store = Store::with_config(config);
/// assert!(!store.is_initialized());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Ticks a middleware may hold its continuation before the action is
    /// abandoned with the stall error code (`None` waits forever)
    pub stall_timeout_ticks: Option<u64>,
    /// Ticks of waiting after which the store logs a warning and reports degraded health
    pub stall_warning_ticks: u64,
    /// Maximum number of queued (not yet started) work items
    pub max_queue_len: Option<usize>,
    /// Enqueue a completed action's `follow_up` automatically
    pub chain_follow_ups: bool,
}

impl StoreConfig {
    /// Abandon middleware that wait longer than `ticks`
    #[must_use]
    pub const fn with_stall_timeout_ticks(mut self, ticks: u64) -> Self {
        self.stall_timeout_ticks = Some(ticks);
        self
    }

    /// Set the stall warning threshold
    #[must_use]
    pub const fn with_stall_warning_ticks(mut self, ticks: u64) -> Self {
        self.stall_warning_ticks = ticks;
        self
    }

    /// Bound the dispatch queue
    #[must_use]
    pub const fn with_max_queue_len(mut self, max_len: usize) -> Self {
        self.max_queue_len = Some(max_len);
        self
    }

    /// Enable or disable follow-up chaining
    #[must_use]
    pub const fn with_chain_follow_ups(mut self, enabled: bool) -> Self {
        self.chain_follow_ups = enabled;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            stall_timeout_ticks: None,
            stall_warning_ticks: 300,
            max_queue_len: None,
            chain_follow_ups: false,
        }
    }
}

/// Handle for one dispatch's completion
///
/// Returned by [`Store::dispatch`](store::Store::dispatch). Tick-driven hosts
/// poll it with [`try_take`](Self::try_take); async callers can `.await` it.
///
/// # Example
///
/// ```ignore
/// let handle = store.dispatch(Action::new(LOAD))?;
/// // ... the host keeps calling store.tick() elsewhere ...
/// let action = handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// ```
#[derive(Debug)]
#[must_use = "dropping the handle does not cancel the dispatch"]
pub struct DispatchHandle {
    id: u64,
    receiver: Option<oneshot::Receiver<Action>>,
}

impl DispatchHandle {
    pub(crate) fn new(id: u64) -> (Self, impl FnOnce(Action) + Send + 'static) {
        let (sender, receiver) = oneshot::channel();
        let complete = move |action: Action| {
            // The caller may have dropped the handle; that is fine.
            let _ = sender.send(action);
        };
        (
            Self {
                id,
                receiver: Some(receiver),
            },
            complete,
        )
    }

    /// Dispatch sequence number of the work item
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Take the finalized action if the dispatch has completed
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Discarded`] if the work item was dropped before
    /// completing, and [`StoreError::AlreadyTaken`] once the action has been
    /// handed out.
    pub fn try_take(&mut self) -> Result<Option<Action>, StoreError> {
        let receiver = self.receiver.as_mut().ok_or(StoreError::AlreadyTaken)?;
        match receiver.try_recv() {
            Ok(action) => {
                self.receiver = None;
                Ok(Some(action))
            },
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(StoreError::Discarded),
        }
    }

    /// Whether the finalized action has already been taken
    #[must_use]
    pub const fn is_taken(&self) -> bool {
        self.receiver.is_none()
    }

    /// Wait for completion, up to `timeout`
    ///
    /// Something else must keep ticking the store meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] when the timeout elapses and
    /// [`StoreError::Discarded`] if the work item was dropped.
    pub async fn wait_with_timeout(self, timeout: Duration) -> Result<Action, StoreError> {
        tokio::time::timeout(timeout, self)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

impl Future for DispatchHandle {
    type Output = Result<Action, StoreError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(Err(StoreError::AlreadyTaken));
        };
        let result = std::task::ready!(Pin::new(receiver).poll(cx));
        if result.is_ok() {
            self.receiver = None;
        }
        Poll::Ready(result.map_err(|_| StoreError::Discarded))
    }
}
