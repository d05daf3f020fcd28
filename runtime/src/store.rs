//! The Store: dispatch queue, pipeline scheduler and snapshot owner.
//!
//! All pipeline progress happens inside [`Store::tick`], which the embedding
//! application calls once per scheduler pulse. Each tick performs at most
//! one step for the current work item (run the next middleware, or reduce
//! and finalize) and then, if nothing is current, dequeues the next item.
//! A freshly dequeued item therefore makes no progress until the following
//! tick.
//!
//! The store never spawns threads or blocks. A middleware that has not
//! resolved its continuation simply leaves the current work item parked;
//! later dispatches wait behind it in FIFO order.

use crate::error::StoreError;
use crate::metrics::StoreMetrics;
use crate::{DispatchHandle, HealthCheck, StoreConfig};
use flux_store_core::{
    Action, ActionError, ActionKind, Advance, Completion, DomainState, MiddlewareChain,
    ReducerSet, Snapshot, Stage, WorkItem,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Change observer, called with `(old, new)` after every snapshot swap
type Observer = Box<dyn FnMut(&Arc<Snapshot>, &Arc<Snapshot>) + Send>;

/// Identifies a registered change observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// What the current work item did during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// No work item was current
    Idle,
    /// The middleware at `index` was invoked
    Invoked {
        /// Work item id
        id: u64,
        /// Middleware position
        index: usize,
    },
    /// The middleware at `index` is still working
    Waiting {
        /// Work item id
        id: u64,
        /// Middleware position
        index: usize,
        /// Ticks spent waiting so far
        waited: u64,
    },
    /// The middleware at `index` failed; the action will be finalized next tick
    Failed {
        /// Work item id
        id: u64,
        /// Middleware position
        index: usize,
        /// Error recorded on the action
        error: ActionError,
    },
    /// Reducers ran, the snapshot was swapped and the completion delivered
    Completed {
        /// Work item id
        id: u64,
        /// Kind of the completed action
        kind: ActionKind,
    },
}

/// Outcome of one [`Store::tick`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Progress made by the work item that was current at the start of the tick
    pub progress: Progress,
    /// Id of the work item dequeued at the end of the tick, if any
    pub dequeued: Option<u64>,
}

impl TickReport {
    /// Id of the work item completed during this tick
    #[must_use]
    pub const fn completed(&self) -> Option<u64> {
        match self.progress {
            Progress::Completed { id, .. } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Running,
    TornDown,
}

/// Tick-driven action-dispatch state store
///
/// The store is an explicitly constructed value: pass it (or a reference to
/// it) to whatever needs to dispatch or read state.
///
/// # Example
///
/// ```
/// use flux_store_core::{Action, ActionKind, MiddlewareChain, ReducerSet, Snapshot};
/// use flux_store_core::reducer::CountingReducer;
/// use flux_store_runtime::Store;
///
/// const PING: ActionKind = ActionKind::new(1);
///
/// let mut store = Store::new();
/// store
///     .initialize(
///         Snapshot::new(),
///         MiddlewareChain::new(),
///         ReducerSet::new().with(CountingReducer::new("pings", PING)),
///     )
///     .unwrap();
///
/// store.subscribe(|old, new| {
///     println!("changed: {:?}", old.changed_domains(new));
/// });
///
/// store.dispatch_with(Action::new(PING), |action| assert!(action.is_completed())).unwrap();
/// while !store.is_idle() {
///     store.tick().unwrap();
/// }
/// assert_eq!(store.state::<u64>("pings"), Some(&1));
/// ```
pub struct Store {
    config: StoreConfig,
    lifecycle: Lifecycle,
    snapshot: Arc<Snapshot>,
    reducers: ReducerSet,
    middleware: MiddlewareChain,
    queue: VecDeque<WorkItem>,
    current: Option<WorkItem>,
    observers: Vec<(SubscriptionId, Observer)>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    next_work_id: u64,
    next_subscription: u64,
}

impl Store {
    /// Create an uninitialized store with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an uninitialized store with a custom configuration
    #[must_use]
    pub fn with_config(config: StoreConfig) -> Self {
        let snapshot = Arc::new(Snapshot::new());
        let (snapshot_tx, _) = watch::channel(Arc::clone(&snapshot));

        Self {
            config,
            lifecycle: Lifecycle::Uninitialized,
            snapshot,
            reducers: ReducerSet::new(),
            middleware: MiddlewareChain::new(),
            queue: VecDeque::new(),
            current: None,
            observers: Vec::new(),
            snapshot_tx,
            next_work_id: 1,
            next_subscription: 1,
        }
    }

    /// One-time setup
    ///
    /// Seeds `initial` with every reducer's default state and fixes the
    /// middleware chain and reducer set for the store's lifetime.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyInitialized`] on a second call
    /// - [`StoreError::TornDown`] after [`teardown`](Self::teardown)
    /// - [`StoreError::Reducer`] for duplicate domains, or an initial entry
    ///   no reducer owns
    pub fn initialize(
        &mut self,
        initial: Snapshot,
        middleware: MiddlewareChain,
        reducers: ReducerSet,
    ) -> Result<(), StoreError> {
        match self.lifecycle {
            Lifecycle::Uninitialized => {},
            Lifecycle::Running => return Err(StoreError::AlreadyInitialized),
            Lifecycle::TornDown => return Err(StoreError::TornDown),
        }

        let seeded = Arc::new(reducers.seed(initial)?);
        tracing::info!(
            domains = ?reducers,
            middleware = ?middleware,
            "Store initialized"
        );

        self.snapshot = Arc::clone(&seeded);
        self.snapshot_tx.send_replace(seeded);
        self.reducers = reducers;
        self.middleware = middleware;
        self.lifecycle = Lifecycle::Running;
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) has succeeded and the store is not torn down
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// The store's configuration
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Enqueue an action and get a handle to its completion
    ///
    /// Never runs anything synchronously; progress happens in [`tick`](Self::tick).
    ///
    /// # Errors
    ///
    /// Rejects the action with [`StoreError::NotInitialized`],
    /// [`StoreError::TornDown`] or [`StoreError::QueueFull`].
    pub fn dispatch(&mut self, action: Action) -> Result<DispatchHandle, StoreError> {
        self.ensure_running()?;
        self.ensure_capacity()?;

        let (handle, complete) = DispatchHandle::new(self.next_work_id);
        self.enqueue(action, Some(Box::new(complete)));
        Ok(handle)
    }

    /// Enqueue an action with a completion callback
    ///
    /// `on_done` is invoked exactly once, from inside [`tick`](Self::tick),
    /// with the finalized action. It is never invoked if the work item is
    /// discarded by [`clean_queue`](Self::clean_queue) or
    /// [`teardown`](Self::teardown).
    ///
    /// Returns the work item's id.
    ///
    /// # Errors
    ///
    /// Same rejections as [`dispatch`](Self::dispatch).
    pub fn dispatch_with<F>(&mut self, action: Action, on_done: F) -> Result<u64, StoreError>
    where
        F: FnOnce(Action) + Send + 'static,
    {
        self.ensure_running()?;
        self.ensure_capacity()?;
        Ok(self.enqueue(action, Some(Box::new(on_done))))
    }

    fn enqueue(&mut self, action: Action, completion: Option<Completion>) -> u64 {
        let id = self.next_work_id;
        self.next_work_id += 1;

        tracing::debug!(id, kind = %action.kind(), queued = self.queue.len(), "Action dispatched");
        self.queue.push_back(WorkItem::new(id, action, completion));
        StoreMetrics::record_dispatch(self.queue.len());
        id
    }

    const fn lifecycle_error(&self) -> Option<StoreError> {
        match self.lifecycle {
            Lifecycle::Running => None,
            Lifecycle::Uninitialized => Some(StoreError::NotInitialized),
            Lifecycle::TornDown => Some(StoreError::TornDown),
        }
    }

    fn ensure_running(&self) -> Result<(), StoreError> {
        match self.lifecycle_error() {
            None => Ok(()),
            Some(rejection) => {
                tracing::warn!(error = %rejection, "Rejected dispatch");
                StoreMetrics::record_rejection();
                Err(rejection)
            },
        }
    }

    const fn is_stalled(&self, waited: u64) -> bool {
        waited > 0 && waited >= self.config.stall_warning_ticks
    }

    fn ensure_capacity(&self) -> Result<(), StoreError> {
        let pending = self.queue.len();
        if self.config.max_queue_len.is_some_and(|max| pending >= max) {
            tracing::warn!(pending, "Rejected dispatch: queue is full");
            StoreMetrics::record_rejection();
            return Err(StoreError::QueueFull(pending));
        }
        Ok(())
    }

    /// Advance the pipeline by one step
    ///
    /// 1. If a work item is current, either run its next middleware or, once
    ///    the chain is exhausted, run every reducer, swap the snapshot,
    ///    complete the action and notify observers.
    /// 2. If nothing is current afterwards, dequeue the next work item. It
    ///    receives no progress until the following tick.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotInitialized`] / [`StoreError::TornDown`]
    /// - [`StoreError::Reducer`] if the snapshot could not be assembled; the
    ///   current snapshot is left untouched and the work item stays current
    ///
    /// # Panics
    ///
    /// A panicking reducer, middleware or observer propagates to the caller.
    #[tracing::instrument(skip(self), name = "store_tick", level = "trace")]
    pub fn tick(&mut self) -> Result<TickReport, StoreError> {
        // Hosts may pulse every frame before setup or after teardown
        if let Some(rejection) = self.lifecycle_error() {
            tracing::trace!(error = %rejection, "Tick ignored");
            return Err(rejection);
        }

        let progress = match self.current.take() {
            None => Progress::Idle,
            Some(mut work) => {
                let advance = work.advance(
                    &mut self.middleware,
                    &self.snapshot,
                    self.config.stall_timeout_ticks,
                );
                self.on_advance(work, advance)?
            },
        };

        let dequeued = if self.current.is_none() {
            self.current = self.queue.pop_front();
            self.current.as_ref().map(|work| {
                tracing::debug!(id = work.id(), kind = %work.action().kind(), "Work item started");
                work.id()
            })
        } else {
            None
        };
        StoreMetrics::record_queue_depth(self.queue.len());

        Ok(TickReport { progress, dequeued })
    }

    fn on_advance(&mut self, work: WorkItem, advance: Advance) -> Result<Progress, StoreError> {
        let id = work.id();
        let progress = match advance {
            Advance::Exhausted => {
                let kind = self.finalize(work)?;
                return Ok(Progress::Completed { id, kind });
            },
            Advance::Invoked { index } => {
                tracing::debug!(id, index, "Middleware invoked");
                StoreMetrics::record_middleware_invocation();
                Progress::Invoked { id, index }
            },
            Advance::Waiting { index, waited } => {
                tracing::trace!(id, index, waited, "Middleware still working");
                if waited == self.config.stall_warning_ticks.max(1) {
                    tracing::warn!(id, index, waited, "Middleware has not continued; queue is blocked");
                }
                Progress::Waiting { id, index, waited }
            },
            Advance::Failed { index, error } => {
                if error.code == ActionError::STALLED {
                    StoreMetrics::record_stall();
                }
                tracing::warn!(id, index, error = %error, "Middleware failed; skipping rest of chain");
                Progress::Failed { id, index, error }
            },
        };
        self.current = Some(work);
        Ok(progress)
    }

    fn finalize(&mut self, work: WorkItem) -> Result<ActionKind, StoreError> {
        let started = Instant::now();
        let next = match self.reducers.apply(&self.snapshot, work.action()) {
            Ok(next) => Arc::new(next),
            Err(error) => {
                // The item stays current so a later tick can retry the reduction
                self.current = Some(work);
                return Err(error.into());
            },
        };
        StoreMetrics::record_reduction(started.elapsed());

        let follow_up = if self.config.chain_follow_ups {
            work.action().follow_up.as_deref().cloned()
        } else {
            None
        };
        let (id, kind, failed, advances) = (
            work.id(),
            work.action().kind(),
            work.action().is_failed(),
            work.advances(),
        );

        let old = std::mem::replace(&mut self.snapshot, Arc::clone(&next));
        self.snapshot_tx.send_replace(Arc::clone(&next));

        work.complete();
        tracing::debug!(id, kind = %kind, failed, ticks = advances, "Action completed");
        StoreMetrics::record_completion(failed, advances);

        for (_, observer) in &mut self.observers {
            observer(&old, &next);
        }

        if let Some(follow_up) = follow_up {
            if let Err(error) = self.ensure_capacity() {
                tracing::warn!(id, error = %error, "Dropped follow-up action");
            } else {
                tracing::debug!(id, kind = %follow_up.kind(), "Chaining follow-up action");
                self.enqueue(follow_up, None);
            }
        }

        Ok(kind)
    }

    /// Discard every queued (not yet started) work item
    ///
    /// The current work item is unaffected and still completes. Handles of
    /// discarded items resolve to [`StoreError::Discarded`]; callbacks never fire.
    ///
    /// Returns the number of discarded items.
    pub fn clean_queue(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        if discarded > 0 {
            tracing::debug!(discarded, "Queue cleaned");
        }
        StoreMetrics::record_discarded(discarded);
        StoreMetrics::record_queue_depth(0);
        discarded
    }

    /// Tear the store down
    ///
    /// Discards the queue and the current work item and drops all
    /// observers. Afterwards every dispatch, tick and initialize is
    /// rejected with [`StoreError::TornDown`]. The last snapshot stays
    /// readable.
    ///
    /// Returns the number of discarded work items.
    pub fn teardown(&mut self) -> usize {
        let discarded = self.queue.len() + usize::from(self.current.is_some());
        self.queue.clear();
        self.current = None;
        self.observers.clear();
        self.lifecycle = Lifecycle::TornDown;

        tracing::info!(discarded, "Store torn down");
        StoreMetrics::record_discarded(discarded);
        StoreMetrics::record_queue_depth(0);
        discarded
    }

    /// True iff no work item is current and the queue is empty
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    /// Number of queued (not yet started) work items
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Id of the current work item
    #[must_use]
    pub fn current_id(&self) -> Option<u64> {
        self.current.as_ref().map(WorkItem::id)
    }

    /// Stage of the current work item
    #[must_use]
    pub fn current_stage(&self) -> Option<Stage> {
        self.current.as_ref().map(WorkItem::stage)
    }

    /// The live snapshot
    ///
    /// The returned snapshot never changes; later dispatches replace the
    /// store's pointer instead.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Typed access to one domain of the live snapshot
    #[must_use]
    pub fn state<T: DomainState>(&self, domain: &str) -> Option<&T> {
        self.snapshot.get(domain)
    }

    /// Type-erased access to one domain of the live snapshot
    #[must_use]
    pub fn get_state(&self, domain: &str) -> Option<Arc<dyn DomainState>> {
        self.snapshot.get_dyn(domain).cloned()
    }

    /// Receiver that always holds the latest snapshot
    ///
    /// Useful for readers living on other tasks or threads.
    #[must_use]
    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Register a change observer
    ///
    /// Observers run synchronously inside [`tick`](Self::tick), in
    /// registration order, right after each snapshot swap.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&Arc<Snapshot>, &Arc<Snapshot>) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove a change observer; returns whether it was registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(registered, _)| *registered != id);
        self.observers.len() != before
    }

    /// Perform a health check on the Store
    ///
    /// - unhealthy when torn down or the queue bound is reached
    /// - degraded while the current middleware has waited beyond
    ///   `stall_warning_ticks`, or the queue is above half its bound
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let queued = self.queue.len();
        let waited = match self.current_stage() {
            Some(Stage::InMiddleware { waited, .. }) => waited,
            _ => 0,
        };

        let check = if self.lifecycle == Lifecycle::TornDown {
            HealthCheck::unhealthy("store", "Store has been torn down")
        } else if self.config.max_queue_len.is_some_and(|max| queued >= max) {
            HealthCheck::unhealthy("store", "Dispatch queue is full")
        } else if self.is_stalled(waited) {
            HealthCheck::degraded("store", format!("Middleware has been waiting for {waited} ticks"))
        } else if self.config.max_queue_len.is_some_and(|max| queued * 2 > max) {
            HealthCheck::degraded("store", format!("Dispatch queue holds {queued} items"))
        } else {
            HealthCheck::healthy("store")
        };

        check
            .with_metadata("queued", queued.to_string())
            .with_metadata("waiting_ticks", waited.to_string())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("lifecycle", &self.lifecycle)
            .field("snapshot", &self.snapshot)
            .field("current", &self.current)
            .field("queued", &self.queue.len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
