//! Work items: the in-flight bookkeeping for one dispatched action.
//!
//! A [`WorkItem`] is an explicit state machine driven by repeated calls to
//! [`WorkItem::advance`]. Each call performs at most one pipeline step:
//!
//! ```text
//!            invoke middleware[i]              next resolved
//! Ready(i) ───────────────────────▶ InMiddleware(i) ─────────▶ Ready(i + 1)
//!    │                                   │
//!    │ i == chain length                 │ error / dropped Next / stall
//!    ▼                                   ▼
//! Reducing ◀─────────────────────────────┘
//!    │ complete()
//!    ▼
//!   Done
//! ```
//!
//! A continuation resolved between two advances is observed at the start of
//! the following advance, which then performs the next step in the same
//! call. A work item therefore never runs more than one middleware, or
//! reaches `Reducing` more than once, per advance.

use crate::action::{Action, ActionError};
use crate::middleware::{MiddlewareChain, Next};
use crate::snapshot::Snapshot;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

/// Completion callback, invoked exactly once with the finalized action
pub type Completion = Box<dyn FnOnce(Action) + Send>;

/// Position of a work item in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Not in progress; the middleware at `index` runs on the next step
    Ready {
        /// Cursor into the middleware chain
        index: usize,
    },
    /// The middleware at `index` has not resolved its continuation yet
    InMiddleware {
        /// Cursor into the middleware chain
        index: usize,
        /// Advances spent waiting so far
        waited: u64,
    },
    /// Middleware chain exhausted; ready for reduction
    Reducing,
    /// Completion delivered
    Done,
}

/// Outcome of one [`WorkItem::advance`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The middleware at `index` was invoked
    Invoked {
        /// Position of the invoked middleware
        index: usize,
    },
    /// The middleware at `index` is still working
    Waiting {
        /// Position of the waiting middleware
        index: usize,
        /// Advances spent waiting so far
        waited: u64,
    },
    /// The middleware at `index` failed; the rest of the chain is skipped
    Failed {
        /// Position of the failing middleware
        index: usize,
        /// Error recorded on the action
        error: ActionError,
    },
    /// The chain is exhausted; the action is ready for reduction
    Exhausted,
}

/// In-flight record for one dispatched action
pub struct WorkItem {
    id: u64,
    action: Action,
    stage: Stage,
    pending: Option<oneshot::Receiver<Action>>,
    completion: Option<Completion>,
    advances: u64,
}

impl WorkItem {
    /// Wrap `action` for the pipeline
    ///
    /// A previously completed action starts a fresh lifecycle.
    #[must_use]
    pub fn new(id: u64, mut action: Action, completion: Option<Completion>) -> Self {
        action.reset_completion();
        Self {
            id,
            action,
            stage: Stage::Ready { index: 0 },
            pending: None,
            completion,
            advances: 0,
        }
    }

    /// Dispatch sequence number
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Current action value
    #[must_use]
    pub const fn action(&self) -> &Action {
        &self.action
    }

    /// Current stage
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Number of advances performed so far
    #[must_use]
    pub const fn advances(&self) -> u64 {
        self.advances
    }

    /// Whether a middleware holds the continuation
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self.stage, Stage::InMiddleware { .. })
    }

    /// Perform at most one pipeline step
    ///
    /// `stall_limit` bounds how many advances a middleware may keep the
    /// continuation before the action is abandoned with
    /// [`ActionError::STALLED`]; `None` waits forever.
    pub fn advance(
        &mut self,
        chain: &mut MiddlewareChain,
        snapshot: &Arc<Snapshot>,
        stall_limit: Option<u64>,
    ) -> Advance {
        self.advances += 1;

        if let Stage::InMiddleware { index, waited } = self.stage {
            match self.pending.as_mut().map(oneshot::Receiver::try_recv) {
                Some(Ok(action)) => {
                    self.pending = None;
                    self.action = action;
                    self.action.reset_completion();
                    self.stage = Stage::Ready { index: index + 1 };
                },
                Some(Err(TryRecvError::Empty)) => {
                    let waited = waited + 1;
                    if stall_limit.is_some_and(|limit| waited > limit) {
                        return self.abandon(
                            index,
                            ActionError::new(
                                ActionError::STALLED,
                                format!("middleware {index} did not continue within {waited} ticks"),
                            ),
                        );
                    }
                    self.stage = Stage::InMiddleware { index, waited };
                    return Advance::Waiting { index, waited };
                },
                Some(Err(TryRecvError::Closed)) | None => {
                    return self.abandon(
                        index,
                        ActionError::new(
                            ActionError::CONTINUATION_DROPPED,
                            format!("middleware {index} dropped its continuation"),
                        ),
                    );
                },
            }
        }

        match self.stage {
            Stage::Ready { index } if index >= chain.len() => {
                self.stage = Stage::Reducing;
                Advance::Exhausted
            },
            Stage::Ready { index } => self.invoke(chain, snapshot, index),
            Stage::InMiddleware { index, waited } => Advance::Waiting { index, waited },
            Stage::Reducing | Stage::Done => Advance::Exhausted,
        }
    }

    fn invoke(&mut self, chain: &mut MiddlewareChain, snapshot: &Arc<Snapshot>, index: usize) -> Advance {
        let Some(middleware) = chain.get_mut(index) else {
            self.stage = Stage::Reducing;
            return Advance::Exhausted;
        };

        let (next, receiver) = Next::channel(index);
        match middleware.handle(snapshot, self.action.clone(), next) {
            Ok(()) => {
                self.pending = Some(receiver);
                self.stage = Stage::InMiddleware { index, waited: 0 };
                Advance::Invoked { index }
            },
            Err(err) => {
                // Anything already sent through `next` is dropped with the receiver
                let code = err.code.unwrap_or(ActionError::MIDDLEWARE_FAILED);
                self.abandon(index, ActionError::new(code, err.message))
            },
        }
    }

    fn abandon(&mut self, index: usize, error: ActionError) -> Advance {
        self.pending = None;
        self.action.error = Some(error.clone());
        self.stage = Stage::Reducing;
        Advance::Failed { index, error }
    }

    /// Mark the action completed and deliver it to the completion callback
    ///
    /// Consumes the work item, so completion happens exactly once.
    pub fn complete(mut self) {
        self.action.mark_completed();
        self.stage = Stage::Done;
        if let Some(completion) = self.completion.take() {
            completion(self.action);
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("kind", &self.action.kind())
            .field("stage", &self.stage)
            .field("advances", &self.advances)
            .finish_non_exhaustive()
    }
}
