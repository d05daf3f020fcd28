//! Middleware: ordered interceptors in front of the reducers.
//!
//! A middleware receives the live snapshot, a copy of the current action and
//! a [`Next`] continuation. It may transform the action, perform side
//! effects and must eventually call [`Next::resolve`] exactly once to let
//! the pipeline continue. Resolving is allowed to happen much later (from
//! another thread or an async task) to model asynchronous work; the store
//! simply keeps the work item parked until then.
//!
//! Dropping a `Next` without resolving it is detected by the work item and
//! finalizes the action with [`ActionError::CONTINUATION_DROPPED`] instead
//! of wedging every queued action behind it.
//!
//! # Example
//!
//! ```
//! use flux_store_core::action::Action;
//! use flux_store_core::middleware::{Middleware, MiddlewareChain, MiddlewareError, Next};
//! use flux_store_core::snapshot::Snapshot;
//! use std::sync::Arc;
//!
//! // Stamp every action before it reaches the reducers
//! let stamp = |_: &Arc<Snapshot>, action: Action, next: Next| -> Result<(), MiddlewareError> {
//!     let _ = next.resolve(action.with_entry("stamped", true));
//!     Ok(())
//! };
//!
//! let chain = MiddlewareChain::new().with(stamp);
//! assert_eq!(chain.len(), 1);
//! ```
//!
//! [`ActionError::CONTINUATION_DROPPED`]: crate::action::ActionError::CONTINUATION_DROPPED

use crate::action::Action;
use crate::snapshot::Snapshot;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Error returned by a middleware that cannot continue
///
/// The store records it on the action (using `code`, or
/// [`ActionError::MIDDLEWARE_FAILED`](crate::action::ActionError::MIDDLEWARE_FAILED)
/// when absent), skips the remaining middleware and finalizes the action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct MiddlewareError {
    /// Optional application error code
    pub code: Option<i64>,
    /// Human readable description
    pub message: String,
}

impl MiddlewareError {
    /// Create an error without a code
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Create an error with an application code
    #[must_use]
    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Single-use continuation handed to a middleware
///
/// `Next` is `Send`, so it can be moved into a worker thread or task that
/// resolves it once the deferred work is done.
#[derive(Debug)]
#[must_use = "dropping Next without resolving it fails the action"]
pub struct Next {
    index: usize,
    sender: oneshot::Sender<Action>,
}

impl Next {
    pub(crate) fn channel(index: usize) -> (Self, oneshot::Receiver<Action>) {
        let (sender, receiver) = oneshot::channel();
        (Self { index, sender }, receiver)
    }

    /// Position of the middleware this continuation belongs to
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Continue the pipeline with `action`
    ///
    /// # Errors
    ///
    /// Hands the action back if the work item stopped waiting (it was
    /// abandoned after a stall timeout or the store was torn down).
    pub fn resolve(self, action: Action) -> Result<(), Action> {
        self.sender.send(action)
    }

    /// Whether the work item has stopped waiting for this continuation
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

/// An interceptor in the dispatch pipeline
pub trait Middleware: Send {
    /// Handle one action
    ///
    /// - `snapshot`: state at invocation time (may be stale by the time
    ///   `next` is resolved; reducers do not run mid-pipeline)
    /// - `action`: the current action, to be forwarded through `next`
    /// - `next`: continuation; resolve it exactly once, now or later
    ///
    /// # Errors
    ///
    /// Returning an error finalizes the action with that error and skips the
    /// rest of the chain. The error wins over `next`: an action already
    /// resolved through `next` before returning `Err` is dropped.
    fn handle(
        &mut self,
        snapshot: &Arc<Snapshot>,
        action: Action,
        next: Next,
    ) -> Result<(), MiddlewareError>;

    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Middleware for F
where
    F: FnMut(&Arc<Snapshot>, Action, Next) -> Result<(), MiddlewareError> + Send,
{
    fn handle(
        &mut self,
        snapshot: &Arc<Snapshot>,
        action: Action,
        next: Next,
    ) -> Result<(), MiddlewareError> {
        self(snapshot, action, next)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Ordered middleware, fixed once handed to the store
#[derive(Default)]
pub struct MiddlewareChain {
    middleware: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.push(middleware);
        self
    }

    /// Append a middleware
    pub fn push<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middleware.push(Box::new(middleware));
    }

    /// Number of middleware
    #[must_use]
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    /// Whether the chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Middleware names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.middleware.iter().map(|m| m.name())
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Middleware + 'static)> {
        self.middleware.get_mut(index).map(Box::as_mut)
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
