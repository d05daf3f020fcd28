//! # Flux Store Core
//!
//! Core types for the Flux Store, a tick-driven action-dispatch state
//! container.
//!
//! This crate provides the data model and the per-action state machine; the
//! `flux-store-runtime` crate drives them from the host's update loop.
//!
//! ## Core Concepts
//!
//! - **Action**: a request to change state (kind, payload, request attributes, result)
//! - **Snapshot**: the full, immutable application state at one instant
//! - **Reducer**: pure function `(&DomainState, &Action) → DomainState`, one per domain
//! - **Middleware**: interceptor `(snapshot, action, next)` that may defer `next`
//! - **Work Item**: the in-flight bookkeeping for one dispatched action
//!
//! ## Architecture Principles
//!
//! - Single-threaded, cooperative progress: one pipeline step per tick
//! - Immutable snapshots shared by `Arc`, replaced atomically
//! - Explicit continuation values instead of captured callbacks
//! - Composition over inheritance: payload and snapshot are named containers
//!
//! ## Example
//!
//! ```
//! use flux_store_core::{Action, ActionKind, MiddlewareChain, ReducerSet, Snapshot, WorkItem};
//! use flux_store_core::reducer::CountingReducer;
//! use flux_store_core::work::Advance;
//! use std::sync::Arc;
//!
//! const INCR: ActionKind = ActionKind::new(1);
//!
//! let reducers = ReducerSet::new().with(CountingReducer::new("counter", INCR));
//! let snapshot = Arc::new(reducers.seed(Snapshot::new()).unwrap());
//! let mut chain = MiddlewareChain::new();
//!
//! let mut work = WorkItem::new(1, Action::new(INCR), None);
//! assert_eq!(work.advance(&mut chain, &snapshot, None), Advance::Exhausted);
//!
//! let next = reducers.apply(&snapshot, work.action()).unwrap();
//! assert_eq!(next.get::<u64>("counter"), Some(&1));
//! ```

pub mod action;
pub mod middleware;
pub mod reducer;
pub mod snapshot;
pub mod work;

// Re-export commonly used types
pub use action::{Action, ActionError, ActionKind, ContentEncoding, Payload, RequestAttributes};
pub use middleware::{Middleware, MiddlewareChain, MiddlewareError, Next};
pub use reducer::{AnyReducer, FnReducer, Reducer, ReducerError, ReducerSet};
pub use snapshot::{DomainState, Snapshot};
pub use work::{Advance, Completion, Stage, WorkItem};
