//! Reducers: pure per-domain state transitions.
//!
//! Each [`Reducer`] owns exactly one domain of the snapshot. It supplies the
//! domain's default state and computes the next state from the previous one
//! and the finalized action:
//!
//! ```text
//! reduce(&previous, &action) -> next
//! ```
//!
//! Reducers must be pure and total. They never mutate `previous` (they only
//! get a shared reference to it) and must not panic; a panicking reducer is
//! a programming error that propagates to the embedding application.
//!
//! The [`ReducerSet`] runs every reducer on every completed dispatch, even
//! those that ignore the action, so each new snapshot is fully derived.

use crate::action::{Action, ActionKind};
use crate::snapshot::{DomainState, Snapshot};
use std::any::type_name;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Structural errors raised while registering or applying reducers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReducerError {
    /// Two reducers claim the same domain
    #[error("Domain '{0}' is registered by more than one reducer")]
    DuplicateDomain(String),

    /// The initial snapshot carries a domain no reducer owns
    #[error("Domain '{0}' has no registered reducer")]
    UnregisteredDomain(String),

    /// A reducer's domain is missing from the previous snapshot
    #[error("Domain '{0}' is missing from the snapshot")]
    MissingDomain(String),

    /// The stored state is not the type the reducer expects
    #[error("Domain '{domain}' does not hold a {expected}")]
    TypeMismatch {
        /// Domain whose state has the wrong type
        domain: String,
        /// Type the reducer expected
        expected: &'static str,
    },
}

/// A pure state transition bound to one domain
///
/// # Example
///
/// ```
/// use flux_store_core::action::{Action, ActionKind};
/// use flux_store_core::reducer::Reducer;
///
/// const INCR: ActionKind = ActionKind::new(1);
///
/// struct CounterReducer;
///
/// impl Reducer for CounterReducer {
///     type State = i64;
///
///     fn name(&self) -> &str {
///         "counter"
///     }
///
///     fn default_state(&self) -> i64 {
///         0
///     }
///
///     fn reduce(&self, state: &i64, action: &Action) -> i64 {
///         if action.kind() == INCR { state + 1 } else { *state }
///     }
/// }
///
/// assert_eq!(CounterReducer.reduce(&0, &Action::new(INCR)), 1);
/// ```
pub trait Reducer: Send {
    /// State type of the domain
    type State: DomainState;

    /// Domain name this reducer owns
    fn name(&self) -> &str;

    /// Initial state of the domain
    fn default_state(&self) -> Self::State;

    /// Compute the next state
    fn reduce(&self, state: &Self::State, action: &Action) -> Self::State;
}

/// Type-erased reducer, implemented for every [`Reducer`]
pub trait AnyReducer: Send {
    /// Domain name this reducer owns
    fn domain(&self) -> &str;

    /// Initial state of the domain
    fn default_dyn(&self) -> Arc<dyn DomainState>;

    /// Compute the next state from a type-erased previous state
    ///
    /// # Errors
    ///
    /// Returns [`ReducerError::TypeMismatch`] if `previous` is not the
    /// reducer's state type.
    fn reduce_dyn(
        &self,
        previous: &dyn DomainState,
        action: &Action,
    ) -> Result<Arc<dyn DomainState>, ReducerError>;
}

impl<R: Reducer> AnyReducer for R {
    fn domain(&self) -> &str {
        self.name()
    }

    fn default_dyn(&self) -> Arc<dyn DomainState> {
        Arc::new(self.default_state())
    }

    fn reduce_dyn(
        &self,
        previous: &dyn DomainState,
        action: &Action,
    ) -> Result<Arc<dyn DomainState>, ReducerError> {
        let previous = previous
            .as_any()
            .downcast_ref::<R::State>()
            .ok_or_else(|| ReducerError::TypeMismatch {
                domain: self.name().to_string(),
                expected: type_name::<R::State>(),
            })?;

        Ok(Arc::new(self.reduce(previous, action)))
    }
}

/// Reducer built from a closure
///
/// ```
/// use flux_store_core::action::Action;
/// use flux_store_core::reducer::{FnReducer, Reducer};
///
/// let reducer = FnReducer::new("log", Vec::<i32>::new(), |log: &Vec<i32>, action: &Action| {
///     let mut next = log.clone();
///     next.push(action.kind().value());
///     next
/// });
///
/// assert_eq!(reducer.reduce(&vec![], &Action::new(4)), vec![4]);
/// ```
pub struct FnReducer<S, F> {
    name: String,
    default: S,
    reduce: F,
}

impl<S, F> FnReducer<S, F>
where
    S: DomainState + Clone,
    F: Fn(&S, &Action) -> S + Send,
{
    /// Create a reducer for `name` with the given default state and transition
    #[must_use]
    pub fn new(name: impl Into<String>, default: S, reduce: F) -> Self {
        Self {
            name: name.into(),
            default,
            reduce,
        }
    }
}

impl<S, F> Reducer for FnReducer<S, F>
where
    S: DomainState + Clone,
    F: Fn(&S, &Action) -> S + Send,
{
    type State = S;

    fn name(&self) -> &str {
        &self.name
    }

    fn default_state(&self) -> S {
        self.default.clone()
    }

    fn reduce(&self, state: &S, action: &Action) -> S {
        (self.reduce)(state, action)
    }
}

/// Reducer that counts actions of one kind
///
/// Useful for wiring checks and demos: the state is the number of completed
/// actions whose kind matched.
#[derive(Debug, Clone)]
pub struct CountingReducer {
    name: String,
    kind: ActionKind,
}

impl CountingReducer {
    /// Count actions of `kind` under domain `name`
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl Reducer for CountingReducer {
    type State = u64;

    fn name(&self) -> &str {
        &self.name
    }

    fn default_state(&self) -> u64 {
        0
    }

    fn reduce(&self, state: &u64, action: &Action) -> u64 {
        if action.kind() == self.kind {
            state.saturating_add(1)
        } else {
            *state
        }
    }
}

/// Ordered set of reducers, one per domain
#[derive(Default)]
pub struct ReducerSet {
    reducers: Vec<Box<dyn AnyReducer>>,
}

impl ReducerSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reducer
    #[must_use]
    pub fn with<R: Reducer + 'static>(mut self, reducer: R) -> Self {
        self.push(reducer);
        self
    }

    /// Add a reducer
    pub fn push<R: Reducer + 'static>(&mut self, reducer: R) {
        self.reducers.push(Box::new(reducer));
    }

    /// Number of reducers
    #[must_use]
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }

    /// Domain names in registration order
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.reducers.iter().map(|r| r.domain())
    }

    /// Reject duplicate domain names
    ///
    /// # Errors
    ///
    /// Returns [`ReducerError::DuplicateDomain`] naming the first repeated domain.
    pub fn validate(&self) -> Result<(), ReducerError> {
        let mut seen = BTreeSet::new();
        for domain in self.domains() {
            if !seen.insert(domain) {
                return Err(ReducerError::DuplicateDomain(domain.to_string()));
            }
        }
        Ok(())
    }

    /// Seed `initial` with every reducer's default state
    ///
    /// Registered domains are overwritten with their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ReducerError::DuplicateDomain`] for a repeated domain and
    /// [`ReducerError::UnregisteredDomain`] if `initial` carries a domain no
    /// reducer owns.
    pub fn seed(&self, mut initial: Snapshot) -> Result<Snapshot, ReducerError> {
        self.validate()?;

        let owned: BTreeSet<&str> = self.domains().collect();
        if let Some(stray) = initial.domains().find(|d| !owned.contains(d)) {
            return Err(ReducerError::UnregisteredDomain(stray.to_string()));
        }

        for reducer in &self.reducers {
            initial.insert_shared(reducer.domain(), reducer.default_dyn());
        }
        Ok(initial)
    }

    /// Run every reducer against `previous` and assemble a new snapshot
    ///
    /// Nothing is returned unless every domain reduced successfully.
    ///
    /// # Errors
    ///
    /// Returns [`ReducerError::MissingDomain`] or
    /// [`ReducerError::TypeMismatch`] if `previous` was not produced by this set.
    pub fn apply(&self, previous: &Snapshot, action: &Action) -> Result<Snapshot, ReducerError> {
        let mut next = Snapshot::new();
        for reducer in &self.reducers {
            let domain = reducer.domain();
            let state = previous
                .get_dyn(domain)
                .ok_or_else(|| ReducerError::MissingDomain(domain.to_string()))?;
            next.insert_shared(domain, reducer.reduce_dyn(state.as_ref(), action)?);
        }
        Ok(next)
    }
}

impl std::fmt::Debug for ReducerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.domains()).finish()
    }
}
