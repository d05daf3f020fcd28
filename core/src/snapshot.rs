//! Immutable application state snapshots.
//!
//! A [`Snapshot`] maps domain names to type-erased domain states. The store
//! only ever hands snapshots out behind an `Arc`, so once published a
//! snapshot can no longer be mutated: every completed dispatch produces a
//! brand-new snapshot and swaps the store's pointer.
//!
//! Domain states are any `'static` type that is `Debug + Send + Sync +
//! PartialEq`; the [`DomainState`] capability is implemented for all of them
//! automatically.
//!
//! # Example
//!
//! ```
//! use flux_store_core::snapshot::Snapshot;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Session {
//!     user: Option<String>,
//! }
//!
//! let snapshot = Snapshot::new()
//!     .with_state("counter", 0_i64)
//!     .with_state("session", Session { user: None });
//!
//! assert_eq!(snapshot.get::<i64>("counter"), Some(&0));
//! assert!(snapshot.get::<String>("counter").is_none()); // wrong type
//! assert_eq!(snapshot.len(), 2);
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Capability shared by every domain state stored in a [`Snapshot`]
pub trait DomainState: Any + fmt::Debug + Send + Sync {
    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// Value equality against another type-erased state
    ///
    /// States of different concrete types are never equal.
    fn dyn_eq(&self, other: &dyn DomainState) -> bool;
}

impl<T> DomainState for T
where
    T: Any + fmt::Debug + Send + Sync + PartialEq,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DomainState) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// Full application state at one instant
#[derive(Clone, Default)]
pub struct Snapshot {
    domains: BTreeMap<String, Arc<dyn DomainState>>,
}

impl Snapshot {
    /// Create an empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a domain state, replacing any previous entry
    #[must_use]
    pub fn with_state<T: DomainState>(mut self, domain: impl Into<String>, state: T) -> Self {
        self.insert(domain, state);
        self
    }

    /// Set a domain state, returning the previous entry
    pub fn insert<T: DomainState>(
        &mut self,
        domain: impl Into<String>,
        state: T,
    ) -> Option<Arc<dyn DomainState>> {
        self.insert_shared(domain, Arc::new(state))
    }

    /// Set an already shared domain state, returning the previous entry
    pub fn insert_shared(
        &mut self,
        domain: impl Into<String>,
        state: Arc<dyn DomainState>,
    ) -> Option<Arc<dyn DomainState>> {
        self.domains.insert(domain.into(), state)
    }

    /// Typed access to a domain's state
    ///
    /// Returns `None` if the domain is missing or holds a different type.
    #[must_use]
    pub fn get<T: DomainState>(&self, domain: &str) -> Option<&T> {
        self.domains
            .get(domain)
            .and_then(|state| state.as_ref().as_any().downcast_ref::<T>())
    }

    /// Type-erased access to a domain's state
    #[must_use]
    pub fn get_dyn(&self, domain: &str) -> Option<&Arc<dyn DomainState>> {
        self.domains.get(domain)
    }

    /// Whether the domain has an entry
    #[must_use]
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    /// Number of domains
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Whether there are no domains
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Domain names in order
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    /// Domains whose state differs in value between `self` and `newer`
    ///
    /// A domain present in only one of the two snapshots counts as changed.
    #[must_use]
    pub fn changed_domains<'a>(&'a self, newer: &'a Self) -> Vec<&'a str> {
        let mut changed: Vec<&str> = self
            .domains
            .iter()
            .filter(|(name, old)| {
                newer.domains.get(name.as_str()).is_none_or(|new| {
                    !Arc::ptr_eq(old, new) && !old.as_ref().dyn_eq(new.as_ref())
                })
            })
            .map(|(name, _)| name.as_str())
            .collect();

        changed.extend(
            newer
                .domains
                .keys()
                .filter(|name| !self.domains.contains_key(name.as_str()))
                .map(String::as_str),
        );
        changed.sort_unstable();
        changed
    }

    /// Value equality across every domain
    #[must_use]
    pub fn value_eq(&self, other: &Self) -> bool {
        self.domains.len() == other.domains.len() && self.changed_domains(other).is_empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.domains.iter()).finish()
    }
}
