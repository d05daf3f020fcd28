//! Actions: requests to change state.
//!
//! An [`Action`] carries three groups of data:
//!
//! - an immutable [`ActionKind`] discriminant, fixed at construction
//! - a [`Payload`] of arbitrary key/value data that middleware and reducers
//!   may read and write
//! - optional [`RequestAttributes`] that only network-capable middleware
//!   interprets, plus result fields populated as the action moves through
//!   the pipeline
//!
//! The `completed` flag is private. It flips from `false` to `true` exactly
//! once, when the owning work item finishes the pipeline.
//!
//! # Example
//!
//! ```
//! use flux_store_core::action::{Action, ActionKind, ContentEncoding};
//!
//! const LOGIN: ActionKind = ActionKind::new(7);
//!
//! let action = Action::new(LOGIN)
//!     .with_entry("user", "ada")
//!     .with_address("https://example.invalid/login")
//!     .with_encoding(ContentEncoding::Json)
//!     .with_auth(true);
//!
//! assert_eq!(action.kind(), LOGIN);
//! assert!(!action.is_completed());
//! assert_eq!(action.payload.get("user").and_then(|v| v.as_str()), Some("ada"));
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Default request timeout carried by every new action.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Integer discriminant identifying an action's semantic type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionKind(i32);

impl ActionKind {
    /// Create a kind from its raw discriminant
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Raw discriminant value
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl From<i32> for ActionKind {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered key/value data attached to an action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    /// Create an empty payload
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Raw value stored under `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deserialize the value stored under `key`
    ///
    /// Returns `Ok(None)` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error when the stored value does not
    /// have the shape of `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.0
            .get(key)
            .map(|value| T::deserialize(value))
            .transpose()
    }

    /// Insert a value, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether `key` is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl From<BTreeMap<String, Value>> for Payload {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// How a network-capable middleware should encode the request body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentEncoding {
    /// Form encoding
    #[default]
    Default,
    /// JSON body
    Json,
    /// JSON body sent with PUT
    Put,
    /// DELETE request
    Delete,
}

/// Request attributes consumed only by specific middleware
///
/// The store never looks at these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAttributes {
    /// Target address of the request
    pub address: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Content encoding mode
    pub encoding: ContentEncoding,
    /// Whether to attach the session's credentials
    pub include_auth: bool,
    /// Whether the request is a POST
    pub is_post: bool,
    /// Raw request body
    pub body: Option<String>,
}

impl Default for RequestAttributes {
    fn default() -> Self {
        Self {
            address: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            encoding: ContentEncoding::Default,
            include_auth: false,
            is_post: false,
            body: None,
        }
    }
}

/// Per-action failure carried in the action's result fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionError {
    /// Error code (application-defined, or one of the reserved codes below)
    pub code: i64,
    /// Human readable description
    pub message: String,
}

impl ActionError {
    /// A middleware returned an error instead of continuing
    pub const MIDDLEWARE_FAILED: i64 = -1;
    /// A middleware dropped its continuation without resolving it
    pub const CONTINUATION_DROPPED: i64 = -2;
    /// A middleware exceeded the configured stall timeout
    pub const STALLED: i64 = -3;

    /// Create a new error
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the store itself produced this error (as opposed to a middleware)
    #[must_use]
    pub const fn is_pipeline_failure(&self) -> bool {
        matches!(
            self.code,
            Self::MIDDLEWARE_FAILED | Self::CONTINUATION_DROPPED | Self::STALLED
        )
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// A request to change state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    kind: ActionKind,
    /// Arbitrary data for middleware and reducers
    pub payload: Payload,
    /// Attributes for network-capable middleware
    pub request: RequestAttributes,
    #[serde(default, skip_deserializing)]
    completed: bool,
    /// Failure recorded by a middleware or the store
    pub error: Option<ActionError>,
    /// Raw response recorded by a middleware
    pub response: Option<String>,
    /// Follow-up action chained by a middleware or reducer
    pub follow_up: Option<Box<Action>>,
}

impl Action {
    /// Create an action with an empty payload
    #[must_use]
    pub fn new(kind: impl Into<ActionKind>) -> Self {
        Self::with_payload(kind, Payload::new())
    }

    /// Create an action with the given payload
    #[must_use]
    pub fn with_payload(kind: impl Into<ActionKind>, payload: Payload) -> Self {
        Self {
            kind: kind.into(),
            payload,
            request: RequestAttributes::default(),
            completed: false,
            error: None,
            response: None,
            follow_up: None,
        }
    }

    /// The action's kind
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Whether the action has gone through the whole pipeline
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether an error has been recorded
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Record a failure on the action
    pub fn fail(&mut self, code: i64, message: impl Into<String>) {
        self.error = Some(ActionError::new(code, message));
    }

    /// Add a payload entry
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key, value);
        self
    }

    /// Set the target address
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.request.address = Some(address.into());
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = timeout;
        self
    }

    /// Set the content encoding
    #[must_use]
    pub const fn with_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.request.encoding = encoding;
        self
    }

    /// Set whether credentials are attached
    #[must_use]
    pub const fn with_auth(mut self, include_auth: bool) -> Self {
        self.request.include_auth = include_auth;
        self
    }

    /// Mark the request as a POST with the given body
    #[must_use]
    pub fn with_post_body(mut self, body: impl Into<String>) -> Self {
        self.request.is_post = true;
        self.request.body = Some(body.into());
        self
    }

    /// Chain a follow-up action
    #[must_use]
    pub fn with_follow_up(mut self, follow_up: Self) -> Self {
        self.follow_up = Some(Box::new(follow_up));
        self
    }

    pub(crate) const fn mark_completed(&mut self) {
        self.completed = true;
    }

    pub(crate) const fn reset_completion(&mut self) {
        self.completed = false;
    }
}
