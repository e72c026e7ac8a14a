//! Identifier and version types

use crate::value::{Args, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Query Key
// ----------------------------------------------------------------------------

/// Canonical identity of a query subscription: function name plus canonical arguments
///
/// Two argument maps with the same entries always produce the same key, whatever
/// order they were built in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    name: String,
    canonical_args: String,
}

impl QueryKey {
    pub fn new(name: &str, args: &Args) -> Self {
        Self {
            name: name.to_string(),
            canonical_args: Value::Object(args.clone()).to_canonical_json(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn canonical_args(&self) -> &str {
        &self.canonical_args
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.canonical_args)
    }
}

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Wire identifier of one subscription interest interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Handle returned to a caller for one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Correlates a mutation request with its acknowledgement
///
/// Stays the same across every resend so the backend can deduplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random (v4) correlation id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Version
// ----------------------------------------------------------------------------

/// Composite version of a locally visible query result
///
/// Ordered lexicographically: the server component comes from authoritative
/// deliveries, the local component counts optimistic recomputations on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Version {
    pub server: u64,
    pub local: u64,
}

impl Version {
    /// Version of a subscription that has not received anything yet
    pub const INITIAL: Version = Version {
        server: 0,
        local: 0,
    };

    pub fn new(server: u64, local: u64) -> Self {
        Self { server, local }
    }

    /// Version of an authoritative delivery
    pub fn server(server: u64) -> Self {
        Self { server, local: 0 }
    }

    /// Next version after a local recomputation
    pub fn bump_local(self) -> Self {
        Self {
            server: self.server,
            local: self.local + 1,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.server, self.local)
    }
}

// ----------------------------------------------------------------------------
// Endpoint
// ----------------------------------------------------------------------------

/// Immutable connection target: backend URL plus optional bearer credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    url: String,
    credentials: Option<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, token: impl Into<String>) -> Self {
        self.credentials = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }
}

// Credentials never reach logs.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, saturating at zero
    pub fn since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
