//! Identifiers for world objects, actions, listeners and pending waits.
//!
//! An [`ObjectId`] is an opaque string handle. Fresh ids are random v4 UUIDs,
//! so an id that has been destroyed is never handed out again. Listener and
//! waiter ids are plain counters scoped to a single [`World`](crate::world::World).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ObjectId
// ---------------------------------------------------------------------------

/// Globally unique, opaque identifier of a world object.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Allocate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&ObjectId> for ObjectId {
    fn from(value: &ObjectId) -> Self {
        value.clone()
    }
}

impl From<ObjectId> for serde_json::Value {
    fn from(value: ObjectId) -> Self {
        serde_json::Value::String(value.0)
    }
}

impl From<&ObjectId> for serde_json::Value {
    fn from(value: &ObjectId) -> Self {
        serde_json::Value::String(value.0.clone())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ActionId
// ---------------------------------------------------------------------------

/// Identity of a single action instance, used to key its envelope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Allocate a fresh action id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId({})", self.0)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ListenerId / WaiterId
// ---------------------------------------------------------------------------

/// Handle to a listener registered with [`World::listener`](crate::world::World::listener)
/// or [`World::observe`](crate::world::World::observe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Handle to a pending wait in the waiter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaiterId(pub(crate) u64);

// ---------------------------------------------------------------------------
// Counter
// ---------------------------------------------------------------------------

/// Monotonic allocator for the world-scoped numeric handles.
///
/// Values are never recycled, so a stale handle can never alias a live one.
#[derive(Debug, Default)]
pub(crate) struct Counter {
    next: u64,
}

impl Counter {
    pub(crate) fn next(&mut self) -> u64 {
        let value = self.next;
        self.next += 1;
        value
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
