//! Out-of-band bookkeeping attached to an object or an action.
//!
//! An [`Envelope`] is a small key/value map that never shows up in an
//! object's attributes. Engines use it for things like a pending proof-of-work
//! solution on an action, or energy reserved by an executing action on its
//! subject. Besides JSON values an envelope can hold opaque attachments, such
//! as a [`Wait`](crate::wait::Wait) that acts as a cancellation handle; these
//! are dropped when the envelope is cleared.
//!
//! An object's envelope is cleared and forgotten when the object is
//! destroyed.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use serde_json::Value;

use crate::id::{ActionId, ObjectId};

// ---------------------------------------------------------------------------
// EnvelopeKey
// ---------------------------------------------------------------------------

/// What an envelope belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeKey {
    /// A world object. Must exist when the envelope is requested.
    Object(ObjectId),
    /// An action instance.
    Action(ActionId),
}

impl From<ObjectId> for EnvelopeKey {
    fn from(id: ObjectId) -> Self {
        EnvelopeKey::Object(id)
    }
}

impl From<&ObjectId> for EnvelopeKey {
    fn from(id: &ObjectId) -> Self {
        EnvelopeKey::Object(id.clone())
    }
}

impl From<ActionId> for EnvelopeKey {
    fn from(id: ActionId) -> Self {
        EnvelopeKey::Action(id)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct EnvelopeData {
    values: BTreeMap<String, Value>,
    attachments: HashMap<String, Box<dyn Any>>,
}

/// Shared handle to one envelope.
///
/// Clones refer to the same storage.
#[derive(Clone, Default)]
pub struct Envelope {
    data: Rc<RefCell<EnvelopeData>>,
}

impl Envelope {
    /// Read a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.borrow().values.get(key).cloned()
    }

    /// Store a value, returning the previous one.
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.data.borrow_mut().values.insert(key.to_owned(), value.into())
    }

    /// Remove a value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.borrow_mut().values.remove(key)
    }

    /// Whether a value is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.borrow().values.contains_key(key)
    }

    /// Hold an opaque attachment until it is detached or the envelope is
    /// cleared. Replacing an attachment drops the previous one.
    pub fn attach(&self, key: &str, attachment: Box<dyn Any>) {
        let previous = self
            .data
            .borrow_mut()
            .attachments
            .insert(key.to_owned(), attachment);
        drop(previous);
    }

    /// Take an attachment back out.
    pub fn detach(&self, key: &str) -> Option<Box<dyn Any>> {
        self.data.borrow_mut().attachments.remove(key)
    }

    /// Whether the envelope holds nothing.
    pub fn is_empty(&self) -> bool {
        let data = self.data.borrow();
        data.values.is_empty() && data.attachments.is_empty()
    }

    /// Empty the envelope, handing back its contents so they can be dropped
    /// once no other borrow is outstanding.
    pub(crate) fn take_all(&self) -> EnvelopeData {
        std::mem::take(&mut *self.data.borrow_mut())
    }
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("Envelope")
            .field("values", &data.values)
            .field("attachments", &data.attachments.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
