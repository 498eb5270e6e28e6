//! The state projector: folds events into the current object attribute maps.
//!
//! [`State::apply`] is the only place object attributes are written. The
//! [`World`](crate::world::World) runs every event it emits through it, and
//! anyone holding the same event sequence can rebuild an identical state with
//! [`State::from_events`].
//!
//! # Example
//!
//! ```
//! use xatro_world::prelude::*;
//! use serde_json::json;
//!
//! let id = ObjectId::from("a");
//! let events = vec![
//!     Event::Created { id: id.clone() },
//!     Event::AttrSet { id: id.clone(), name: "hp".into(), value: json!(3) },
//! ];
//! let state = State::from_events(&events);
//! assert_eq!(state.get(&id).unwrap()["hp"], json!(3));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Event;
use crate::id::ObjectId;
use crate::object::Object;

/// Mapping of object id to its current attributes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    objects: BTreeMap<ObjectId, Object>,
}

impl State {
    /// An empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a sequence of events, in order, into a fresh state.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut state = Self::new();
        for event in events {
            state.apply(event);
        }
        state
    }

    /// Apply one event.
    ///
    /// Only the event's tag and payload are consulted. Events that do not
    /// describe attribute changes (`ActionPerformed`, `Custom`) are ignored,
    /// as are changes addressed to objects that do not exist.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Created { id } => {
                self.objects.insert(id.clone(), Object::with_id(id));
            }
            Event::Destroyed { id } => {
                self.objects.remove(id);
            }
            Event::AttrSet { id, name, value } => {
                if let Some(obj) = self.objects.get_mut(id) {
                    obj.attrs_mut().insert(name.clone(), value.clone());
                }
            }
            Event::AttrDel { id, name } => {
                if let Some(obj) = self.objects.get_mut(id) {
                    obj.attrs_mut().remove(name);
                }
            }
            Event::ItemAdded { id, name, value } => {
                if let Some(obj) = self.objects.get_mut(id) {
                    let list = obj
                        .attrs_mut()
                        .entry(name.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(items) = list {
                        items.push(value.clone());
                    }
                }
            }
            Event::ItemRemoved { id, name, value } => {
                if let Some(Value::Array(items)) = self
                    .objects
                    .get_mut(id)
                    .and_then(|obj| obj.attrs_mut().get_mut(name))
                {
                    if let Some(pos) = items.iter().position(|item| item == value) {
                        items.remove(pos);
                    }
                }
            }
            Event::ActionPerformed { .. } | Event::Custom { .. } => {}
        }
    }

    /// Current attributes of an object.
    pub fn get(&self, id: &ObjectId) -> Option<&Object> {
        self.objects.get(id)
    }

    /// Whether the object exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether there are no live objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate live objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &Object)> {
        self.objects.iter()
    }
}

/// Pure form of [`State::apply`]: returns the state after `event`.
pub fn reduce(mut state: State, event: &Event) -> State {
    state.apply(event);
    state
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
