//! Typed, immutable event records.
//!
//! Every state change in a [`World`](crate::world::World) is expressed as one
//! [`Event`]. Events are produced by the world's mutation methods, folded into
//! the current state by the [`State`](crate::state::State) projector, and
//! delivered to observers and subscribers. They are never mutated after
//! creation.
//!
//! The `Display` impl renders the one-line transcript form used in logs:
//!
//! ```
//! use xatro_world::prelude::*;
//!
//! let ev = Event::AttrSet {
//!     id: ObjectId::from("a"),
//!     name: "hp".to_owned(),
//!     value: serde_json::json!(10),
//! };
//! assert_eq!(ev.to_string(), "a.hp = 10");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{ActionId, ObjectId};

// ---------------------------------------------------------------------------
// ActionRecord
// ---------------------------------------------------------------------------

/// A description of an executed action, carried by
/// [`Event::ActionPerformed`].
///
/// Actions themselves are behavior and live in the engine crate; the event
/// log only needs enough of them to be read back by rules and observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Identity of the executed action instance.
    pub action_id: ActionId,
    /// Short name of the action kind (e.g. `"move"`).
    pub name: String,
    /// The primary actor.
    pub subject: ObjectId,
    /// Objects credited with emitting the performed event.
    pub emitters: Vec<ObjectId>,
    /// Action-specific parameters.
    #[serde(default)]
    pub detail: Value,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One fact about the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// An object came into existence.
    Created {
        /// The new object.
        id: ObjectId,
    },
    /// An object was destroyed. Its id is never valid again.
    Destroyed {
        /// The destroyed object.
        id: ObjectId,
    },
    /// An attribute was set (inserted or overwritten).
    AttrSet {
        /// Object whose attribute changed.
        id: ObjectId,
        /// Attribute name.
        name: String,
        /// New value.
        value: Value,
    },
    /// An attribute was deleted.
    AttrDel {
        /// Object whose attribute was removed.
        id: ObjectId,
        /// Attribute name.
        name: String,
    },
    /// A value was appended to a list attribute.
    ItemAdded {
        /// Object holding the list.
        id: ObjectId,
        /// List attribute name.
        name: String,
        /// Appended value.
        value: Value,
    },
    /// A value was removed from a list attribute.
    ItemRemoved {
        /// Object holding the list.
        id: ObjectId,
        /// List attribute name.
        name: String,
        /// Removed value.
        value: Value,
    },
    /// An action was executed by the engine.
    ActionPerformed {
        /// What was executed.
        action: ActionRecord,
    },
    /// A collaborator-defined notice. The state projector ignores it.
    Custom {
        /// Notice kind, chosen by the collaborator.
        name: String,
        /// Object the notice concerns, if any.
        id: Option<ObjectId>,
        /// Free-form payload.
        #[serde(default)]
        payload: Value,
    },
}

impl Event {
    /// The object this event is about, if any.
    ///
    /// For `ActionPerformed` this is the action's subject.
    pub fn object_id(&self) -> Option<&ObjectId> {
        match self {
            Event::Created { id }
            | Event::Destroyed { id }
            | Event::AttrSet { id, .. }
            | Event::AttrDel { id, .. }
            | Event::ItemAdded { id, .. }
            | Event::ItemRemoved { id, .. } => Some(id),
            Event::ActionPerformed { action } => Some(&action.subject),
            Event::Custom { id, .. } => id.as_ref(),
        }
    }

    /// Short tag naming the variant, used in log fields.
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Created { .. } => "created",
            Event::Destroyed { .. } => "destroyed",
            Event::AttrSet { .. } => "attr_set",
            Event::AttrDel { .. } => "attr_del",
            Event::ItemAdded { .. } => "item_added",
            Event::ItemRemoved { .. } => "item_removed",
            Event::ActionPerformed { .. } => "action_performed",
            Event::Custom { .. } => "custom",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Created { id } => write!(f, "{id} CREATED"),
            Event::Destroyed { id } => write!(f, "{id} DESTROYED"),
            Event::AttrSet { id, name, value } => write!(f, "{id}.{name} = {value}"),
            Event::AttrDel { id, name } => write!(f, "{id}.{name} DEL"),
            Event::ItemAdded { id, name, value } => write!(f, "{id}.{name} ADD {value}"),
            Event::ItemRemoved { id, name, value } => write!(f, "{id}.{name} POP {value}"),
            Event::ActionPerformed { action } => {
                write!(f, "ACTION {} by {}", action.name, action.subject)
            }
            Event::Custom { name, id: Some(id), payload } => write!(f, "{id} {name} {payload}"),
            Event::Custom { name, id: None, payload } => write!(f, "{name} {payload}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
