//! Xatro world -- an event-sourced object store with a subscription bus.
//!
//! A [`World`](world::World) holds schemaless objects (attribute maps with an
//! `id` and a `kind`). Every change is expressed as an [`Event`](event::Event)
//! that is folded into the current [`State`](state::State) and then delivered
//! to listeners through a subscription graph keyed by object id. Callers can
//! also wait asynchronously for an attribute to take a value or for an object
//! to emit a particular event, and can keep private bookkeeping in
//! [`Envelope`](envelope::Envelope)s that never appear in object attributes.
//!
//! # Quick Start
//!
//! ```
//! use futures::FutureExt;
//! use serde_json::json;
//! use xatro_world::prelude::*;
//!
//! let world = World::default();
//! let bot = world.create("bot").id();
//! world.set_attr(&bot, "hp", 10).unwrap();
//!
//! let dead = world.on_become(&bot, "hp", 0).unwrap();
//! world.set_attr(&bot, "hp", 0).unwrap();
//!
//! assert_eq!(dead.now_or_never(), Some(Ok(json!(0))));
//! assert_eq!(world.get(&bot).unwrap()["hp"], json!(0));
//! ```

#![deny(unsafe_code)]

pub mod envelope;
pub mod event;
pub mod id;
pub mod journal;
pub mod object;
pub mod state;
pub mod subscription;
pub mod wait;
pub mod world;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by world operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    /// The object does not exist (never created, or destroyed).
    #[error("object {id} not found")]
    NotFound { id: id::ObjectId },

    /// Creating an object under an id that is live or was destroyed.
    #[error("object {id} already exists or was destroyed")]
    AlreadyExists { id: id::ObjectId },

    /// The listener was never registered, or has been dropped.
    #[error("{listener} is not registered")]
    UnknownListener { listener: id::ListenerId },

    /// Deleting an attribute the object does not have.
    #[error("object {id} has no attribute '{name}'")]
    MissingAttr { id: id::ObjectId, name: String },

    /// A list operation on an attribute that holds something else.
    #[error("attribute '{name}' of object {id} is not a list")]
    NotAList { id: id::ObjectId, name: String },

    /// Removing an item the list does not contain.
    #[error("list '{name}' of object {id} does not contain {value}")]
    MissingItem {
        id: id::ObjectId,
        name: String,
        value: Value,
    },

    /// Writing an attribute the world manages itself.
    #[error("attribute '{name}' of object {id} is read-only")]
    ReadOnlyAttr { id: id::ObjectId, name: String },

    /// The object a wait was watching was destroyed first.
    #[error("object {id} was destroyed before the wait resolved")]
    Abandoned { id: id::ObjectId },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::envelope::{Envelope, EnvelopeKey};
    pub use crate::event::{ActionRecord, Event};
    pub use crate::id::{ActionId, ListenerId, ObjectId};
    pub use crate::journal::{EventJournal, JournalEntry};
    pub use crate::object::{Object, ID_ATTR, KIND_ATTR};
    pub use crate::state::{reduce, State};
    pub use crate::subscription::Subscriber;
    pub use crate::wait::Wait;
    pub use crate::world::World;
    pub use crate::WorldError;
}
