//! Event journal: an append-only record of everything a world emitted.
//!
//! The [`EventJournal`] stores each event with its sequence number. Because
//! state is a pure fold over events, [`EventJournal::replay`] rebuilds the
//! exact state the world held after the last recorded event.
//!
//! A journal is usually fed by the world's event receiver:
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use xatro_world::prelude::*;
//!
//! let journal = Rc::new(RefCell::new(EventJournal::new()));
//! let world = World::new(EventJournal::recorder(&journal));
//!
//! let bot = world.create("bot").id();
//! world.set_attr(&bot, "hp", 10).unwrap();
//!
//! assert_eq!(journal.borrow().len(), 3);
//! assert_eq!(journal.borrow().replay(), world.state());
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::id::ObjectId;
use crate::state::State;

// ---------------------------------------------------------------------------
// JournalEntry
// ---------------------------------------------------------------------------

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Zero-based position in the journal.
    pub sequence: u64,
    pub event: Event,
}

// ---------------------------------------------------------------------------
// EventJournal
// ---------------------------------------------------------------------------

/// Recorded events in emission order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventJournal {
    entries: Vec<JournalEntry>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// An event receiver that appends to a shared journal.
    pub fn recorder(
        journal: &Rc<RefCell<EventJournal>>,
    ) -> impl FnMut(&Event) -> anyhow::Result<()> + 'static {
        let journal = Rc::clone(journal);
        move |event| {
            journal
                .try_borrow_mut()
                .map_err(|_| anyhow::anyhow!("journal is borrowed elsewhere"))?
                .record(event);
            Ok(())
        }
    }

    /// Append one event.
    pub fn record(&mut self, event: &Event) {
        let sequence = self.entries.len() as u64;
        self.entries.push(JournalEntry {
            sequence,
            event: event.clone(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in recording order.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Events in recording order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter().map(|e| &e.event)
    }

    /// Events about a given object.
    pub fn events_for_object<'a>(
        &'a self,
        id: &'a ObjectId,
    ) -> impl Iterator<Item = &'a JournalEntry> {
        self.entries
            .iter()
            .filter(move |e| e.event.object_id() == Some(id))
    }

    /// Events with a given tag, e.g. `"action_performed"`.
    pub fn events_tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a JournalEntry> {
        self.entries.iter().filter(move |e| e.event.tag() == tag)
    }

    /// Rebuild the state by folding every recorded event.
    pub fn replay(&self) -> State {
        State::from_events(self.events())
    }

    /// State after the first `n` events.
    pub fn replay_prefix(&self, n: usize) -> State {
        State::from_events(self.events().take(n))
    }

    /// One human-readable line per event.
    pub fn transcript(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| format!("{:>5} {}", e.sequence, e.event))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
