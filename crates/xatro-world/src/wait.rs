//! Futures that resolve when the world later emits a given condition.
//!
//! Each pending wait is a `oneshot` channel whose sender lives in the world's
//! [`WaiterTable`] and whose receiver is wrapped in a [`Wait`]. The dispatch
//! loop removes matching entries and fires their senders. Dropping or
//! cancelling a [`Wait`] removes its entry; destroying the watched object
//! drops the senders, which resolves the wait with
//! [`WorldError::Abandoned`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Weak;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use serde_json::Value;

use crate::event::Event;
use crate::id::{Counter, ObjectId, WaiterId};
use crate::world::WorldInner;
use crate::WorldError;

// ---------------------------------------------------------------------------
// Pending conditions
// ---------------------------------------------------------------------------

/// One registered condition and the sender that completes it.
pub(crate) enum Pending {
    /// Attribute `name` becomes equal to `target`.
    Become {
        name: String,
        target: Value,
        tx: oneshot::Sender<Value>,
    },
    /// Attribute `name` is set to anything.
    Change {
        name: String,
        tx: oneshot::Sender<Value>,
    },
    /// The watched object emits exactly `event`.
    Event {
        event: Event,
        tx: oneshot::Sender<Event>,
    },
}

impl Pending {
    fn is_canceled(&self) -> bool {
        match self {
            Pending::Become { tx, .. } | Pending::Change { tx, .. } => tx.is_canceled(),
            Pending::Event { tx, .. } => tx.is_canceled(),
        }
    }
}

/// A condition that matched, ready to be fired outside the world borrow.
pub(crate) enum Resolution {
    Value(oneshot::Sender<Value>, Value),
    Event(oneshot::Sender<Event>, Event),
}

impl Resolution {
    /// Complete the wait. A receiver that has gone away is ignored.
    pub(crate) fn fire(self) {
        match self {
            Resolution::Value(tx, value) => {
                let _ = tx.send(value);
            }
            Resolution::Event(tx, event) => {
                let _ = tx.send(event);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WaiterTable
// ---------------------------------------------------------------------------

/// Pending waits, grouped by the object they watch.
#[derive(Default)]
pub(crate) struct WaiterTable {
    ids: Counter,
    by_object: HashMap<ObjectId, Vec<(WaiterId, Pending)>>,
}

impl WaiterTable {
    /// Register a condition on `object`.
    pub(crate) fn register(&mut self, object: &ObjectId, pending: Pending) -> WaiterId {
        let waiter = WaiterId(self.ids.next());
        let entries = self.by_object.entry(object.clone()).or_default();
        // Receivers dropped while the world was busy leave dead senders behind.
        entries.retain(|(_, p)| !p.is_canceled());
        entries.push((waiter, pending));
        waiter
    }

    /// Remove a waiter. Returns `false` if it already resolved or was removed.
    pub(crate) fn cancel(&mut self, object: &ObjectId, waiter: WaiterId) -> bool {
        let Some(entries) = self.by_object.get_mut(object) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(w, _)| *w != waiter);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.by_object.remove(object);
        }
        removed
    }

    /// Take every waiter satisfied by `event` emitted from `source`.
    ///
    /// Attribute conditions are matched against the object the event is
    /// about; event conditions against the emitting object.
    pub(crate) fn take_ready(&mut self, source: Option<&ObjectId>, event: &Event) -> Vec<Resolution> {
        let mut ready = Vec::new();

        if let Event::AttrSet { id, name, value } = event {
            self.drain_matching(id, &mut ready, |pending| match pending {
                Pending::Become { name: n, target, .. } => n == name && target == value,
                Pending::Change { name: n, .. } => n == name,
                Pending::Event { .. } => false,
            }, |pending| match pending {
                Pending::Become { tx, .. } | Pending::Change { tx, .. } => {
                    Some(Resolution::Value(tx, value.clone()))
                }
                Pending::Event { .. } => None,
            });
        }

        if let Some(source) = source {
            self.drain_matching(source, &mut ready, |pending| {
                matches!(pending, Pending::Event { event: e, .. } if e == event)
            }, |pending| match pending {
                Pending::Event { tx, .. } => Some(Resolution::Event(tx, event.clone())),
                _ => None,
            });
        }

        ready
    }

    fn drain_matching(
        &mut self,
        object: &ObjectId,
        ready: &mut Vec<Resolution>,
        matches: impl Fn(&Pending) -> bool,
        resolve: impl Fn(Pending) -> Option<Resolution>,
    ) {
        let Some(entries) = self.by_object.get_mut(object) else {
            return;
        };
        let mut kept = Vec::with_capacity(entries.len());
        for (waiter, pending) in entries.drain(..) {
            if matches(&pending) {
                ready.extend(resolve(pending));
            } else {
                kept.push((waiter, pending));
            }
        }
        if kept.is_empty() {
            self.by_object.remove(object);
        } else {
            *entries = kept;
        }
    }

    /// Remove all waiters on a destroyed object. The caller drops them
    /// outside the world borrow.
    pub(crate) fn abandon(&mut self, object: &ObjectId) -> Vec<(WaiterId, Pending)> {
        self.by_object.remove(object).unwrap_or_default()
    }

    /// Number of pending waiters on an object.
    pub(crate) fn pending_for(&self, object: &ObjectId) -> usize {
        self.by_object.get(object).map_or(0, Vec::len)
    }
}

// ---------------------------------------------------------------------------
// Wait
// ---------------------------------------------------------------------------

/// A future for a condition the world has not emitted yet.
///
/// Resolves to the attribute value (for [`World::on_become`] and
/// [`World::on_next_change`]) or the matching event (for
/// [`World::on_event`]). Dropping the future, or calling
/// [`cancel`](Self::cancel), deregisters it without affecting other waiters.
///
/// [`World::on_become`]: crate::world::World::on_become
/// [`World::on_next_change`]: crate::world::World::on_next_change
/// [`World::on_event`]: crate::world::World::on_event
#[must_use = "a Wait does nothing unless awaited"]
pub struct Wait<T> {
    object: ObjectId,
    waiter: Option<WaiterId>,
    rx: oneshot::Receiver<T>,
    world: Weak<RefCell<WorldInner>>,
}

impl<T> Wait<T> {
    pub(crate) fn pending(
        object: ObjectId,
        waiter: WaiterId,
        rx: oneshot::Receiver<T>,
        world: Weak<RefCell<WorldInner>>,
    ) -> Self {
        Self {
            object,
            waiter: Some(waiter),
            rx,
            world,
        }
    }

    /// A wait that is already satisfied.
    pub(crate) fn ready(object: ObjectId, value: T) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self {
            object,
            waiter: None,
            rx,
            world: Weak::new(),
        }
    }

    /// The object this wait watches.
    pub fn object(&self) -> &ObjectId {
        &self.object
    }

    /// Deregister the wait. It will never resolve.
    pub fn cancel(mut self) {
        self.deregister();
    }

    fn deregister(&mut self) {
        let Some(waiter) = self.waiter.take() else {
            return;
        };
        self.rx.close();
        if let Some(inner) = self.world.upgrade() {
            // If the world is mid-borrow the closed receiver marks the entry
            // dead and the next registration on this object prunes it.
            if let Ok(mut inner) = inner.try_borrow_mut() {
                inner.waiters.cancel(&self.object, waiter);
            }
        }
    }
}

impl<T> Future for Wait<T> {
    type Output = Result<T, WorldError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(value)) => {
                self.waiter = None;
                Poll::Ready(Ok(value))
            }
            Poll::Ready(Err(oneshot::Canceled)) => {
                self.waiter = None;
                Poll::Ready(Err(WorldError::Abandoned {
                    id: self.object.clone(),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Wait<T> {
    fn drop(&mut self) {
        self.deregister();
    }
}

impl<T> std::fmt::Debug for Wait<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wait")
            .field("object", &self.object)
            .field("pending", &self.waiter.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
