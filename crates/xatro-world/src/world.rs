//! The [`World`] owns every object, the subscription graph, pending waits and
//! envelopes, and is the only place events are issued.
//!
//! # Dispatch
//!
//! Every mutation is turned into an [`Event`], folded into the current state
//! immediately, and appended to a delivery queue. The first caller to find
//! the queue idle drains it; an event emitted by a listener while the queue is
//! being drained is only appended, and is delivered after every listener of
//! the current event has run. Delivery is therefore breadth-first and never
//! recurses.
//!
//! Delivering one event calls, in order: the event receiver given to
//! [`World::new`], every observer, and the listeners reached through the
//! emitting object's subscriptions (each at most once). Then pending waits
//! satisfied by the event are completed. A listener returning `Err` is logged
//! and skipped; the remaining listeners still run.
//!
//! The world is a cheap, cloneable handle. It is single-threaded: all clones
//! refer to the same state and must be used from one thread.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use futures::channel::oneshot;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::envelope::{Envelope, EnvelopeKey};
use crate::event::Event;
use crate::id::{Counter, ListenerId, ObjectId, WaiterId};
use crate::object::{Object, ID_ATTR, KIND_ATTR};
use crate::state::State;
use crate::subscription::{SubscriptionGraph, Subscriber};
use crate::wait::{Pending, Wait, WaiterTable};
use crate::WorldError;

// ---------------------------------------------------------------------------
// Callback types
// ---------------------------------------------------------------------------

/// A listener callback. It may call back into the world; any events it causes
/// are delivered after the current one.
pub type ListenerFn = dyn FnMut(&World, &Event) -> anyhow::Result<()>;

/// The process-wide event receiver supplied at construction.
pub type EventReceiverFn = dyn FnMut(&Event) -> anyhow::Result<()>;

type SharedListener = Rc<RefCell<Box<ListenerFn>>>;
type SharedReceiver = Rc<RefCell<Box<EventReceiverFn>>>;

// ---------------------------------------------------------------------------
// Delivery queue
// ---------------------------------------------------------------------------

enum Queued {
    /// Deliver an event emitted by `source`.
    Deliver {
        event: Event,
        source: Option<ObjectId>,
    },
    /// Release everything keyed by a destroyed object. Queued right after its
    /// `Destroyed` event so that event still reaches its subscribers.
    Teardown(ObjectId),
}

// ---------------------------------------------------------------------------
// WorldInner
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct WorldInner {
    state: State,
    receiver: Option<SharedReceiver>,
    listeners: HashMap<ListenerId, SharedListener>,
    listener_ids: Counter,
    observers: Vec<ListenerId>,
    graph: SubscriptionGraph,
    pub(crate) waiters: WaiterTable,
    envelopes: HashMap<EnvelopeKey, Envelope>,
    retired: HashSet<ObjectId>,
    queue: VecDeque<Queued>,
    dispatching: bool,
    emitted: u64,
}

impl WorldInner {
    fn require(&self, id: &ObjectId) -> Result<&Object, WorldError> {
        self.state
            .get(id)
            .ok_or_else(|| WorldError::NotFound { id: id.clone() })
    }

    fn require_listener(&self, listener: ListenerId) -> Result<(), WorldError> {
        if self.listeners.contains_key(&listener) {
            Ok(())
        } else {
            Err(WorldError::UnknownListener { listener })
        }
    }

    /// Check that `event` can be applied to the current state. The rules
    /// are those of the matching mutation method.
    fn validate(&self, event: &Event) -> Result<(), WorldError> {
        let read_only = |id: &ObjectId, name: &str| WorldError::ReadOnlyAttr {
            id: id.clone(),
            name: name.to_owned(),
        };
        match event {
            Event::Created { id } => {
                if self.state.contains(id) || self.retired.contains(id) {
                    return Err(WorldError::AlreadyExists { id: id.clone() });
                }
            }
            Event::Destroyed { id } => {
                self.require(id)?;
            }
            Event::AttrSet { id, name, .. } => {
                self.require(id)?;
                if name == ID_ATTR {
                    return Err(read_only(id, name));
                }
            }
            Event::AttrDel { id, name } => {
                let obj = self.require(id)?;
                if name == ID_ATTR || name == KIND_ATTR {
                    return Err(read_only(id, name));
                }
                if !obj.contains(name) {
                    return Err(WorldError::MissingAttr {
                        id: id.clone(),
                        name: name.clone(),
                    });
                }
            }
            Event::ItemAdded { id, name, .. } => {
                let obj = self.require(id)?;
                if matches!(obj.get(name), Some(existing) if !existing.is_array()) {
                    return Err(WorldError::NotAList {
                        id: id.clone(),
                        name: name.clone(),
                    });
                }
            }
            Event::ItemRemoved { id, name, value } => match self.require(id)?.get(name) {
                Some(Value::Array(items)) if items.contains(value) => {}
                Some(Value::Array(_)) | None => {
                    return Err(WorldError::MissingItem {
                        id: id.clone(),
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
                Some(_) => {
                    return Err(WorldError::NotAList {
                        id: id.clone(),
                        name: name.clone(),
                    });
                }
            },
            Event::ActionPerformed { .. } | Event::Custom { .. } => {}
        }
        Ok(())
    }

    /// Validate, apply and queue an event. `Destroyed` also retires the id
    /// and queues its teardown.
    fn submit(&mut self, event: Event, source: Option<ObjectId>) -> Result<(), WorldError> {
        self.validate(&event)?;
        let destroyed = match &event {
            Event::Destroyed { id } => Some(id.clone()),
            _ => None,
        };
        self.enqueue(event, source);
        if let Some(id) = destroyed {
            self.retired.insert(id.clone());
            self.queue.push_back(Queued::Teardown(id));
        }
        Ok(())
    }

    /// Fold the event into the state and queue it for delivery.
    fn enqueue(&mut self, event: Event, source: Option<ObjectId>) {
        self.state.apply(&event);
        self.emitted += 1;
        self.queue.push_back(Queued::Deliver { event, source });
    }

    /// Detach everything keyed by a destroyed object.
    fn release(&mut self, id: &ObjectId) -> Released {
        self.graph.remove_object(id);
        Released {
            envelope: self.envelopes.remove(&EnvelopeKey::Object(id.clone())),
            waits: self.waiters.abandon(id),
        }
    }
}

/// What a destroyed object leaves behind. Must be dropped outside the world
/// borrow: envelope attachments and abandoned waits may call back into it.
struct Released {
    envelope: Option<Envelope>,
    waits: Vec<(WaiterId, Pending)>,
}

impl Drop for Released {
    fn drop(&mut self) {
        self.waits.clear();
        if let Some(envelope) = self.envelope.take() {
            drop(envelope.take_all());
        }
    }
}

/// Clears the dispatching flag even if a listener panics.
///
/// After a panic, events still queued are discarded rather than delivered
/// during some later, unrelated call. Teardowns of destroyed objects still
/// run.
struct DispatchGuard<'a>(&'a RefCell<WorldInner>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut inner) = self.0.try_borrow_mut() else {
            return;
        };
        inner.dispatching = false;
        if !std::thread::panicking() || inner.queue.is_empty() {
            return;
        }
        let mut discarded = 0usize;
        let mut released = Vec::new();
        while let Some(item) = inner.queue.pop_front() {
            match item {
                Queued::Deliver { .. } => discarded += 1,
                Queued::Teardown(id) => released.push(inner.release(&id)),
            }
        }
        drop(inner);
        warn!(discarded, "listener panicked; undelivered events discarded");
        drop(released);
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The entity store and event bus of one game.
#[derive(Clone, Default)]
pub struct World {
    inner: Rc<RefCell<WorldInner>>,
}

impl World {
    /// Create a world whose `event_receiver` is told about every event.
    ///
    /// The receiver must not call back into the world; observers registered
    /// with [`observe`](Self::observe) may.
    pub fn new(event_receiver: impl FnMut(&Event) -> anyhow::Result<()> + 'static) -> Self {
        let inner = WorldInner {
            receiver: Some(Rc::new(RefCell::new(Box::new(event_receiver)))),
            ..WorldInner::default()
        };
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    // -- objects ------------------------------------------------------------

    /// Create an object of the given kind that receives its own emissions.
    pub fn create(&self, kind: &str) -> Object {
        self.create_with(kind, true)
    }

    /// Create an object of the given kind.
    ///
    /// Emits `Created` and then `AttrSet(kind)`. When `receive_own_emissions`
    /// is set, the object's reception listeners also hear what it emits.
    pub fn create_with(&self, kind: &str, receive_own_emissions: bool) -> Object {
        let id = ObjectId::generate();
        {
            let mut inner = self.inner.borrow_mut();
            inner.enqueue(Event::Created { id: id.clone() }, Some(id.clone()));
            inner.enqueue(
                Event::AttrSet {
                    id: id.clone(),
                    name: KIND_ATTR.to_owned(),
                    value: Value::from(kind),
                },
                Some(id.clone()),
            );
            if receive_own_emissions {
                inner.graph.subscribe(&id, Subscriber::Receiver(id.clone()));
            }
        }
        debug!(object = %id, kind, "object created");
        self.drain();

        // A listener may already have changed or destroyed it.
        self.inner.borrow().state.get(&id).cloned().unwrap_or_else(|| {
            let mut obj = Object::with_id(&id);
            obj.attrs_mut().insert(KIND_ATTR.to_owned(), Value::from(kind));
            obj
        })
    }

    /// Destroy an object.
    ///
    /// Emits `Destroyed`, after which the id is invalid for every operation.
    /// Its subscriptions, pending waits and envelope are released once the
    /// `Destroyed` event has been delivered.
    pub fn destroy(&self, id: &ObjectId) -> Result<(), WorldError> {
        self.inner
            .borrow_mut()
            .submit(Event::Destroyed { id: id.clone() }, Some(id.clone()))?;
        debug!(object = %id, "object destroyed");
        self.drain();
        Ok(())
    }

    /// Current attributes of an object.
    pub fn get(&self, id: &ObjectId) -> Result<Object, WorldError> {
        self.inner.borrow().require(id).cloned()
    }

    /// Whether the object exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.inner.borrow().state.contains(id)
    }

    /// Ids of every live object.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.inner.borrow().state.iter().map(|(id, _)| id.clone()).collect()
    }

    /// A copy of the whole current state.
    pub fn state(&self) -> State {
        self.inner.borrow().state.clone()
    }

    // -- mutation -----------------------------------------------------------

    /// Set an attribute. `id` is read-only.
    pub fn set_attr(
        &self,
        id: &ObjectId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), WorldError> {
        self.mutate(Event::AttrSet {
            id: id.clone(),
            name: name.to_owned(),
            value: value.into(),
        })
    }

    /// Delete an attribute. `id` and `kind` cannot be deleted.
    pub fn del_attr(&self, id: &ObjectId, name: &str) -> Result<(), WorldError> {
        self.mutate(Event::AttrDel {
            id: id.clone(),
            name: name.to_owned(),
        })
    }

    /// Append a value to a list attribute, creating the list if needed.
    pub fn add_item(
        &self,
        id: &ObjectId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), WorldError> {
        self.mutate(Event::ItemAdded {
            id: id.clone(),
            name: name.to_owned(),
            value: value.into(),
        })
    }

    /// Remove the first occurrence of a value from a list attribute.
    pub fn remove_item(
        &self,
        id: &ObjectId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), WorldError> {
        self.mutate(Event::ItemRemoved {
            id: id.clone(),
            name: name.to_owned(),
            value: value.into(),
        })
    }

    /// Submit a mutation as the emission of the object it changes.
    fn mutate(&self, event: Event) -> Result<(), WorldError> {
        let source = event.object_id().cloned();
        self.inner.borrow_mut().submit(event, source)?;
        self.drain();
        Ok(())
    }

    // -- listeners and subscriptions ----------------------------------------

    /// Register a listener callback. It hears nothing until it is subscribed
    /// with [`subscribe_to`](Self::subscribe_to) or
    /// [`receive_for`](Self::receive_for).
    pub fn listener(
        &self,
        callback: impl FnMut(&World, &Event) -> anyhow::Result<()> + 'static,
    ) -> ListenerId {
        let mut inner = self.inner.borrow_mut();
        let id = ListenerId(inner.listener_ids.next());
        inner
            .listeners
            .insert(id, Rc::new(RefCell::new(Box::new(callback))));
        id
    }

    /// Register a listener that hears every event, whatever its source.
    pub fn observe(
        &self,
        callback: impl FnMut(&World, &Event) -> anyhow::Result<()> + 'static,
    ) -> ListenerId {
        let id = self.listener(callback);
        self.inner.borrow_mut().observers.push(id);
        id
    }

    /// Forget a listener and all its subscriptions. Returns `false` if it was
    /// not registered.
    pub fn drop_listener(&self, listener: ListenerId) -> bool {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            inner.observers.retain(|l| *l != listener);
            inner.graph.remove_listener(listener);
            inner.listeners.remove(&listener)
        };
        removed.is_some()
    }

    /// Subscribe to the events `id` emits.
    pub fn subscribe_to(
        &self,
        id: &ObjectId,
        subscriber: impl Into<Subscriber>,
    ) -> Result<(), WorldError> {
        let subscriber = subscriber.into();
        let mut inner = self.inner.borrow_mut();
        inner.require(id)?;
        match &subscriber {
            Subscriber::Listener(listener) => inner.require_listener(*listener)?,
            Subscriber::Receiver(target) | Subscriber::Forward(target) => {
                inner.require(target)?;
            }
        }
        inner.graph.subscribe(id, subscriber);
        Ok(())
    }

    /// Undo [`subscribe_to`](Self::subscribe_to). Returns `Ok(false)` if the
    /// subscription did not exist.
    pub fn unsubscribe_from(
        &self,
        id: &ObjectId,
        subscriber: impl Into<Subscriber>,
    ) -> Result<bool, WorldError> {
        let subscriber = subscriber.into();
        let mut inner = self.inner.borrow_mut();
        inner.require(id)?;
        Ok(inner.graph.unsubscribe(id, &subscriber))
    }

    /// Have `listener` hear every event `id` receives.
    pub fn receive_for(&self, id: &ObjectId, listener: ListenerId) -> Result<(), WorldError> {
        let mut inner = self.inner.borrow_mut();
        inner.require(id)?;
        inner.require_listener(listener)?;
        inner.graph.receive(id, listener);
        Ok(())
    }

    /// Undo [`receive_for`](Self::receive_for). Returns `Ok(false)` if the
    /// listener was not receiving for `id`.
    pub fn stop_receiving_for(
        &self,
        id: &ObjectId,
        listener: ListenerId,
    ) -> Result<bool, WorldError> {
        let mut inner = self.inner.borrow_mut();
        inner.require(id)?;
        Ok(inner.graph.stop_receiving(id, listener))
    }

    // -- dispatch -----------------------------------------------------------

    /// Emit an event, optionally as the emission of `source`.
    ///
    /// A state-changing event is checked exactly as the matching mutation
    /// method checks it: `Created` cannot reuse a live or destroyed id,
    /// `AttrSet` cannot touch `id`, and so on. It is applied to the
    /// projection before this returns, and `Destroyed` releases the object
    /// as [`destroy`](Self::destroy) does. A rejected event is not emitted.
    ///
    /// Delivery happens now, or after the event currently being delivered
    /// if called from a listener.
    pub fn emit(&self, event: Event, source: Option<&ObjectId>) -> Result<(), WorldError> {
        self.inner.borrow_mut().submit(event, source.cloned())?;
        self.drain();
        Ok(())
    }

    fn drain(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.dispatching {
                return;
            }
            inner.dispatching = true;
        }
        let _guard = DispatchGuard(&self.inner);

        loop {
            let next = self.inner.borrow_mut().queue.pop_front();
            match next {
                Some(Queued::Deliver { event, source }) => self.deliver(&event, source.as_ref()),
                Some(Queued::Teardown(id)) => self.teardown(&id),
                None => break,
            }
        }
    }

    fn deliver(&self, event: &Event, source: Option<&ObjectId>) {
        let (receiver, listeners, ready) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;

            let mut delivered = HashSet::new();
            let mut plan: Vec<ListenerId> = inner
                .observers
                .iter()
                .copied()
                .filter(|l| delivered.insert(*l))
                .collect();
            if let Some(source) = source {
                plan.extend(inner.graph.plan(source, &mut delivered));
            }
            let listeners: Vec<(ListenerId, SharedListener)> = plan
                .into_iter()
                .filter_map(|l| inner.listeners.get(&l).map(|f| (l, Rc::clone(f))))
                .collect();
            let ready = inner.waiters.take_ready(source, event);
            (inner.receiver.clone(), listeners, ready)
        };

        trace!(
            event = %event,
            source = ?source,
            listeners = listeners.len(),
            waits = ready.len(),
            "delivering event"
        );

        if let Some(receiver) = receiver {
            match receiver.try_borrow_mut() {
                Ok(mut receive) => {
                    if let Err(e) = receive(event) {
                        warn!(event = %event, error = %e, "event receiver failed");
                    }
                }
                Err(_) => warn!(event = %event, "event receiver re-entered; event skipped"),
            }
        }

        for (id, listener) in listeners {
            let Ok(mut callback) = listener.try_borrow_mut() else {
                warn!(listener = %id, event = %event, "listener re-entered; event skipped");
                continue;
            };
            if let Err(e) = callback(self, event) {
                warn!(listener = %id, event = %event, error = %e, "listener failed");
            }
        }

        for resolution in ready {
            resolution.fire();
        }
    }

    fn teardown(&self, id: &ObjectId) {
        let released = self.inner.borrow_mut().release(id);
        if !released.waits.is_empty() {
            debug!(object = %id, waits = released.waits.len(), "abandoning waits on destroyed object");
        }
        drop(released);
    }

    // -- waits --------------------------------------------------------------

    /// Resolve when attribute `name` of `id` equals `target`.
    ///
    /// Resolves immediately if it already does.
    pub fn on_become(
        &self,
        id: &ObjectId,
        name: &str,
        target: impl Into<Value>,
    ) -> Result<Wait<Value>, WorldError> {
        let target = target.into();
        let mut inner = self.inner.borrow_mut();
        if inner.require(id)?.get(name) == Some(&target) {
            return Ok(Wait::ready(id.clone(), target));
        }
        let (tx, rx) = oneshot::channel();
        let waiter = inner.waiters.register(
            id,
            Pending::Become {
                name: name.to_owned(),
                target,
                tx,
            },
        );
        Ok(Wait::pending(id.clone(), waiter, rx, Rc::downgrade(&self.inner)))
    }

    /// Resolve with the value of the next `AttrSet` of `name` on `id`.
    pub fn on_next_change(&self, id: &ObjectId, name: &str) -> Result<Wait<Value>, WorldError> {
        let mut inner = self.inner.borrow_mut();
        inner.require(id)?;
        let (tx, rx) = oneshot::channel();
        let waiter = inner.waiters.register(
            id,
            Pending::Change {
                name: name.to_owned(),
                tx,
            },
        );
        Ok(Wait::pending(id.clone(), waiter, rx, Rc::downgrade(&self.inner)))
    }

    /// Resolve when `id` next emits exactly `event`.
    pub fn on_event(&self, id: &ObjectId, event: Event) -> Result<Wait<Event>, WorldError> {
        let mut inner = self.inner.borrow_mut();
        inner.require(id)?;
        let (tx, rx) = oneshot::channel();
        let waiter = inner.waiters.register(id, Pending::Event { event, tx });
        Ok(Wait::pending(id.clone(), waiter, rx, Rc::downgrade(&self.inner)))
    }

    /// Number of waits still pending on an object.
    pub fn pending_waits(&self, id: &ObjectId) -> usize {
        self.inner.borrow().waiters.pending_for(id)
    }

    // -- envelopes ----------------------------------------------------------

    /// The envelope for an object or action, created on first use.
    ///
    /// Fails with [`WorldError::NotFound`] for an object that does not exist.
    pub fn envelope(&self, key: impl Into<EnvelopeKey>) -> Result<Envelope, WorldError> {
        let key = key.into();
        let mut inner = self.inner.borrow_mut();
        if let EnvelopeKey::Object(id) = &key {
            inner.require(id)?;
        }
        Ok(inner.envelopes.entry(key).or_default().clone())
    }

    /// Forget an envelope and drop its contents.
    pub fn discard_envelope(&self, key: impl Into<EnvelopeKey>) {
        let removed = self.inner.borrow_mut().envelopes.remove(&key.into());
        if let Some(envelope) = removed {
            drop(envelope.take_all());
        }
    }

    // -- diagnostics --------------------------------------------------------

    /// Total number of events emitted so far.
    pub fn emitted_count(&self) -> u64 {
        self.inner.borrow().emitted
    }

    /// Whether the delivery queue is currently being drained.
    pub fn is_dispatching(&self) -> bool {
        self.inner.borrow().dispatching
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("World")
                .field("objects", &inner.state.len())
                .field("listeners", &inner.listeners.len())
                .field("envelopes", &inner.envelopes.len())
                .field("queued", &inner.queue.len())
                .field("emitted", &inner.emitted)
                .finish(),
            Err(_) => f.debug_struct("World").finish_non_exhaustive(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
