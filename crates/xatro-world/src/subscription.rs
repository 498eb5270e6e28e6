//! The subscription graph: who hears which object's events.
//!
//! Two independent relations are kept, both keyed by object id:
//!
//! - **Emission** subscribers of an object are told about every event the
//!   object emits. A subscriber is a callback listener, the *receiver* of
//!   another object (delivering to that object's reception listeners), or a
//!   *forward* to another object (treating the event as that object's
//!   emission too).
//! - **Reception** listeners of an object are told about every event the
//!   object receives.
//!
//! [`SubscriptionGraph::plan`] expands one emission into the ordered list of
//! listeners to call. Each listener appears at most once per plan, and each
//! object is expanded at most once, so cycles in the graph terminate.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::id::{ListenerId, ObjectId};

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// Something that can subscribe to an object's emissions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscriber {
    /// A callback listener.
    Listener(ListenerId),
    /// The receiver of an object: the event is delivered to that object's
    /// reception listeners.
    Receiver(ObjectId),
    /// The event is also treated as an emission of the given object.
    Forward(ObjectId),
}

impl Subscriber {
    /// The object this subscriber refers to, if any.
    fn target(&self) -> Option<&ObjectId> {
        match self {
            Subscriber::Listener(_) => None,
            Subscriber::Receiver(id) | Subscriber::Forward(id) => Some(id),
        }
    }
}

impl From<ListenerId> for Subscriber {
    fn from(id: ListenerId) -> Self {
        Subscriber::Listener(id)
    }
}

// ---------------------------------------------------------------------------
// SubscriptionGraph
// ---------------------------------------------------------------------------

/// Both subscription relations of one world.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionGraph {
    emission: HashMap<ObjectId, Vec<Subscriber>>,
    reception: HashMap<ObjectId, Vec<ListenerId>>,
}

impl SubscriptionGraph {
    /// Add an emission subscriber. Returns `false` if it was already present.
    pub(crate) fn subscribe(&mut self, source: &ObjectId, subscriber: Subscriber) -> bool {
        let subs = self.emission.entry(source.clone()).or_default();
        if subs.contains(&subscriber) {
            return false;
        }
        subs.push(subscriber);
        true
    }

    /// Remove an emission subscriber. Returns `false` if it was not present.
    pub(crate) fn unsubscribe(&mut self, source: &ObjectId, subscriber: &Subscriber) -> bool {
        let Some(subs) = self.emission.get_mut(source) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s != subscriber);
        let removed = subs.len() != before;
        if subs.is_empty() {
            self.emission.remove(source);
        }
        removed
    }

    /// Add a reception listener. Returns `false` if it was already present.
    pub(crate) fn receive(&mut self, target: &ObjectId, listener: ListenerId) -> bool {
        let listeners = self.reception.entry(target.clone()).or_default();
        if listeners.contains(&listener) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Remove a reception listener. Returns `false` if it was not present.
    pub(crate) fn stop_receiving(&mut self, target: &ObjectId, listener: ListenerId) -> bool {
        let Some(listeners) = self.reception.get_mut(target) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| *l != listener);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.reception.remove(target);
        }
        removed
    }

    /// Emission subscribers of an object, in subscription order.
    pub(crate) fn subscribers(&self, source: &ObjectId) -> &[Subscriber] {
        self.emission.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reception listeners of an object, in subscription order.
    pub(crate) fn receivers(&self, target: &ObjectId) -> &[ListenerId] {
        self.reception.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Expand an emission from `source` into the listeners to call.
    ///
    /// Listeners already in `delivered` are skipped, and every listener
    /// returned is added to it. Forwarded objects are expanded breadth-first
    /// after the source's own subscribers.
    pub(crate) fn plan(
        &self,
        source: &ObjectId,
        delivered: &mut HashSet<ListenerId>,
    ) -> Vec<ListenerId> {
        let mut out = Vec::new();
        let mut expanded: HashSet<&ObjectId> = HashSet::new();
        let mut pending: VecDeque<&ObjectId> = VecDeque::new();
        expanded.insert(source);
        pending.push_back(source);

        while let Some(current) = pending.pop_front() {
            for subscriber in self.subscribers(current) {
                match subscriber {
                    Subscriber::Listener(listener) => {
                        if delivered.insert(*listener) {
                            out.push(*listener);
                        }
                    }
                    Subscriber::Receiver(target) => {
                        for listener in self.receivers(target) {
                            if delivered.insert(*listener) {
                                out.push(*listener);
                            }
                        }
                    }
                    Subscriber::Forward(target) => {
                        if expanded.insert(target) {
                            pending.push_back(target);
                        }
                    }
                }
            }
        }
        out
    }

    /// Drop every subscription keyed by or pointing at `id`.
    pub(crate) fn remove_object(&mut self, id: &ObjectId) {
        self.emission.remove(id);
        self.reception.remove(id);
        self.emission.retain(|_, subs| {
            subs.retain(|s| s.target() != Some(id));
            !subs.is_empty()
        });
    }

    /// Drop every subscription of one listener.
    pub(crate) fn remove_listener(&mut self, listener: ListenerId) {
        let as_subscriber = Subscriber::Listener(listener);
        self.emission.retain(|_, subs| {
            subs.retain(|s| *s != as_subscriber);
            !subs.is_empty()
        });
        self.reception.retain(|_, listeners| {
            listeners.retain(|l| *l != listener);
            !listeners.is_empty()
        });
    }

    /// Whether anything is keyed by or points at `id`.
    #[cfg(test)]
    pub(crate) fn mentions(&self, id: &ObjectId) -> bool {
        self.emission.contains_key(id)
            || self.reception.contains_key(id)
            || self
                .emission
                .values()
                .any(|subs| subs.iter().any(|s| s.target() == Some(id)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
