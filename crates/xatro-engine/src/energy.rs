//! Energy accounting.
//!
//! A bot's energy is the list of energy object ids in its `energy` attribute.
//! Units promised to an action that is still executing are recorded in the
//! bot's envelope under [`RESERVED_ENERGY_KEY`] and do not count as
//! available until the action finishes.
//!
//! Every unit made by [`create_energy`] watches its own destruction. When it
//! goes, however that happens, it is taken out of its holder's list and its
//! creator's [`CREATED_ENERGY_ATTR`] count drops by one.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;
use tracing::trace;
use xatro_world::envelope::Envelope;
use xatro_world::event::Event;
use xatro_world::id::{ListenerId, ObjectId};
use xatro_world::world::World;

use crate::EngineError;

/// List attribute holding energy object ids.
pub const ENERGY_ATTR: &str = "energy";

/// Number of units a bot has created that still exist.
pub const CREATED_ENERGY_ATTR: &str = "created_energy";

/// Envelope key for the number of units reserved by executing actions.
pub const RESERVED_ENERGY_KEY: &str = "reserved_energy";

/// Unit-envelope key naming the current holder.
const HOLDER_KEY: &str = "holder";

/// The live energy units an object holds, oldest first.
pub fn live_units(world: &World, id: &ObjectId) -> Result<Vec<ObjectId>, EngineError> {
    Ok(world
        .get(id)?
        .item_ids(ENERGY_ATTR)
        .into_iter()
        .filter(|unit| world.contains(unit))
        .collect())
}

/// Number of live energy units an object holds.
pub fn held_energy(world: &World, id: &ObjectId) -> Result<u32, EngineError> {
    let held = live_units(world, id)?.len();
    Ok(u32::try_from(held).unwrap_or(u32::MAX))
}

/// Held units minus those reserved by executing actions.
pub fn available_energy(world: &World, id: &ObjectId) -> Result<u32, EngineError> {
    let held = held_energy(world, id)?;
    let reserved = reserved_in(&world.envelope(id)?);
    Ok(held.saturating_sub(reserved))
}

// ---------------------------------------------------------------------------
// Unit lifecycle
// ---------------------------------------------------------------------------

/// Create one unit of energy, held by and credited to `creator`.
pub fn create_energy(world: &World, creator: &ObjectId) -> Result<ObjectId, EngineError> {
    let created = world.get(creator)?.get_i64(CREATED_ENERGY_ATTR).unwrap_or(0);
    let unit = world.create("energy").id();
    let envelope = world.envelope(&unit)?;
    envelope.insert(HOLDER_KEY, creator);

    let me: Rc<Cell<Option<ListenerId>>> = Rc::new(Cell::new(None));
    let listener = {
        let (me, unit, creator) = (Rc::clone(&me), unit.clone(), creator.clone());
        world.listener(move |w, ev| {
            if !matches!(ev, Event::Destroyed { id } if *id == unit) {
                return Ok(());
            }
            if let Some(holder) = envelope.get(HOLDER_KEY).as_ref().and_then(Value::as_str) {
                let holder = ObjectId::from(holder);
                if w.get(&holder).is_ok_and(|h| h.item_ids(ENERGY_ATTR).contains(&unit)) {
                    w.remove_item(&holder, ENERGY_ATTR, &unit)?;
                }
            }
            if let Ok(obj) = w.get(&creator) {
                let left = obj.get_i64(CREATED_ENERGY_ATTR).unwrap_or(0);
                if left > 0 {
                    w.set_attr(&creator, CREATED_ENERGY_ATTR, left - 1)?;
                }
            }
            trace!(unit = %unit, "energy unit gone");
            if let Some(me) = me.take() {
                w.drop_listener(me);
            }
            Ok(())
        })
    };
    me.set(Some(listener));
    world.subscribe_to(&unit, listener)?;

    world.add_item(creator, ENERGY_ATTR, &unit)?;
    world.set_attr(creator, CREATED_ENERGY_ATTR, created + 1)?;
    Ok(unit)
}

/// Move `unit` from `from`'s list to `to`'s.
pub(crate) fn hand_over(
    world: &World,
    unit: &ObjectId,
    from: &ObjectId,
    to: &ObjectId,
) -> Result<(), EngineError> {
    world.remove_item(from, ENERGY_ATTR, unit)?;
    world.add_item(to, ENERGY_ATTR, unit)?;
    world.envelope(unit)?.insert(HOLDER_KEY, to);
    Ok(())
}

fn reserved_in(envelope: &Envelope) -> u32 {
    envelope
        .get(RESERVED_ENERGY_KEY)
        .as_ref()
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// EnergyReservation
// ---------------------------------------------------------------------------

/// Energy held back for one executing action. Released on drop.
#[derive(Debug)]
pub(crate) struct EnergyReservation {
    envelope: Envelope,
    amount: u32,
    released: bool,
}

impl EnergyReservation {
    /// Reserve `amount` units of `id`'s energy. The caller checks
    /// availability first.
    pub(crate) fn reserve(world: &World, id: &ObjectId, amount: u32) -> Result<Self, EngineError> {
        let envelope = world.envelope(id)?;
        let total = reserved_in(&envelope).saturating_add(amount);
        envelope.insert(RESERVED_ENERGY_KEY, total);
        Ok(Self {
            envelope,
            amount,
            released: false,
        })
    }

    /// Give the units back.
    pub(crate) fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let left = reserved_in(&self.envelope).saturating_sub(self.amount);
        if left == 0 {
            self.envelope.remove(RESERVED_ENERGY_KEY);
        } else {
            self.envelope.insert(RESERVED_ENERGY_KEY, left);
        }
    }
}

impl Drop for EnergyReservation {
    fn drop(&mut self) {
        self.give_back();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bot_with_energy(world: &World, units: usize) -> ObjectId {
        let bot = world.create("bot").id();
        for _ in 0..units {
            let e = world.create("energy").id();
            world.add_item(&bot, ENERGY_ATTR, &e).unwrap();
        }
        bot
    }

    #[test]
    fn reservations_stack_and_release() {
        let world = World::default();
        let bot = bot_with_energy(&world, 3);
        assert_eq!(available_energy(&world, &bot), Ok(3));

        let first = EnergyReservation::reserve(&world, &bot, 2).unwrap();
        let second = EnergyReservation::reserve(&world, &bot, 1).unwrap();
        assert_eq!(available_energy(&world, &bot), Ok(0));
        assert_eq!(held_energy(&world, &bot), Ok(3));

        first.release();
        assert_eq!(available_energy(&world, &bot), Ok(2));
        drop(second);
        assert_eq!(available_energy(&world, &bot), Ok(3));
        assert!(world.envelope(&bot).unwrap().is_empty());
    }

    #[test]
    fn unknown_object() {
        let world = World::default();
        let ghost = ObjectId::from("ghost");
        assert!(matches!(
            available_energy(&world, &ghost),
            Err(EngineError::World(_))
        ));
    }

    #[test]
    fn destroyed_units_leave_their_holder() {
        let world = World::default();
        let bot = world.create("bot").id();
        let first = create_energy(&world, &bot).unwrap();
        let second = create_energy(&world, &bot).unwrap();
        assert_eq!(held_energy(&world, &bot), Ok(2));
        assert_eq!(world.get(&bot).unwrap().get_i64(CREATED_ENERGY_ATTR), Some(2));

        world.destroy(&first).unwrap();
        assert_eq!(held_energy(&world, &bot), Ok(1));
        assert_eq!(world.get(&bot).unwrap().item_ids(ENERGY_ATTR), vec![second]);
        assert_eq!(world.get(&bot).unwrap().get_i64(CREATED_ENERGY_ATTR), Some(1));
    }

    #[test]
    fn handed_over_units_are_tracked_at_the_new_holder() {
        let world = World::default();
        let maker = world.create("bot").id();
        let keeper = world.create("bot").id();
        let unit = create_energy(&world, &maker).unwrap();
        hand_over(&world, &unit, &maker, &keeper).unwrap();

        world.destroy(&unit).unwrap();
        assert_eq!(held_energy(&world, &keeper), Ok(0));
        assert!(world.get(&keeper).unwrap().items(ENERGY_ATTR).is_empty());
        assert_eq!(world.get(&maker).unwrap().get_i64(CREATED_ENERGY_ATTR), Some(0));
    }

    #[test]
    fn untracked_dead_units_are_not_counted() {
        let world = World::default();
        let bot = bot_with_energy(&world, 2);
        let stale = world.get(&bot).unwrap().item_ids(ENERGY_ATTR)[0].clone();
        world.destroy(&stale).unwrap();
        assert_eq!(held_energy(&world, &bot), Ok(1));
        assert_eq!(live_units(&world, &bot).unwrap().len(), 1);
    }

    #[test]
    fn release_after_destroy_is_harmless() {
        let world = World::default();
        let bot = bot_with_energy(&world, 1);
        let held = EnergyReservation::reserve(&world, &bot, 1).unwrap();
        world.destroy(&bot).unwrap();
        drop(held);
    }
}
