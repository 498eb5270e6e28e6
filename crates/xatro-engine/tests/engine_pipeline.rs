//! Integration tests for the engine pipeline with asynchronous actions.
//!
//! An action may return a future that completes only when the world later
//! reaches some condition. These tests poll such executions by hand to check
//! what the world looks like while the action is in flight, and after it
//! succeeds, fails or is abandoned.

use std::marker::PhantomData;

use futures::executor::block_on;
use futures::FutureExt;
use serde_json::{json, Value};
use xatro_engine::prelude::*;

// ---------------------------------------------------------------------------
// Test actions and rules
// ---------------------------------------------------------------------------

/// Waits for the next hp change of `target`. Succeeds (recording the value
/// on the subject) unless the new hp is zero.
struct AwaitHp {
    id: ActionId,
    subject: ObjectId,
    target: ObjectId,
}

impl AwaitHp {
    fn new(subject: &ObjectId, target: &ObjectId) -> Self {
        Self {
            id: ActionId::new(),
            subject: subject.clone(),
            target: target.clone(),
        }
    }
}

impl Action for AwaitHp {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "await_hp"
    }

    fn subject(&self) -> ObjectId {
        self.subject.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        let wait = match world.on_next_change(&self.target, "hp") {
            Ok(wait) => wait,
            Err(e) => return Execution::Done(Err(e.into())),
        };
        let world = world.clone();
        let subject = self.subject.clone();
        Execution::pending(async move {
            let hp = wait.await?;
            if hp == json!(0) {
                return Err(EngineError::not_allowed("target died"));
            }
            world.set_attr(&subject, "seen_hp", hp.clone())?;
            Ok(hp)
        })
    }
}

/// Allows everything and charges a fixed energy cost.
struct Costly<A> {
    energy: u32,
    _action: PhantomData<A>,
}

impl<A> Costly<A> {
    fn new(energy: u32) -> Self {
        Self {
            energy,
            _action: PhantomData,
        }
    }
}

impl<A: Action> Rules for Costly<A> {
    type Action = A;

    fn is_allowed(&self, _: &World, _: &A) -> Result<(), EngineError> {
        Ok(())
    }

    fn energy_requirement(&self, _: &World, _: &A) -> Result<u32, EngineError> {
        Ok(self.energy)
    }
}

fn bot_with_energy(world: &World, units: usize) -> ObjectId {
    let bot = world.create("bot").id();
    for _ in 0..units {
        let unit = world.create("energy").id();
        world.add_item(&bot, ENERGY_ATTR, &unit).unwrap();
    }
    bot
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn async_success_consumes_energy_on_completion() {
    let world = World::default();
    let bot = bot_with_energy(&world, 3);
    let target = world.create("thing").id();
    let engine = Engine::new(Costly::new(2));
    let action = AwaitHp::new(&bot, &target);

    let mut running = Box::pin(engine.execute(&world, &action));
    assert!((&mut running).now_or_never().is_none());

    // In flight: units are reserved, none consumed.
    assert_eq!(held_energy(&world, &bot), Ok(3));
    assert_eq!(available_energy(&world, &bot), Ok(1));

    world.set_attr(&target, "hp", 7).unwrap();
    assert_eq!(running.now_or_never(), Some(Ok(json!(7))));
    assert_eq!(held_energy(&world, &bot), Ok(1));
    assert_eq!(available_energy(&world, &bot), Ok(1));
    assert_eq!(world.get(&bot).unwrap()["seen_hp"], json!(7));
}

#[test]
fn async_failure_leaves_energy_untouched() {
    let world = World::default();
    let bot = bot_with_energy(&world, 2);
    let target = world.create("thing").id();
    let engine = Engine::new(Costly::new(2));
    let action = AwaitHp::new(&bot, &target);

    let mut running = Box::pin(engine.execute(&world, &action));
    assert!((&mut running).now_or_never().is_none());
    world.set_attr(&target, "hp", 0).unwrap();

    assert_eq!(
        running.now_or_never(),
        Some(Err(EngineError::not_allowed("target died")))
    );
    assert_eq!(held_energy(&world, &bot), Ok(2));
    assert_eq!(available_energy(&world, &bot), Ok(2));
}

#[test]
fn destroyed_target_abandons_action() {
    let world = World::default();
    let bot = bot_with_energy(&world, 1);
    let target = world.create("thing").id();
    let engine = Engine::new(Costly::new(1));
    let action = AwaitHp::new(&bot, &target);

    let mut running = Box::pin(engine.execute(&world, &action));
    assert!((&mut running).now_or_never().is_none());
    world.destroy(&target).unwrap();

    assert_eq!(
        running.now_or_never(),
        Some(Err(EngineError::World(WorldError::Abandoned { id: target })))
    );
    assert_eq!(held_energy(&world, &bot), Ok(1));
}

#[test]
fn reserved_energy_cannot_be_spent_twice() {
    let world = World::default();
    let bot = bot_with_energy(&world, 2);
    let target = world.create("thing").id();
    let engine = Engine::new(Costly::new(2));

    let first = AwaitHp::new(&bot, &target);
    let mut running = Box::pin(engine.execute(&world, &first));
    assert!((&mut running).now_or_never().is_none());

    let second = AwaitHp::new(&bot, &target);
    assert_eq!(
        block_on(engine.execute(&world, &second)),
        Err(EngineError::NotEnoughEnergy { required: 2, available: 0 })
    );

    world.set_attr(&target, "hp", 4).unwrap();
    assert_eq!(running.now_or_never(), Some(Ok(json!(4))));
    assert_eq!(held_energy(&world, &bot), Ok(0));
}

#[test]
fn dropping_a_running_action_releases_reservation() {
    let world = World::default();
    let bot = bot_with_energy(&world, 2);
    let target = world.create("thing").id();
    let engine = Engine::new(Costly::new(2));
    let action = AwaitHp::new(&bot, &target);

    let mut running = Box::pin(engine.execute(&world, &action));
    assert!((&mut running).now_or_never().is_none());
    assert_eq!(available_energy(&world, &bot), Ok(0));
    assert_eq!(world.pending_waits(&target), 1);

    drop(running);
    assert_eq!(available_energy(&world, &bot), Ok(2));
    assert_eq!(world.pending_waits(&target), 0);
}

#[test]
fn not_enough_energy_scenario() {
    let world = World::default();
    let bot = bot_with_energy(&world, 1);
    let target = world.create("thing").id();
    let engine = Engine::new(Costly::new(2));

    let result = block_on(engine.execute(&world, &AwaitHp::new(&bot, &target)));
    assert_eq!(result, Err(EngineError::NotEnoughEnergy { required: 2, available: 1 }));
    assert_eq!(held_energy(&world, &bot), Ok(1));
    assert_eq!(world.pending_waits(&target), 0);
}

#[test]
fn action_performed_is_emitted_by_subject() {
    let journal = std::rc::Rc::new(std::cell::RefCell::new(EventJournal::new()));
    let world = World::new(EventJournal::recorder(&journal));
    let bot = bot_with_energy(&world, 0);
    let target = world.create("thing").id();
    let engine = Engine::new(Costly::new(0));
    let action = AwaitHp::new(&bot, &target);

    let mut running = Box::pin(engine.execute(&world, &action));
    assert!((&mut running).now_or_never().is_none());
    assert_eq!(journal.borrow().events_tagged("action_performed").count(), 0);

    world.set_attr(&target, "hp", 1).unwrap();
    assert!(running.now_or_never().is_some());

    let journal = journal.borrow();
    let performed: Vec<&Event> = journal
        .events_tagged("action_performed")
        .map(|e| &e.event)
        .collect();
    assert_eq!(performed.len(), 1);
    match performed[0] {
        Event::ActionPerformed { action: record } => {
            assert_eq!(record.name, "await_hp");
            assert_eq!(record.subject, bot);
            assert_eq!(record.action_id, action.id());
            assert_eq!(record.detail, Value::Null);
        }
        other => panic!("unexpected event {other}"),
    }
}
