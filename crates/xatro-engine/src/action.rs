//! The [`Action`] trait and the standard actions.
//!
//! An action is a value describing one thing an actor wants to do. It names
//! its subject (the actor whose permissions and energy are checked), the
//! objects credited with emitting the resulting `ActionPerformed` event, and
//! how to perform the change. Execution may finish immediately or return a
//! future that completes when the world later reaches some condition.

use std::future::Future;

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::{json, Value};
use xatro_world::event::ActionRecord;
use xatro_world::id::{ActionId, ObjectId};
use xatro_world::object::KIND_ATTR;
use xatro_world::subscription::Subscriber;
use xatro_world::world::World;

use crate::energy::{available_energy, create_energy, hand_over, live_units, ENERGY_ATTR};
use crate::EngineError;

/// Action-envelope key holding a proof-of-work solution.
pub const WORK_SOLUTION_KEY: &str = "work_solution";

/// Number of locks on a pylon.
pub const LOCKS_ATTR: &str = "locks";

/// The bot a portal was opened for.
pub const PORTAL_USER_ATTR: &str = "portal_user";

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Outcome of starting an action.
pub enum Execution {
    /// Finished synchronously.
    Done(Result<Value, EngineError>),
    /// Finishes when the future does.
    Pending(LocalBoxFuture<'static, Result<Value, EngineError>>),
}

impl Execution {
    /// Wrap a future that completes the action later.
    pub fn pending(future: impl Future<Output = Result<Value, EngineError>> + 'static) -> Self {
        Execution::Pending(future.boxed_local())
    }

    /// Wait for the outcome.
    pub async fn resolve(self) -> Result<Value, EngineError> {
        match self {
            Execution::Done(result) => result,
            Execution::Pending(future) => future.await,
        }
    }
}

impl From<Result<Value, EngineError>> for Execution {
    fn from(result: Result<Value, EngineError>) -> Self {
        Execution::Done(result)
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Execution::Done(result) => f.debug_tuple("Done").field(result).finish(),
            Execution::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Something an actor can ask the engine to do.
pub trait Action {
    /// Identity of this action instance; keys its envelope.
    fn id(&self) -> ActionId;

    /// Short name, used in `ActionPerformed` records and logs.
    fn name(&self) -> &'static str;

    /// The actor whose permissions and energy are checked.
    fn subject(&self) -> ObjectId;

    /// Objects credited with emitting the `ActionPerformed` event.
    fn emitters(&self) -> Vec<ObjectId> {
        vec![self.subject()]
    }

    /// Perform the change.
    fn execute(&self, world: &World) -> Execution;

    /// Action-specific fields for the `ActionPerformed` record.
    fn detail(&self) -> Value {
        Value::Null
    }

    fn record(&self) -> ActionRecord {
        ActionRecord {
            action_id: self.id(),
            name: self.name().to_owned(),
            subject: self.subject(),
            emitters: self.emitters(),
            detail: self.detail(),
        }
    }
}

// ---------------------------------------------------------------------------
// Move
// ---------------------------------------------------------------------------

/// Put `thing` on square `dst`, taking it off its current square if any.
///
/// The thing and the square hear each other: each is subscribed as a
/// receiver of the other's emissions and of its own.
#[derive(Debug, Clone)]
pub struct Move {
    id: ActionId,
    pub thing: ObjectId,
    pub dst: ObjectId,
}

impl Move {
    pub fn new(thing: ObjectId, dst: ObjectId) -> Self {
        Self {
            id: ActionId::new(),
            thing,
            dst,
        }
    }

    fn apply(&self, world: &World) -> Result<Value, EngineError> {
        let thing = world.get(&self.thing)?;
        world.get(&self.dst)?;

        if let Some(src) = thing.get_str("location").map(ObjectId::from) {
            if world.contains(&src) {
                world.remove_item(&src, "contents", &self.thing)?;
                world.unsubscribe_from(&src, Subscriber::Receiver(self.thing.clone()))?;
                world.unsubscribe_from(&self.thing, Subscriber::Receiver(src.clone()))?;
            }
        }

        world.set_attr(&self.thing, "location", &self.dst)?;
        world.add_item(&self.dst, "contents", &self.thing)?;

        world.subscribe_to(&self.dst, Subscriber::Receiver(self.dst.clone()))?;
        world.subscribe_to(&self.dst, Subscriber::Receiver(self.thing.clone()))?;
        world.subscribe_to(&self.thing, Subscriber::Receiver(self.dst.clone()))?;
        world.subscribe_to(&self.thing, Subscriber::Receiver(self.thing.clone()))?;
        Ok(Value::Null)
    }
}

impl Action for Move {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "move"
    }

    fn subject(&self) -> ObjectId {
        self.thing.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }

    fn detail(&self) -> Value {
        json!({ "dst": self.dst })
    }
}

// ---------------------------------------------------------------------------
// Charge
// ---------------------------------------------------------------------------

/// Create one unit of energy held by `bot`. The unit counts towards the
/// bot's `created_energy` until it is destroyed.
#[derive(Debug, Clone)]
pub struct Charge {
    id: ActionId,
    pub bot: ObjectId,
}

impl Charge {
    pub fn new(bot: ObjectId) -> Self {
        Self {
            id: ActionId::new(),
            bot,
        }
    }

    fn apply(&self, world: &World) -> Result<Value, EngineError> {
        let energy = create_energy(world, &self.bot)?;
        Ok(Value::from(energy))
    }
}

impl Action for Charge {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "charge"
    }

    fn subject(&self) -> ObjectId {
        self.bot.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }
}

// ---------------------------------------------------------------------------
// ConsumeEnergy
// ---------------------------------------------------------------------------

/// Destroy `amount` units of `subject`'s energy, oldest first.
#[derive(Debug, Clone)]
pub struct ConsumeEnergy {
    id: ActionId,
    pub subject: ObjectId,
    pub amount: u32,
}

impl ConsumeEnergy {
    pub fn new(subject: ObjectId, amount: u32) -> Self {
        Self {
            id: ActionId::new(),
            subject,
            amount,
        }
    }

    /// Consume the energy. Nothing changes unless `amount` units are
    /// available.
    pub fn apply(&self, world: &World) -> Result<Value, EngineError> {
        let units = take_units(world, &self.subject, self.amount)?;
        for unit in &units {
            world.remove_item(&self.subject, ENERGY_ATTR, unit)?;
            world.destroy(unit)?;
        }
        Ok(Value::from(units.len()))
    }
}

impl Action for ConsumeEnergy {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "consume_energy"
    }

    fn subject(&self) -> ObjectId {
        self.subject.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }

    fn detail(&self) -> Value {
        json!({ "amount": self.amount })
    }
}

// ---------------------------------------------------------------------------
// ShareEnergy
// ---------------------------------------------------------------------------

/// Hand `amount` units of energy from `giver` to `receiver`.
#[derive(Debug, Clone)]
pub struct ShareEnergy {
    id: ActionId,
    pub giver: ObjectId,
    pub receiver: ObjectId,
    pub amount: u32,
}

impl ShareEnergy {
    pub fn new(giver: ObjectId, receiver: ObjectId, amount: u32) -> Self {
        Self {
            id: ActionId::new(),
            giver,
            receiver,
            amount,
        }
    }

    fn apply(&self, world: &World) -> Result<Value, EngineError> {
        world.get(&self.receiver)?;
        let units = take_units(world, &self.giver, self.amount)?;
        for unit in &units {
            hand_over(world, unit, &self.giver, &self.receiver)?;
        }
        Ok(Value::from(units.len()))
    }
}

impl Action for ShareEnergy {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "share_energy"
    }

    fn subject(&self) -> ObjectId {
        self.giver.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }

    fn detail(&self) -> Value {
        json!({ "receiver": self.receiver, "amount": self.amount })
    }
}

// ---------------------------------------------------------------------------
// Shoot
// ---------------------------------------------------------------------------

/// Take `damage` hp from `target`, never going below zero.
#[derive(Debug, Clone)]
pub struct Shoot {
    id: ActionId,
    pub shooter: ObjectId,
    pub target: ObjectId,
    pub damage: u32,
}

impl Shoot {
    pub fn new(shooter: ObjectId, target: ObjectId, damage: u32) -> Self {
        Self {
            id: ActionId::new(),
            shooter,
            target,
            damage,
        }
    }

    fn apply(&self, world: &World) -> Result<Value, EngineError> {
        let hp = world.get(&self.target)?.get_i64("hp").unwrap_or(0);
        let left = (hp - i64::from(self.damage)).max(0);
        world.set_attr(&self.target, "hp", left)?;
        Ok(Value::from(left))
    }
}

impl Action for Shoot {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "shoot"
    }

    fn subject(&self) -> ObjectId {
        self.shooter.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }

    fn detail(&self) -> Value {
        json!({ "target": self.target, "damage": self.damage })
    }
}

// ---------------------------------------------------------------------------
// Portals
// ---------------------------------------------------------------------------

/// Turn the ore `ore` into a portal that `user` can land through.
#[derive(Debug, Clone)]
pub struct OpenPortal {
    id: ActionId,
    pub thing: ObjectId,
    pub ore: ObjectId,
    pub user: ObjectId,
}

impl OpenPortal {
    pub fn new(thing: ObjectId, ore: ObjectId, user: ObjectId) -> Self {
        Self {
            id: ActionId::new(),
            thing,
            ore,
            user,
        }
    }

    fn apply(&self, world: &World) -> Result<Value, EngineError> {
        world.get(&self.user)?;
        world.set_attr(&self.ore, KIND_ATTR, "portal")?;
        world.set_attr(&self.ore, PORTAL_USER_ATTR, &self.user)?;
        Ok(Value::Null)
    }
}

impl Action for OpenPortal {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "open_portal"
    }

    fn subject(&self) -> ObjectId {
        self.thing.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }

    fn detail(&self) -> Value {
        json!({ "ore": self.ore, "user": self.user })
    }
}

/// Land `thing` on the square holding `portal`. The portal is used up.
#[derive(Debug, Clone)]
pub struct UsePortal {
    id: ActionId,
    pub thing: ObjectId,
    pub portal: ObjectId,
}

impl UsePortal {
    pub fn new(thing: ObjectId, portal: ObjectId) -> Self {
        Self {
            id: ActionId::new(),
            thing,
            portal,
        }
    }

    fn apply(&self, world: &World) -> Result<Value, EngineError> {
        let portal = world.get(&self.portal)?;
        let square = portal
            .get_str("location")
            .map(ObjectId::from)
            .ok_or_else(|| EngineError::not_allowed("That portal is not on the board"))?;

        Move::new(self.thing.clone(), square.clone()).apply(world)?;
        if world.get(&square)?.item_ids("contents").contains(&self.portal) {
            world.remove_item(&square, "contents", &self.portal)?;
        }
        world.destroy(&self.portal)?;
        Ok(Value::from(square))
    }
}

impl Action for UsePortal {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "use_portal"
    }

    fn subject(&self) -> ObjectId {
        self.thing.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }

    fn detail(&self) -> Value {
        json!({ "portal": self.portal })
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

/// Put one more lock on `target`.
#[derive(Debug, Clone)]
pub struct AddLock {
    id: ActionId,
    pub doer: ObjectId,
    pub target: ObjectId,
}

impl AddLock {
    pub fn new(doer: ObjectId, target: ObjectId) -> Self {
        Self {
            id: ActionId::new(),
            doer,
            target,
        }
    }

    fn apply(&self, world: &World) -> Result<Value, EngineError> {
        let locks = world.get(&self.target)?.get_i64(LOCKS_ATTR).unwrap_or(0) + 1;
        world.set_attr(&self.target, LOCKS_ATTR, locks)?;
        Ok(Value::from(locks))
    }
}

impl Action for AddLock {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "add_lock"
    }

    fn subject(&self) -> ObjectId {
        self.doer.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }

    fn detail(&self) -> Value {
        json!({ "target": self.target })
    }
}

/// Break one lock on `target`, never going below zero.
#[derive(Debug, Clone)]
pub struct BreakLock {
    id: ActionId,
    pub doer: ObjectId,
    pub target: ObjectId,
}

impl BreakLock {
    pub fn new(doer: ObjectId, target: ObjectId) -> Self {
        Self {
            id: ActionId::new(),
            doer,
            target,
        }
    }

    fn apply(&self, world: &World) -> Result<Value, EngineError> {
        let locks = world.get(&self.target)?.get_i64(LOCKS_ATTR).unwrap_or(0);
        let left = (locks - 1).max(0);
        world.set_attr(&self.target, LOCKS_ATTR, left)?;
        Ok(Value::from(left))
    }
}

impl Action for BreakLock {
    fn id(&self) -> ActionId {
        self.id
    }

    fn name(&self) -> &'static str {
        "break_lock"
    }

    fn subject(&self) -> ObjectId {
        self.doer.clone()
    }

    fn execute(&self, world: &World) -> Execution {
        self.apply(world).into()
    }

    fn detail(&self) -> Value {
        json!({ "target": self.target })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The first `amount` live energy ids of `owner`, or `NotEnoughEnergy`.
fn take_units(world: &World, owner: &ObjectId, amount: u32) -> Result<Vec<ObjectId>, EngineError> {
    let available = available_energy(world, owner)?;
    if available < amount {
        return Err(EngineError::NotEnoughEnergy {
            required: amount,
            available,
        });
    }
    Ok(live_units(world, owner)?
        .into_iter()
        .take(amount as usize)
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn run(world: &World, action: &impl Action) -> Result<Value, EngineError> {
        block_on(action.execute(world).resolve())
    }

    fn charged_bot(world: &World, units: usize) -> ObjectId {
        let bot = world.create("bot").id();
        for _ in 0..units {
            run(world, &Charge::new(bot.clone())).unwrap();
        }
        bot
    }

    #[test]
    fn move_sets_location_and_contents() {
        let world = World::default();
        let a = world.create("square").id();
        let b = world.create("square").id();
        let bot = world.create("bot").id();

        run(&world, &Move::new(bot.clone(), a.clone())).unwrap();
        assert_eq!(world.get(&bot).unwrap().get_str("location"), Some(a.as_str()));
        assert_eq!(world.get(&a).unwrap().item_ids("contents"), vec![bot.clone()]);

        run(&world, &Move::new(bot.clone(), b.clone())).unwrap();
        assert_eq!(world.get(&bot).unwrap().get_str("location"), Some(b.as_str()));
        assert!(world.get(&a).unwrap().item_ids("contents").is_empty());
        assert_eq!(world.get(&b).unwrap().item_ids("contents"), vec![bot]);
    }

    #[test]
    fn charge_creates_energy() {
        let world = World::default();
        let bot = charged_bot(&world, 2);
        let held = world.get(&bot).unwrap().item_ids(ENERGY_ATTR);
        assert_eq!(held.len(), 2);
        assert!(held.iter().all(|e| world.get(e).unwrap().kind() == Some("energy")));
    }

    #[test]
    fn consume_destroys_oldest_units() {
        let world = World::default();
        let bot = charged_bot(&world, 3);
        let held = world.get(&bot).unwrap().item_ids(ENERGY_ATTR);

        run(&world, &ConsumeEnergy::new(bot.clone(), 2)).unwrap();
        assert_eq!(world.get(&bot).unwrap().item_ids(ENERGY_ATTR), vec![held[2].clone()]);
        assert!(!world.contains(&held[0]));
        assert!(!world.contains(&held[1]));
    }

    #[test]
    fn destroyed_unit_no_longer_pays_for_anything() {
        let world = World::default();
        let bot = charged_bot(&world, 2);
        let held = world.get(&bot).unwrap().item_ids(ENERGY_ATTR);
        world.destroy(&held[0]).unwrap();

        assert_eq!(world.get(&bot).unwrap().item_ids(ENERGY_ATTR), vec![held[1].clone()]);
        assert_eq!(
            run(&world, &ConsumeEnergy::new(bot.clone(), 2)),
            Err(EngineError::NotEnoughEnergy { required: 2, available: 1 })
        );
        run(&world, &ConsumeEnergy::new(bot.clone(), 1)).unwrap();
        assert_eq!(world.get(&bot).unwrap().get_i64("created_energy"), Some(0));
    }

    #[test]
    fn consume_is_all_or_nothing() {
        let world = World::default();
        let bot = charged_bot(&world, 1);
        assert_eq!(
            run(&world, &ConsumeEnergy::new(bot.clone(), 2)),
            Err(EngineError::NotEnoughEnergy { required: 2, available: 1 })
        );
        assert_eq!(world.get(&bot).unwrap().items(ENERGY_ATTR).len(), 1);
    }

    #[test]
    fn share_moves_units() {
        let world = World::default();
        let giver = charged_bot(&world, 2);
        let receiver = world.create("bot").id();
        run(&world, &ShareEnergy::new(giver.clone(), receiver.clone(), 1)).unwrap();
        assert_eq!(world.get(&giver).unwrap().items(ENERGY_ATTR).len(), 1);
        assert_eq!(world.get(&receiver).unwrap().items(ENERGY_ATTR).len(), 1);
    }

    #[test]
    fn shoot_floors_at_zero() {
        let world = World::default();
        let shooter = world.create("bot").id();
        let target = world.create("bot").id();
        world.set_attr(&target, "hp", 3).unwrap();
        assert_eq!(run(&world, &Shoot::new(shooter.clone(), target.clone(), 2)), Ok(json!(1)));
        assert_eq!(run(&world, &Shoot::new(shooter, target.clone(), 5)), Ok(json!(0)));
        assert_eq!(world.get(&target).unwrap()["hp"], json!(0));
    }

    #[test]
    fn portal_lands_its_user_and_is_used_up() {
        let world = World::default();
        let square = world.create("square").id();
        let opener = world.create("bot").id();
        let ore = world.create("ore").id();
        let newcomer = world.create("bot").id();
        run(&world, &Move::new(opener.clone(), square.clone())).unwrap();
        run(&world, &Move::new(ore.clone(), square.clone())).unwrap();

        run(&world, &OpenPortal::new(opener.clone(), ore.clone(), newcomer.clone())).unwrap();
        assert_eq!(world.get(&ore).unwrap().kind(), Some("portal"));
        assert_eq!(world.get(&ore).unwrap().get_str(PORTAL_USER_ATTR), Some(newcomer.as_str()));

        assert_eq!(run(&world, &UsePortal::new(newcomer.clone(), ore.clone())), Ok(json!(square)));
        assert_eq!(world.get(&newcomer).unwrap().get_str("location"), Some(square.as_str()));
        assert!(!world.contains(&ore));
        assert_eq!(world.get(&square).unwrap().item_ids("contents"), vec![opener, newcomer]);
    }

    #[test]
    fn portal_off_the_board_goes_nowhere() {
        let world = World::default();
        let portal = world.create("portal").id();
        let bot = world.create("bot").id();
        assert_eq!(
            run(&world, &UsePortal::new(bot.clone(), portal.clone())),
            Err(EngineError::not_allowed("That portal is not on the board"))
        );
        assert!(world.contains(&portal));
        assert!(world.get(&bot).unwrap().get("location").is_none());
    }

    #[test]
    fn locks_count_up_and_down_to_zero() {
        let world = World::default();
        let bot = world.create("bot").id();
        let pylon = world.create("pylon").id();
        assert_eq!(run(&world, &AddLock::new(bot.clone(), pylon.clone())), Ok(json!(1)));
        assert_eq!(run(&world, &AddLock::new(bot.clone(), pylon.clone())), Ok(json!(2)));
        assert_eq!(run(&world, &BreakLock::new(bot.clone(), pylon.clone())), Ok(json!(1)));
        assert_eq!(run(&world, &BreakLock::new(bot.clone(), pylon.clone())), Ok(json!(0)));
        assert_eq!(run(&world, &BreakLock::new(bot, pylon.clone())), Ok(json!(0)));
        assert_eq!(world.get(&pylon).unwrap().get_i64(LOCKS_ATTR), Some(0));
    }

    #[test]
    fn record_carries_detail() {
        let shot = Shoot::new(ObjectId::from("a"), ObjectId::from("b"), 2);
        let record = shot.record();
        assert_eq!(record.name, "shoot");
        assert_eq!(record.subject, ObjectId::from("a"));
        assert_eq!(record.emitters, vec![ObjectId::from("a")]);
        assert_eq!(record.detail, json!({"target": "b", "damage": 2}));
        assert_eq!(record.action_id, shot.id());
    }

    #[test]
    fn pending_execution_resolves() {
        let exec = Execution::pending(async { Ok(json!("later")) });
        assert_eq!(block_on(exec.resolve()), Ok(json!("later")));
    }
}
