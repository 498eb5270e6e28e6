//! The standard xatrobots rule set.
//!
//! Bots land on a board of squares, charge energy by solving proof-of-work
//! challenges, share it with teammates, and shoot each other with cannons.
//! Only the first bot of a team lands from the deck on its own; the rest
//! come through portals opened from ore by a teammate already on the board.
//!
//! A bot whose hp reaches zero is wrecked: taken off its square, its energy
//! destroyed, and the bot itself destroyed.
//!
//! The board holds pylons. Breaking the last lock on a pylon captures it for
//! the breaker's team and puts fresh locks on it. The first team to hold
//! every pylon wins; the rules announce it with a `Custom { name: "winner" }`
//! event.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use xatro_world::event::Event;
use xatro_world::id::{ActionId, ObjectId};
use xatro_world::object::{Object, KIND_ATTR};
use xatro_world::world::World;

use crate::action::{
    Action, AddLock, BreakLock, Charge, ConsumeEnergy, Execution, Move, OpenPortal, ShareEnergy,
    Shoot, UsePortal, LOCKS_ATTR, PORTAL_USER_ATTR,
};
use crate::config::StandardConfig;
use crate::energy::{CREATED_ENERGY_ATTR, ENERGY_ATTR};
use crate::engine::Rules;
use crate::work::Work;
use crate::EngineError;

/// Subject-envelope key holding the challenge issued for the next charge.
pub const ISSUED_WORK_KEY: &str = "work";

// ---------------------------------------------------------------------------
// StandardAction
// ---------------------------------------------------------------------------

/// Every action the standard rules know about.
#[derive(Debug, Clone)]
pub enum StandardAction {
    Move(Move),
    Charge(Charge),
    ConsumeEnergy(ConsumeEnergy),
    ShareEnergy(ShareEnergy),
    Shoot(Shoot),
    OpenPortal(OpenPortal),
    UsePortal(UsePortal),
    AddLock(AddLock),
    BreakLock(BreakLock),
}

impl StandardAction {
    fn inner(&self) -> &dyn Action {
        match self {
            StandardAction::Move(a) => a,
            StandardAction::Charge(a) => a,
            StandardAction::ConsumeEnergy(a) => a,
            StandardAction::ShareEnergy(a) => a,
            StandardAction::Shoot(a) => a,
            StandardAction::OpenPortal(a) => a,
            StandardAction::UsePortal(a) => a,
            StandardAction::AddLock(a) => a,
            StandardAction::BreakLock(a) => a,
        }
    }
}

impl Action for StandardAction {
    fn id(&self) -> ActionId {
        self.inner().id()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn subject(&self) -> ObjectId {
        self.inner().subject()
    }

    fn emitters(&self) -> Vec<ObjectId> {
        self.inner().emitters()
    }

    fn execute(&self, world: &World) -> Execution {
        self.inner().execute(world)
    }

    fn detail(&self) -> Value {
        self.inner().detail()
    }
}

macro_rules! standard_action_from {
    ($($variant:ident),*) => {
        $(impl From<$variant> for StandardAction {
            fn from(action: $variant) -> Self {
                StandardAction::$variant(action)
            }
        })*
    };
}

standard_action_from!(
    Move,
    Charge,
    ConsumeEnergy,
    ShareEnergy,
    Shoot,
    OpenPortal,
    UsePortal,
    AddLock,
    BreakLock
);

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

fn location(obj: &Object) -> Option<ObjectId> {
    obj.get_str("location").map(ObjectId::from)
}

fn require_square(world: &World, id: &ObjectId) -> Result<ObjectId, EngineError> {
    location(&world.get(id)?).ok_or_else(|| EngineError::not_allowed("You must be on the board"))
}

fn require_on_deck(world: &World, id: &ObjectId) -> Result<(), EngineError> {
    if location(&world.get(id)?).is_some() {
        return Err(EngineError::not_allowed("You can only do this on deck"));
    }
    Ok(())
}

fn require_team(world: &World, id: &ObjectId, doing: &str) -> Result<String, EngineError> {
    match world.get(id)?.get_str("team") {
        Some(team) if !team.is_empty() => Ok(team.to_owned()),
        _ => Err(EngineError::not_allowed(format!(
            "You must be part of a team before {doing}"
        ))),
    }
}

fn require_same_square(world: &World, a: &ObjectId, b: &ObjectId) -> Result<(), EngineError> {
    if location(&world.get(a)?) != location(&world.get(b)?) {
        return Err(EngineError::not_allowed("Must be in the same place"));
    }
    Ok(())
}

fn require_kind(world: &World, id: &ObjectId, kind: &str) -> Result<(), EngineError> {
    let obj = world.get(id)?;
    match obj.kind() {
        Some(k) if k == kind => Ok(()),
        other => Err(EngineError::not_allowed(format!(
            "You can't do that with a {}",
            other.unwrap_or("nothing")
        ))),
    }
}

fn require_tool(world: &World, id: &ObjectId, tool: &str) -> Result<(), EngineError> {
    if world.get(id)?.get_str("tool") != Some(tool) {
        return Err(EngineError::not_allowed(format!("You must have a {tool} equipped")));
    }
    Ok(())
}

fn require_vulnerable(world: &World, id: &ObjectId) -> Result<(), EngineError> {
    if world.get(id)?.get_i64("hp").unwrap_or(0) <= 0 {
        return Err(EngineError::not_allowed("The target isn't a vulnerable thing"));
    }
    Ok(())
}

fn coordinates(world: &World, square: &ObjectId) -> Result<(i64, i64), EngineError> {
    let obj = world.get(square)?;
    match obj.items("coordinates") {
        [x, y] => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(EngineError::not_allowed("Square has malformed coordinates")),
        },
        _ => Err(EngineError::not_allowed("Square has no coordinates")),
    }
}

// ---------------------------------------------------------------------------
// StandardRules
// ---------------------------------------------------------------------------

/// The standard rules, with the rosters they derive from world events.
#[derive(Debug, Default)]
pub struct StandardRules {
    config: StandardConfig,
    bot_teams: HashMap<ObjectId, String>,
    on_board: BTreeMap<String, BTreeSet<ObjectId>>,
    pylons: BTreeMap<ObjectId, Option<String>>,
    winner: Option<String>,
}

impl StandardRules {
    pub fn new(config: StandardConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &StandardConfig {
        &self.config
    }

    /// The winning team, once there is one.
    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    /// Bots of `team` currently on the board.
    pub fn bots_on_board(&self, team: &str) -> Vec<ObjectId> {
        self.on_board
            .get(team)
            .map(|bots| bots.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every pylon and the team holding it, if any.
    pub fn pylons(&self) -> &BTreeMap<ObjectId, Option<String>> {
        &self.pylons
    }

    /// Issue a fresh challenge for `subject`'s next charge, replacing any
    /// outstanding one.
    pub fn issue_work(&self, world: &World, subject: &ObjectId) -> Result<Work, EngineError> {
        let envelope = world.envelope(subject)?;
        let work = self.config.work.get_work()?;
        match serde_json::to_value(&work) {
            Ok(value) => {
                envelope.insert(ISSUED_WORK_KEY, value);
            }
            Err(e) => warn!(subject = %subject, error = %e, "could not record issued work"),
        }
        debug!(subject = %subject, nonce = %work.nonce, "work issued");
        Ok(work)
    }

    /// The challenge outstanding for `subject`, if any.
    pub fn pending_work(&self, world: &World, subject: &ObjectId) -> Result<Option<Work>, EngineError> {
        let Some(raw) = world.envelope(subject)?.get(ISSUED_WORK_KEY) else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(work) => Ok(Some(work)),
            Err(e) => {
                warn!(subject = %subject, error = %e, "discarding malformed work");
                Ok(None)
            }
        }
    }

    fn shoot_cost(&self, damage: u32) -> Result<u32, EngineError> {
        self.config
            .shoot_energy
            .get(&damage)
            .copied()
            .ok_or_else(|| EngineError::not_allowed(format!("Can't deal {damage} damage")))
    }

    fn move_allowed(&self, world: &World, action: &Move) -> Result<(), EngineError> {
        let thing = world.get(&action.thing)?;
        require_kind(world, &action.dst, "square")?;

        match location(&thing) {
            Some(src) => {
                let (sx, sy) = coordinates(world, &src)?;
                let (dx, dy) = coordinates(world, &action.dst)?;
                if (dx - sx).abs() + (dy - sy).abs() > 1 {
                    return Err(EngineError::not_allowed("Too far away"));
                }
            }
            None => {
                let team = require_team(world, &action.thing, "landing")?;
                if self.on_board.get(&team).is_some_and(|bots| !bots.is_empty()) {
                    return Err(EngineError::not_allowed(
                        "Only the first bot can land without a portal",
                    ));
                }
            }
        }
        Ok(())
    }

    fn charge_allowed(&self, world: &World, action: &Charge) -> Result<(), EngineError> {
        require_square(world, &action.bot)?;
        if world.get(&action.bot)?.get_i64(CREATED_ENERGY_ATTR).unwrap_or(0) > 0 {
            return Err(EngineError::not_allowed(
                "You must wait until the last energy you created is consumed or wasted",
            ));
        }
        Ok(())
    }

    fn use_portal_allowed(&self, world: &World, action: &UsePortal) -> Result<(), EngineError> {
        require_on_deck(world, &action.thing)?;
        require_team(world, &action.thing, "using a portal")?;
        require_kind(world, &action.portal, "portal")?;
        let portal = world.get(&action.portal)?;
        if portal.get_str(PORTAL_USER_ATTR).is_some_and(|user| user != action.thing.as_str()) {
            return Err(EngineError::not_allowed("That portal was opened for someone else"));
        }
        Ok(())
    }

    // -- event bookkeeping --------------------------------------------------

    fn attr_set(
        &mut self,
        world: &World,
        id: &ObjectId,
        name: &str,
        value: &Value,
    ) -> anyhow::Result<()> {
        // The object may already be gone if it was destroyed by an earlier
        // listener of this event.
        let Ok(obj) = world.get(id) else {
            return Ok(());
        };

        match (obj.kind(), name) {
            (Some("bot"), "team") => {
                if let Some(team) = value.as_str() {
                    self.bot_teams.insert(id.clone(), team.to_owned());
                }
            }
            (Some("bot"), "location") => {
                let Some(team) = self.bot_teams.get(id).cloned() else {
                    return Ok(());
                };
                if value.is_null() {
                    self.leave_board(id, &team);
                } else if self.on_board.entry(team.clone()).or_default().insert(id.clone()) {
                    debug!(bot = %id, team = %team, "bot landed");
                    world.set_attr(id, "hp", self.config.bot_starting_hp)?;
                }
            }
            (Some("pylon"), KIND_ATTR) => {
                self.pylons.insert(id.clone(), None);
                self.check_winner(world)?;
            }
            (Some("pylon"), "team") => {
                let team = value.as_str().filter(|t| !t.is_empty()).map(str::to_owned);
                debug!(pylon = %id, team = ?team, "pylon changed hands");
                self.pylons.insert(id.clone(), team);
                self.check_winner(world)?;
            }
            (_, "hp") if value.as_i64() == Some(0) => wreck(world, &obj)?,
            _ => {}
        }
        Ok(())
    }

    fn leave_board(&mut self, id: &ObjectId, team: &str) {
        if let Some(roster) = self.on_board.get_mut(team) {
            roster.remove(id);
        }
    }

    /// Capture the pylon a bot just broke the last lock of.
    fn lock_broken(&self, world: &World, breaker: &ObjectId, pylon: &ObjectId) -> anyhow::Result<()> {
        let Ok(obj) = world.get(pylon) else {
            return Ok(());
        };
        if obj.get_i64(LOCKS_ATTR).unwrap_or(0) > 0 {
            return Ok(());
        }
        let team = world.get(breaker).ok().and_then(|b| b.get_str("team").map(str::to_owned));
        let Some(team) = team else {
            return Ok(());
        };
        info!(pylon = %pylon, team = %team, "pylon captured");
        world.set_attr(pylon, "team", team)?;
        world.set_attr(pylon, LOCKS_ATTR, self.config.pylon_locks_after_capture)?;
        Ok(())
    }

    fn check_winner(&mut self, world: &World) -> anyhow::Result<()> {
        if self.winner.is_some() {
            return Ok(());
        }
        let mut holders = self.pylons.values();
        let Some(Some(team)) = holders.next() else {
            return Ok(());
        };
        if !holders.all(|holder| holder.as_ref() == Some(team)) {
            return Ok(());
        }
        let team = team.clone();
        info!(team = %team, "winner decided");
        world.emit(
            Event::Custom {
                name: "winner".to_owned(),
                id: None,
                payload: json!({ "team": team }),
            },
            None,
        )?;
        self.winner = Some(team);
        Ok(())
    }
}

/// Take a zero-hp object off its square, destroy its energy, then destroy it.
fn wreck(world: &World, obj: &Object) -> anyhow::Result<()> {
    let id = obj.id();
    if let Some(square) = location(obj) {
        if world.get(&square).is_ok_and(|sq| sq.item_ids("contents").contains(&id)) {
            world.remove_item(&square, "contents", &id)?;
        }
    }
    for unit in obj.item_ids(ENERGY_ATTR) {
        if world.contains(&unit) {
            world.destroy(&unit)?;
        }
    }
    world.destroy(&id)?;
    info!(object = %id, "wrecked");
    Ok(())
}

impl Rules for StandardRules {
    type Action = StandardAction;

    fn is_allowed(&self, world: &World, action: &StandardAction) -> Result<(), EngineError> {
        let subject = action.subject();
        if world.get(&subject)?.kind() != Some("bot") {
            return Err(EngineError::not_allowed("Only bots can do that"));
        }

        match action {
            StandardAction::Move(a) => self.move_allowed(world, a),
            StandardAction::Charge(a) => self.charge_allowed(world, a),
            StandardAction::ConsumeEnergy(_) => require_square(world, &subject).map(|_| ()),
            StandardAction::ShareEnergy(a) => {
                require_square(world, &a.giver)?;
                require_kind(world, &a.receiver, "bot")?;
                require_same_square(world, &a.giver, &a.receiver)
            }
            StandardAction::Shoot(a) => {
                require_square(world, &a.shooter)?;
                require_same_square(world, &a.shooter, &a.target)?;
                require_tool(world, &a.shooter, "cannon")?;
                require_vulnerable(world, &a.target)?;
                self.shoot_cost(a.damage).map(|_| ())
            }
            StandardAction::OpenPortal(a) => {
                require_square(world, &a.thing)?;
                require_kind(world, &a.ore, "ore")?;
                require_same_square(world, &a.thing, &a.ore)
            }
            StandardAction::UsePortal(a) => self.use_portal_allowed(world, a),
            StandardAction::AddLock(AddLock { doer, target, .. })
            | StandardAction::BreakLock(BreakLock { doer, target, .. }) => {
                require_square(world, doer)?;
                require_kind(world, target, "pylon")?;
                require_same_square(world, doer, target)
            }
        }
    }

    fn work_requirement(
        &self,
        world: &World,
        action: &StandardAction,
    ) -> Result<Option<Work>, EngineError> {
        match action {
            StandardAction::Charge(a) if self.config.charge_requires_work => {
                match self.pending_work(world, &a.bot)? {
                    Some(work) => Ok(Some(work)),
                    None => self.issue_work(world, &a.bot).map(Some),
                }
            }
            _ => Ok(None),
        }
    }

    fn energy_requirement(&self, _world: &World, action: &StandardAction) -> Result<u32, EngineError> {
        match action {
            StandardAction::Shoot(a) => self.shoot_cost(a.damage),
            StandardAction::OpenPortal(_) => Ok(self.config.open_portal_energy),
            StandardAction::AddLock(_) | StandardAction::BreakLock(_) => Ok(self.config.lock_energy),
            _ => Ok(0),
        }
    }

    fn world_event_received(&mut self, world: &World, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::AttrSet { id, name, value } => self.attr_set(world, id, name, value),
            Event::Destroyed { id } => {
                if let Some(team) = self.bot_teams.remove(id) {
                    self.leave_board(id, &team);
                }
                if self.pylons.remove(id).is_some() {
                    self.check_winner(world)?;
                }
                Ok(())
            }
            Event::ActionPerformed { action } if action.name == "charge" => {
                // A solved challenge is spent.
                if let Ok(envelope) = world.envelope(&action.subject) {
                    envelope.remove(ISSUED_WORK_KEY);
                }
                Ok(())
            }
            Event::ActionPerformed { action } if action.name == "break_lock" => {
                match action.detail["target"].as_str() {
                    Some(target) => self.lock_broken(world, &action.subject, &ObjectId::from(target)),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
