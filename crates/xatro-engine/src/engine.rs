//! The [`Engine`]: permission, proof-of-work and energy enforcement around
//! action execution.
//!
//! # Pipeline
//!
//! [`Engine::execute`] runs, in order:
//!
//! 1. [`Rules::is_allowed`]; a veto aborts with no side effect.
//! 2. [`Rules::work_requirement`]; if a challenge is returned, the string
//!    under [`WORK_SOLUTION_KEY`] in the action's envelope must solve it,
//!    otherwise [`EngineError::InvalidSolution`].
//! 3. [`Rules::energy_requirement`]; the subject must have that many
//!    unreserved energy units, otherwise [`EngineError::NotEnoughEnergy`].
//!    The units are reserved while the action runs.
//! 4. [`Action::execute`], awaited if it is asynchronous.
//! 5. On success only: the reserved units are consumed and an
//!    `ActionPerformed` event is emitted by each of the action's emitters.
//!
//! The action's envelope is discarded once the pipeline finishes, whatever
//! the outcome.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, warn};
use xatro_world::event::Event;
use xatro_world::id::ListenerId;
use xatro_world::world::World;

use crate::action::{Action, ConsumeEnergy, WORK_SOLUTION_KEY};
use crate::energy::{available_energy, EnergyReservation};
use crate::work::{is_result, Work};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Domain policy consulted by the [`Engine`].
pub trait Rules {
    /// The actions these rules judge.
    type Action: Action;

    /// Veto an action with [`EngineError::NotAllowed`].
    fn is_allowed(&self, world: &World, action: &Self::Action) -> Result<(), EngineError>;

    /// A challenge the actor must have solved, if any.
    fn work_requirement(
        &self,
        _world: &World,
        _action: &Self::Action,
    ) -> Result<Option<Work>, EngineError> {
        Ok(None)
    }

    /// Energy units the action costs.
    fn energy_requirement(
        &self,
        _world: &World,
        _action: &Self::Action,
    ) -> Result<u32, EngineError> {
        Ok(0)
    }

    /// Called for every event once the engine is attached to a world.
    ///
    /// Mutations made here are delivered after the current event.
    fn world_event_received(&mut self, _world: &World, _event: &Event) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs actions through a [`Rules`] object.
pub struct Engine<R> {
    rules: Rc<RefCell<R>>,
}

impl<R: Rules + 'static> Engine<R> {
    pub fn new(rules: R) -> Self {
        Self {
            rules: Rc::new(RefCell::new(rules)),
        }
    }

    /// Forward every event of `world` to [`Rules::world_event_received`].
    pub fn attach(&self, world: &World) -> ListenerId {
        let rules = Rc::clone(&self.rules);
        world.observe(move |world, event| {
            let mut rules = rules
                .try_borrow_mut()
                .map_err(|_| anyhow::anyhow!("rules already borrowed"))?;
            rules.world_event_received(world, event)
        })
    }

    /// Shared access to the rules.
    pub fn rules(&self) -> std::cell::Ref<'_, R> {
        self.rules.borrow()
    }

    /// Exclusive access to the rules. Must not be held across world calls
    /// that emit events.
    pub fn rules_mut(&self) -> std::cell::RefMut<'_, R> {
        self.rules.borrow_mut()
    }

    /// Run `action` through the pipeline.
    pub async fn execute(&self, world: &World, action: &R::Action) -> Result<Value, EngineError> {
        let result = self.run(world, action).await;
        world.discard_envelope(action.id());
        match &result {
            Ok(_) => debug!(
                action = action.name(),
                subject = %action.subject(),
                "action performed"
            ),
            Err(e) => debug!(
                action = action.name(),
                subject = %action.subject(),
                error = %e,
                "action rejected"
            ),
        }
        result
    }

    async fn run(&self, world: &World, action: &R::Action) -> Result<Value, EngineError> {
        let subject = action.subject();
        let energy = self.check(world, action)?;

        let reservation = if energy > 0 {
            let available = available_energy(world, &subject)?;
            if available < energy {
                return Err(EngineError::NotEnoughEnergy {
                    required: energy,
                    available,
                });
            }
            Some(EnergyReservation::reserve(world, &subject, energy)?)
        } else {
            None
        };

        let value = action.execute(world).resolve().await?;

        if let Some(reservation) = reservation {
            reservation.release();
            if world.contains(&subject) {
                ConsumeEnergy::new(subject.clone(), energy).apply(world)?;
            } else {
                debug!(subject = %subject, "subject gone before its energy was consumed");
            }
        }

        let record = action.record();
        for emitter in &record.emitters {
            if world.contains(emitter) {
                world.emit(
                    Event::ActionPerformed {
                        action: record.clone(),
                    },
                    Some(emitter),
                )?;
            } else {
                warn!(emitter = %emitter, action = action.name(), "emitter no longer exists");
            }
        }
        Ok(value)
    }

    /// Permission and work checks. Returns the energy requirement.
    fn check(&self, world: &World, action: &R::Action) -> Result<u32, EngineError> {
        let rules = self.rules.try_borrow().map_err(|_| EngineError::RulesBusy)?;
        rules.is_allowed(world, action)?;

        if let Some(work) = rules.work_requirement(world, action)? {
            let solution = world.envelope(action.id())?.get(WORK_SOLUTION_KEY);
            let solved = solution
                .as_ref()
                .and_then(Value::as_str)
                .is_some_and(|candidate| is_result(&work, candidate));
            if !solved {
                return Err(EngineError::InvalidSolution { work });
            }
        }

        rules.energy_requirement(world, action)
    }
}

impl<R: std::fmt::Debug> std::fmt::Debug for Engine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("rules", &self.rules).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
