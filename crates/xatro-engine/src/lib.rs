//! Xatro engine -- rule enforcement on top of [`xatro_world`].
//!
//! Actions are values implementing [`Action`](action::Action). The
//! [`Engine`](engine::Engine) wraps a domain [`Rules`](engine::Rules) object
//! and runs every action through the same pipeline: permission check,
//! proof-of-work check, energy check, execution, and energy consumption on
//! success. A failed check or a failed execution leaves the world untouched.
//!
//! # Quick Start
//!
//! ```
//! use futures::executor::block_on;
//! use xatro_engine::prelude::*;
//!
//! let world = World::default();
//! let engine = Engine::new(StandardRules::default());
//! engine.attach(&world);
//!
//! let square = world.create("square").id();
//! world.set_attr(&square, "coordinates", serde_json::json!([0, 0])).unwrap();
//! let bot = world.create("bot").id();
//! world.set_attr(&bot, "team", "red").unwrap();
//!
//! let land = StandardAction::from(Move::new(bot.clone(), square.clone()));
//! block_on(engine.execute(&world, &land)).unwrap();
//! assert_eq!(world.get(&bot).unwrap().get_str("location"), Some(square.as_str()));
//! ```

#![deny(unsafe_code)]

pub mod action;
pub mod config;
pub mod energy;
pub mod engine;
pub mod standard;
pub mod work;

use xatro_world::WorldError;

/// Re-export the world crate for convenience.
pub use xatro_world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Invalid proof-of-work parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    #[error("work scale must be positive")]
    ZeroScale,

    #[error("work difficulty {difficulty} exceeds scale {scale}")]
    DifficultyExceedsScale { difficulty: u64, scale: u64 },
}

/// Reasons an action is rejected or fails.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// The rules vetoed the action.
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// The action needs proof-of-work and no valid solution was attached.
    #[error("invalid solution for work {}", work.nonce)]
    InvalidSolution { work: work::Work },

    /// The subject does not hold enough unreserved energy.
    #[error("not enough energy: {required} required, {available} available")]
    NotEnoughEnergy { required: u32, available: u32 },

    /// The rules object is in use by the event it is handling.
    #[error("rules are busy handling an event")]
    RulesBusy,

    #[error(transparent)]
    Work(#[from] WorkError),

    #[error(transparent)]
    World(#[from] WorldError),
}

impl EngineError {
    /// Shorthand for [`EngineError::NotAllowed`].
    pub fn not_allowed(reason: impl Into<String>) -> Self {
        EngineError::NotAllowed(reason.into())
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use xatro_world::prelude::*;

    pub use crate::action::{
        Action, AddLock, BreakLock, Charge, ConsumeEnergy, Execution, Move, OpenPortal,
        ShareEnergy, Shoot, UsePortal, LOCKS_ATTR, PORTAL_USER_ATTR, WORK_SOLUTION_KEY,
    };
    pub use crate::config::StandardConfig;
    pub use crate::energy::{available_energy, held_energy, CREATED_ENERGY_ATTR, ENERGY_ATTR};
    pub use crate::engine::{Engine, Rules};
    pub use crate::standard::{StandardAction, StandardRules};
    pub use crate::work::{get_work, is_result, solve, Work, WorkMaker, MAX_HASH};
    pub use crate::{EngineError, WorkError};
}
