//! Headless match between two teams of bots that act at random.
//!
//! Run with:
//!   cargo run --example random_bots -p xatro-engine -- [config.json] [seed]
//!
//! One bot per team lands on a small board scattered with ore and pylons.
//! Each turn a random bot charges (solving its challenge by brute force),
//! steps to a neighbouring square, shares energy, shoots whoever is nearby,
//! opens a portal for a teammate still on deck, or works the locks of a
//! pylon. Bots on deck land through portals opened for them. The match ends
//! when one team holds every pylon or the turn limit is hit. Set
//! `RUST_LOG=debug` to watch every action go through the engine.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context;
use futures::executor::block_on;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde_json::json;
use xatro_engine::prelude::*;

const BOARD: i64 = 3;
const BOTS_PER_TEAM: usize = 3;
const ORE: usize = 6;
const PYLONS: usize = 2;
const TURNS: usize = 2_000;
const SOLVE_ATTEMPTS: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Match state
// ---------------------------------------------------------------------------

struct Match {
    world: World,
    engine: Engine<StandardRules>,
    squares: Vec<ObjectId>,
    bots: Vec<ObjectId>,
    rng: Pcg64,
}

fn kind_of(obj: &Object) -> &str {
    obj.kind().unwrap_or_default()
}

impl Match {
    fn new(config: StandardConfig, seed: u64, world: World) -> anyhow::Result<Self> {
        let engine = Engine::new(StandardRules::new(config));
        engine.attach(&world);

        let mut squares = Vec::new();
        for x in 0..BOARD {
            for y in 0..BOARD {
                let square = world.create("square").id();
                world.set_attr(&square, "coordinates", json!([x, y]))?;
                squares.push(square);
            }
        }

        let mut rng = Pcg64::seed_from_u64(seed);
        for kind in std::iter::repeat("ore").take(ORE).chain(std::iter::repeat("pylon").take(PYLONS)) {
            let thing = world.create(kind).id();
            let square = squares.choose(&mut rng).cloned().context("board has no squares")?;
            block_on(Move::new(thing, square).execute(&world).resolve())?;
        }

        let mut bots = Vec::new();
        for team in ["red", "blue"] {
            for _ in 0..BOTS_PER_TEAM {
                let bot = world.create("bot").id();
                world.set_attr(&bot, "team", team)?;
                world.set_attr(&bot, "tool", "cannon")?;
                bots.push(bot);
            }
        }

        Ok(Self {
            world,
            engine,
            squares,
            bots,
            rng,
        })
    }

    fn execute(&self, action: impl Into<StandardAction>) -> Result<serde_json::Value, EngineError> {
        block_on(self.engine.execute(&self.world, &action.into()))
    }

    /// Land the first bot of each team.
    fn land_leaders(&mut self) -> anyhow::Result<()> {
        for leader in self.bots.clone().into_iter().step_by(BOTS_PER_TEAM) {
            let square = self
                .squares
                .choose(&mut self.rng)
                .cloned()
                .context("board has no squares")?;
            self.execute(Move::new(leader, square))?;
        }
        Ok(())
    }

    fn live_bots(&self) -> Vec<ObjectId> {
        self.bots
            .iter()
            .filter(|bot| self.world.contains(bot))
            .cloned()
            .collect()
    }

    /// Things of `kind` other than `bot` on the same square.
    fn nearby(&self, bot: &ObjectId, kind: &str) -> anyhow::Result<Vec<ObjectId>> {
        let obj = self.world.get(bot)?;
        let Some(square) = obj.get_str("location").map(ObjectId::from) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for thing in self.world.get(&square)?.item_ids("contents") {
            if &thing != bot && kind_of(&self.world.get(&thing)?) == kind {
                found.push(thing);
            }
        }
        Ok(found)
    }

    /// A teammate of `bot` still on deck.
    fn teammate_on_deck(&self, bot: &ObjectId) -> anyhow::Result<Option<ObjectId>> {
        let team = self.world.get(bot)?.get_str("team").map(str::to_owned);
        for other in self.live_bots() {
            let obj = self.world.get(&other)?;
            if obj.get("location").is_none() && obj.get_str("team").map(str::to_owned) == team {
                return Ok(Some(other));
            }
        }
        Ok(None)
    }

    /// A portal opened for `bot`, wherever it is.
    fn portal_for(&self, bot: &ObjectId) -> Option<ObjectId> {
        self.world
            .state()
            .iter()
            .find(|(_, obj)| {
                kind_of(obj) == "portal" && obj.get_str(PORTAL_USER_ATTR) == Some(bot.as_str())
            })
            .map(|(id, _)| id.clone())
    }

    fn charge(&self, bot: &ObjectId) -> Result<serde_json::Value, EngineError> {
        let work = match self.execute(Charge::new(bot.clone())) {
            Err(EngineError::InvalidSolution { work }) => work,
            other => return other,
        };
        let Some(answer) = solve(&work, SOLVE_ATTEMPTS) else {
            return Err(EngineError::InvalidSolution { work });
        };
        let charge = Charge::new(bot.clone());
        self.world
            .envelope(charge.id())?
            .insert(WORK_SOLUTION_KEY, answer);
        self.execute(charge)
    }

    fn turn(&mut self) -> anyhow::Result<()> {
        let live = self.live_bots();
        let Some(bot) = live.choose(&mut self.rng).cloned() else {
            return Ok(());
        };
        if self.world.get(&bot)?.get("location").is_none() {
            // Landing alone only works once the team has nobody left on the board.
            let outcome = match (self.portal_for(&bot), self.squares.choose(&mut self.rng).cloned()) {
                (Some(portal), _) => self.execute(UsePortal::new(bot, portal)),
                (None, Some(square)) => self.execute(Move::new(bot, square)),
                (None, None) => return Ok(()),
            };
            return settle(outcome);
        }
        let neighbours = self.nearby(&bot, "bot")?;

        let outcome = match self.rng.gen_range(0..6) {
            0 => self.charge(&bot),
            1 => {
                let square = self.squares.choose(&mut self.rng).cloned();
                match square {
                    Some(square) => self.execute(Move::new(bot.clone(), square)),
                    None => return Ok(()),
                }
            }
            2 => match neighbours.choose(&mut self.rng).cloned() {
                Some(friend) => self.execute(ShareEnergy::new(bot.clone(), friend, 1)),
                None => self.charge(&bot),
            },
            3 => match neighbours.choose(&mut self.rng).cloned() {
                Some(target) => {
                    let damage = self.rng.gen_range(1..=6);
                    self.execute(Shoot::new(bot.clone(), target, damage))
                }
                None => self.charge(&bot),
            },
            4 => {
                let ore = self.nearby(&bot, "ore")?.choose(&mut self.rng).cloned();
                match (ore, self.teammate_on_deck(&bot)?) {
                    (Some(ore), Some(user)) => self.execute(OpenPortal::new(bot.clone(), ore, user)),
                    _ => self.charge(&bot),
                }
            }
            _ => match self.nearby(&bot, "pylon")?.choose(&mut self.rng).cloned() {
                Some(pylon) => {
                    let ours = self.world.get(&pylon)?.get_str("team")
                        == self.world.get(&bot)?.get_str("team");
                    if ours {
                        self.execute(AddLock::new(bot.clone(), pylon))
                    } else {
                        self.execute(BreakLock::new(bot.clone(), pylon))
                    }
                }
                None => self.charge(&bot),
            },
        };
        settle(outcome)
    }
}

/// Rejections are part of the game; anything else is a bug.
fn settle(outcome: Result<serde_json::Value, EngineError>) -> anyhow::Result<()> {
    match outcome {
        Ok(_) | Err(EngineError::NotAllowed(_) | EngineError::NotEnoughEnergy { .. }) => Ok(()),
        Err(e) => Err(e).context("unexpected engine failure"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) if path != "-" => StandardConfig::load(&path)?,
        _ => StandardConfig {
            work: WorkMaker { difficulty: 1, scale: 8 },
            ..StandardConfig::default()
        },
    };
    let seed = match args.next() {
        Some(seed) => seed.parse().context("seed must be an integer")?,
        None => 7,
    };

    let journal = Rc::new(RefCell::new(EventJournal::new()));
    let world = World::new(EventJournal::recorder(&journal));
    let mut game = Match::new(config, seed, world)?;
    game.land_leaders()?;

    let mut turns = 0;
    while turns < TURNS && game.engine.rules().winner().is_none() {
        game.turn()?;
        turns += 1;
    }

    let journal = journal.borrow();
    for entry in journal.events_tagged("action_performed") {
        println!("{:>5} {}", entry.sequence, entry.event);
    }
    println!("{} events over {turns} turns", journal.len());
    match game.engine.rules().winner() {
        Some(team) => println!("winner: {team}"),
        None => println!("no winner"),
    }

    let replayed = journal.replay();
    anyhow::ensure!(
        replayed == game.world.state(),
        "journal replay diverged from the live world"
    );
    Ok(())
}
