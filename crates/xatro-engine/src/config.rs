//! Tunables for the standard rule set.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::work::WorkMaker;

/// Configuration for [`StandardRules`](crate::standard::StandardRules).
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes:
///
/// ```
/// use xatro_engine::config::StandardConfig;
///
/// let config = StandardConfig::from_json_str(r#"{ "bot_starting_hp": 4 }"#).unwrap();
/// assert_eq!(config.bot_starting_hp, 4);
/// assert_eq!(config.shoot_energy.get(&1), Some(&1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardConfig {
    /// hp given to a bot the first time it lands on a square.
    pub bot_starting_hp: i64,
    /// Energy cost of a shot, by damage. Damage not listed cannot be dealt.
    pub shoot_energy: BTreeMap<u32, u32>,
    /// Energy cost of opening a portal.
    pub open_portal_energy: u32,
    /// Energy cost of adding or breaking a lock.
    pub lock_energy: u32,
    /// Locks put on a pylon when it is captured.
    pub pylon_locks_after_capture: i64,
    /// Whether charging requires a proof-of-work solution.
    pub charge_requires_work: bool,
    /// Parameters for the challenges issued to chargers.
    pub work: WorkMaker,
}

impl Default for StandardConfig {
    fn default() -> Self {
        Self {
            bot_starting_hp: 10,
            shoot_energy: BTreeMap::from([(1, 1), (2, 2), (3, 2), (4, 3), (5, 3), (6, 3)]),
            open_portal_energy: 1,
            lock_energy: 2,
            pylon_locks_after_capture: 3,
            charge_requires_work: true,
            work: WorkMaker::default(),
        }
    }
}

impl StandardConfig {
    /// Parse from JSON.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Read and parse a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        assert_eq!(StandardConfig::from_json_str("{}").unwrap(), StandardConfig::default());
    }

    #[test]
    fn overrides_merge_with_defaults() {
        let config = StandardConfig::from_json_str(
            r#"{ "shoot_energy": { "1": 5 }, "work": { "difficulty": 1, "scale": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.shoot_energy, BTreeMap::from([(1, 5)]));
        assert_eq!(config.work, WorkMaker { difficulty: 1, scale: 2 });
        assert!(config.charge_requires_work);
        assert_eq!(config.lock_energy, 2);
        assert_eq!(config.pylon_locks_after_capture, 3);
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(StandardConfig::from_json_str("{ nope").is_err());
        assert!(StandardConfig::load("/definitely/not/here.json").is_err());
    }

    #[test]
    fn round_trips() {
        let config = StandardConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(StandardConfig::from_json_str(&text).unwrap(), config);
    }
}
