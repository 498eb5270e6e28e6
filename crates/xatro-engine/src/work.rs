//! Proof-of-work challenges used to throttle actions.
//!
//! A [`Work`] is a random nonce plus a goal. A candidate string solves it when
//! the hash of `nonce ++ candidate`, read as an unsigned integer, is strictly
//! greater than the goal. The goal is `(scale - difficulty) * (MAX_HASH /
//! scale)`, so roughly `difficulty / scale` of all candidates succeed. At
//! `difficulty == scale` the goal is zero and almost any candidate works.
//!
//! The hash is BLAKE3; its first 16 bytes are read big-endian as a `u128`.
//!
//! ```
//! use xatro_engine::work::{is_result, solve, WorkMaker};
//!
//! let work = WorkMaker { difficulty: 1, scale: 4 }.get_work().unwrap();
//! let answer = solve(&work, 10_000).expect("a quarter of candidates succeed");
//! assert!(is_result(&work, &answer));
//! ```

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::WorkError;

/// Largest possible hash value.
pub const MAX_HASH: u128 = u128::MAX;

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

/// A challenge: find a candidate whose hash with `nonce` exceeds `goal`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Work {
    /// Threshold the hash must exceed. Serialized as a decimal string since
    /// it does not fit a JSON number.
    #[serde(with = "decimal")]
    pub goal: u128,
    /// Random hex string.
    pub nonce: String,
}

mod decimal {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// The hash integer of `nonce ++ candidate`.
pub fn hash_value(nonce: &str, candidate: &str) -> u128 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(nonce.as_bytes());
    hasher.update(candidate.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&digest.as_bytes()[..16]);
    u128::from_be_bytes(prefix)
}

/// Whether `candidate` solves `work`.
pub fn is_result(work: &Work, candidate: &str) -> bool {
    hash_value(&work.nonce, candidate) > work.goal
}

/// Brute-force a solution by counting up from zero.
///
/// Returns `None` if none of the first `max_attempts` candidates works.
pub fn solve(work: &Work, max_attempts: u64) -> Option<String> {
    (0..max_attempts)
        .map(|n| n.to_string())
        .find(|candidate| is_result(work, candidate))
}

// ---------------------------------------------------------------------------
// WorkMaker
// ---------------------------------------------------------------------------

/// Issues challenges with a default difficulty and scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMaker {
    pub difficulty: u64,
    pub scale: u64,
}

impl Default for WorkMaker {
    /// Difficulty 10 out of 10000: one candidate in a thousand succeeds.
    fn default() -> Self {
        Self {
            difficulty: 10,
            scale: 10_000,
        }
    }
}

impl WorkMaker {
    /// Issue a challenge with this maker's defaults.
    pub fn get_work(&self) -> Result<Work, WorkError> {
        self.get_work_with(None, None)
    }

    /// Issue a challenge, overriding difficulty and/or scale.
    pub fn get_work_with(
        &self,
        difficulty: Option<u64>,
        scale: Option<u64>,
    ) -> Result<Work, WorkError> {
        let difficulty = difficulty.unwrap_or(self.difficulty);
        let scale = scale.unwrap_or(self.scale);
        Ok(Work {
            goal: goal(difficulty, scale)?,
            nonce: fresh_nonce(),
        })
    }
}

/// Issue a challenge with the default maker.
pub fn get_work(difficulty: Option<u64>, scale: Option<u64>) -> Result<Work, WorkError> {
    WorkMaker::default().get_work_with(difficulty, scale)
}

fn goal(difficulty: u64, scale: u64) -> Result<u128, WorkError> {
    if scale == 0 {
        return Err(WorkError::ZeroScale);
    }
    if difficulty > scale {
        return Err(WorkError::DifficultyExceedsScale { difficulty, scale });
    }
    Ok(u128::from(scale - difficulty) * (MAX_HASH / u128::from(scale)))
}

fn fresh_nonce() -> String {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    blake3::hash(&seed).to_hex().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
