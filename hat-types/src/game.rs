use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{GameId, UserId, user::User};

/// Parameters fixed at game creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSettings {
    pub num_players: usize,
    pub num_words: usize,
    pub num_stages: u32,
    pub turn_seconds: u64,
}

impl GameSettings {
    /// Lobby size must be even so every player has exactly one teammate.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_players < 2 {
            return Err("a game needs at least two players");
        }
        if self.num_players % 2 != 0 {
            return Err("number of players must be even");
        }
        if self.num_words == 0 {
            return Err("each player must submit at least one word");
        }
        if self.num_stages == 0 {
            return Err("a game needs at least one stage");
        }
        if self.turn_seconds == 0 {
            return Err("turn timer must be at least one second");
        }
        Ok(())
    }
}

/// Score of one team after a stage. Canonical form: `first_id < second_id`,
/// so a pair maps to the same row regardless of who was storytelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TeamResult {
    #[serde(rename = "FirstID")]
    pub first_id: UserId,
    #[serde(rename = "SecondID")]
    pub second_id: UserId,
    #[serde(rename = "Score")]
    pub score: i64,
}

impl TeamResult {
    pub fn new(a: UserId, b: UserId, score: i64) -> Self {
        let (first_id, second_id) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first_id,
            second_id,
            score,
        }
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.first_id == id || self.second_id == id
    }
}

/// Lobby-facing view of a game. Words and play state are deliberately
/// not part of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct GameSnapshot {
    #[serde(rename = "ID")]
    pub id: GameId,
    #[serde(rename = "Host")]
    pub host: UserId,
    #[serde(rename = "NumPlayers")]
    pub num_players: usize,
    #[serde(rename = "Timer")]
    pub timer: u64,
    #[serde(rename = "NumWords")]
    pub num_words: usize,
    #[serde(rename = "NumStages")]
    pub num_stages: u32,
    #[serde(rename = "Players")]
    pub players: Vec<User>,
}
