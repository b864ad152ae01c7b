use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;

use hat_types::{GameId, GameSettings, TeamResult, User, UserId};

/// Ranked scores of one full pass through the word pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub stage: u32,
    pub results: Vec<TeamResult>,
}

/// Everything the persistence layer needs about a finished game: the word
/// pool with per-word authorship, who guessed each word during the last
/// stage, and the ranked team results of every stage played.
#[derive(Debug, Clone)]
pub struct CompletedGame {
    pub id: GameId,
    pub host: UserId,
    pub settings: GameSettings,
    pub players: Vec<User>,
    pub words_by_user: HashMap<UserId, HashSet<String>>,
    pub guessed: HashMap<String, UserId>,
    pub stage_results: Vec<StageResult>,
    pub forcefully_ended: bool,
}

impl CompletedGame {
    /// A forcefully ended game is only worth recording once at least one
    /// stage has been tallied.
    pub fn worth_recording(&self) -> bool {
        !self.forcefully_ended || !self.stage_results.is_empty()
    }
}

/// Write side of the persistence collaborator. The engine never talks to a
/// database directly; tests substitute a stub.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn add_game(&self, game: &CompletedGame) -> Result<()>;
}
