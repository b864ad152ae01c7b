use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};

use hat_types::{
    ClientInputError, DomainError, Event, GameId, GameSettings, GameSnapshot, TeamResult, User,
    UserId,
};

use crate::signal::Signal;
use crate::store::{CompletedGame, StageResult};

/// Why a client command was refused. Either way the sender gets an `error`
/// event and the game carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Input(#[from] ClientInputError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    WordSubmission,
    Guess,
    StageEnd,
    GameEnd,
    ForcefullyEnded,
}

/// A joined player: the cached user record plus the one-shot signal used to
/// kick their connection loose when they are evicted or the game dies.
#[derive(Debug, Clone)]
pub struct PlayerSeat {
    pub user: User,
    pub quit: Signal,
}

#[derive(Debug, Default)]
struct Words {
    by_user: HashMap<UserId, HashSet<String>>,
    all: HashSet<String>,
}

/// Players and the word pool. Guarded by the words lock.
#[derive(Debug, Default)]
struct Lobby {
    order: Vec<UserId>,
    seats: HashMap<UserId, PlayerSeat>,
    words: Words,
}

/// Mutable play state. Guarded by the process lock; when both locks are
/// needed the process lock is taken first.
#[derive(Debug)]
struct Process {
    phase: Phase,
    storyteller: usize,
    stage: u32,
    teams: Vec<UserId>,
    guessed: HashMap<String, UserId>,
    stage_results: Vec<StageResult>,
    stage_end: Signal,
    turn: Option<Signal>,
}

/// Everything the turn tasks need, captured atomically at turn start.
#[derive(Debug, Clone)]
pub struct TurnStart {
    pub word: String,
    pub storyteller: UserId,
    pub turn: Signal,
    pub stage_end: Signal,
}

/// Outcome of exhausting the word pool.
#[derive(Debug)]
pub enum StageOutcome {
    /// More stages remain; the fired signal is the ended stage's.
    NextStage {
        results: Vec<TeamResult>,
        ended_stage: Signal,
    },
    GameOver {
        results: Vec<TeamResult>,
    },
}

#[derive(Debug)]
pub struct Game {
    pub id: GameId,
    pub host: UserId,
    pub settings: GameSettings,
    lobby: RwLock<Lobby>,
    process: RwLock<Process>,
    game_end: Signal,
    events: Mutex<Option<mpsc::UnboundedSender<Event>>>,
}

impl Game {
    /// Create a game with the host already seated. The returned receiver is
    /// the single reader end of the game's event channel.
    pub fn new(
        id: GameId,
        host: User,
        settings: GameSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let host_id = host.id;
        let mut lobby = Lobby::default();
        lobby.order.push(host_id);
        lobby.words.by_user.insert(host_id, HashSet::new());
        lobby.seats.insert(
            host_id,
            PlayerSeat {
                user: host,
                quit: Signal::new(),
            },
        );

        let game = Arc::new(Self {
            id,
            host: host_id,
            settings,
            lobby: RwLock::new(lobby),
            process: RwLock::new(Process {
                phase: Phase::Lobby,
                storyteller: 0,
                stage: 1,
                teams: Vec::with_capacity(settings.num_players),
                guessed: HashMap::new(),
                stage_results: Vec::new(),
                stage_end: Signal::new(),
                turn: None,
            }),
            game_end: Signal::new(),
            events: Mutex::new(Some(tx)),
        });

        (game, rx)
    }

    /// Fired once, at game end or forceful termination. After it fires no
    /// further events are produced for this game.
    pub fn ended(&self) -> &Signal {
        &self.game_end
    }

    /// Push an event onto the game channel. Never blocks; silently dropped
    /// once the game has ended.
    pub fn emit(&self, event: Event) {
        if self.game_end.is_fired() {
            return;
        }
        let sender = match self.events.lock() {
            Ok(guard) => guard.as_ref().cloned(),
            Err(_) => None,
        };
        if let Some(tx) = sender {
            let _ = tx.send(event);
        }
    }

    /// Drop the sender so the dispatcher drains and finishes.
    pub(crate) fn close_events(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.take();
        }
    }

    pub async fn phase(&self) -> Phase {
        self.process.read().await.phase
    }

    pub async fn player_ids(&self) -> Vec<UserId> {
        self.lobby.read().await.order.clone()
    }

    pub async fn quit_signal(&self, id: UserId) -> Option<Signal> {
        self.lobby
            .read()
            .await
            .seats
            .get(&id)
            .map(|seat| seat.quit.clone())
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        let lobby = self.lobby.read().await;
        GameSnapshot {
            id: self.id,
            host: self.host,
            num_players: self.settings.num_players,
            timer: self.settings.turn_seconds,
            num_words: self.settings.num_words,
            num_stages: self.settings.num_stages,
            players: lobby
                .order
                .iter()
                .filter_map(|id| lobby.seats.get(id))
                .map(|seat| seat.user.clone())
                .collect(),
        }
    }

    /// Seat a joiner. Fails when the lobby is full or the user already sits
    /// in it.
    pub async fn add_player(&self, user: User) -> Result<(), DomainError> {
        let mut lobby = self.lobby.write().await;
        if lobby.seats.len() == self.settings.num_players {
            return Err(DomainError::LobbyFull);
        }
        if lobby.seats.contains_key(&user.id) {
            return Err(DomainError::AlreadyJoined);
        }
        let id = user.id;
        lobby.order.push(id);
        lobby.words.by_user.insert(id, HashSet::new());
        lobby.seats.insert(
            id,
            PlayerSeat {
                user,
                quit: Signal::new(),
            },
        );
        Ok(())
    }

    /// Unseat a player, handing back the seat so the caller can fire its
    /// quit signal.
    pub async fn remove_seat(&self, id: UserId) -> Result<PlayerSeat, DomainError> {
        let mut lobby = self.lobby.write().await;
        let seat = lobby
            .seats
            .remove(&id)
            .ok_or(DomainError::UnknownPlayer(id))?;
        lobby.order.retain(|&other| other != id);
        lobby.words.by_user.remove(&id);
        Ok(seat)
    }

    /// Put one word into the pool on behalf of a player.
    pub async fn add_word(&self, id: UserId, word: &str) -> Result<(), DomainError> {
        let mut lobby = self.lobby.write().await;
        let owned = lobby
            .words
            .by_user
            .get(&id)
            .ok_or(DomainError::UnknownPlayer(id))?;
        if owned.len() == self.settings.num_words {
            return Err(DomainError::WordQuotaReached);
        }
        if lobby.words.all.contains(word) {
            return Err(DomainError::DuplicateWord);
        }
        if let Some(owned) = lobby.words.by_user.get_mut(&id) {
            owned.insert(word.to_string());
        }
        lobby.words.all.insert(word.to_string());
        Ok(())
    }

    /// True once every player has submitted their full quota.
    pub async fn words_submission_complete(&self) -> bool {
        let lobby = self.lobby.read().await;
        lobby.words.all.len() == self.settings.num_players * self.settings.num_words
    }

    /// Host starts word submission once the lobby is full.
    pub async fn begin_word_phase(&self) -> Result<(), Rejection> {
        let mut process = self.process.write().await;
        if process.phase != Phase::Lobby {
            return Err(ClientInputError::WrongPhase("request_to_start").into());
        }
        let seated = self.lobby.read().await.seats.len();
        if seated != self.settings.num_players {
            return Err(DomainError::NotEnoughPlayers.into());
        }
        process.phase = Phase::WordSubmission;
        Ok(())
    }

    /// One Fisher-Yates shuffle of the players; the teammate of index `i` is
    /// index `(i + n/2) mod n`. Runs exactly once per game, when word
    /// submission completes; later calls return `None`.
    pub async fn form_teams(&self) -> Option<Vec<UserId>> {
        let mut process = self.process.write().await;
        if process.phase != Phase::WordSubmission && process.phase != Phase::Lobby {
            return None;
        }
        let mut teams = self.lobby.read().await.order.clone();
        teams.shuffle(&mut rand::thread_rng());
        process.teams = teams.clone();
        process.phase = Phase::Guess;
        Some(teams)
    }

    pub async fn storyteller(&self) -> Option<UserId> {
        let process = self.process.read().await;
        process.teams.get(process.storyteller).copied()
    }

    /// Validate a `ready` from `sender` and, if a word is left in the pool,
    /// open a turn. `Ok(None)` means the pool is exhausted and the stage is
    /// over instead.
    pub async fn try_begin_turn(&self, sender: UserId) -> Result<Option<TurnStart>, Rejection> {
        let mut process = self.process.write().await;
        if process.phase != Phase::Guess {
            return Err(ClientInputError::WrongPhase("ready").into());
        }
        if process.turn.is_some() {
            return Err(ClientInputError::WrongPhase("ready").into());
        }
        let storyteller = match process.teams.get(process.storyteller) {
            Some(&id) => id,
            None => return Err(ClientInputError::WrongPhase("ready").into()),
        };
        if storyteller != sender {
            return Err(ClientInputError::NotStoryteller.into());
        }

        let word = {
            let lobby = self.lobby.read().await;
            Self::pick_unguessed(&lobby.words.all, &process.guessed)
        };
        let Some(word) = word else {
            return Ok(None);
        };

        let turn = Signal::new();
        process.turn = Some(turn.clone());
        Ok(Some(TurnStart {
            word,
            storyteller,
            turn,
            stage_end: process.stage_end.clone(),
        }))
    }

    /// Record a guess for the current storyteller's team. Guessing a word
    /// again overwrites the earlier guesser; a word that was never in the
    /// pool is refused so `guessed` stays a subset of the pool.
    pub async fn guess(&self, word: &str) -> Result<(), DomainError> {
        let mut process = self.process.write().await;
        // Teams are formed before any turn can run.
        let Some(&guesser) = process.teams.get(process.storyteller) else {
            return Err(DomainError::UnknownWord(word.to_string()));
        };
        {
            let lobby = self.lobby.read().await;
            if !lobby.words.all.contains(word) {
                return Err(DomainError::UnknownWord(word.to_string()));
            }
        }
        process.guessed.insert(word.to_string(), guesser);
        Ok(())
    }

    /// Uniform-random draw from the unguessed words, along with the current
    /// storyteller. `None` when the pool is exhausted.
    pub async fn draw_next_word(&self) -> Option<(String, UserId)> {
        let process = self.process.read().await;
        let storyteller = process.teams.get(process.storyteller).copied()?;
        let lobby = self.lobby.read().await;
        Self::pick_unguessed(&lobby.words.all, &process.guessed).map(|word| (word, storyteller))
    }

    fn pick_unguessed(all: &HashSet<String>, guessed: &HashMap<String, UserId>) -> Option<String> {
        let unguessed: Vec<&String> = all.iter().filter(|w| !guessed.contains_key(*w)).collect();
        unguessed.choose(&mut rand::thread_rng()).map(|w| (*w).clone())
    }

    pub async fn turn_active(&self) -> bool {
        self.process.read().await.turn.is_some()
    }

    /// Turn deadline hit: advance the storyteller by one, modulo the player
    /// count. Stale turns (already ended by a stage or game end) are
    /// ignored.
    pub async fn advance_storyteller(&self, turn: &Signal) -> Option<UserId> {
        let mut process = self.process.write().await;
        if !process.turn.as_ref().is_some_and(|current| current.same(turn)) {
            return None;
        }
        process.turn = None;
        process.storyteller = (process.storyteller + 1) % self.settings.num_players;
        process.teams.get(process.storyteller).copied()
    }

    /// Pool exhausted: tally the stage, canonicalize and rank the team
    /// scores, and either roll over into the next stage (fresh `guessed`,
    /// fresh stage signal) or finish the game.
    pub async fn close_stage(&self) -> StageOutcome {
        let mut process = self.process.write().await;
        process.turn = None;

        let results = Self::tally(&process.teams, &process.guessed);
        let stage = process.stage;
        process.stage_results.push(StageResult {
            stage,
            results: results.clone(),
        });

        if process.stage < self.settings.num_stages {
            process.stage += 1;
            process.guessed.clear();
            process.phase = Phase::StageEnd;
            let ended_stage = std::mem::replace(&mut process.stage_end, Signal::new());
            StageOutcome::NextStage {
                results,
                ended_stage,
            }
        } else {
            process.phase = Phase::GameEnd;
            StageOutcome::GameOver { results }
        }
    }

    fn tally(teams: &[UserId], guessed: &HashMap<String, UserId>) -> Vec<TeamResult> {
        let mut per_player: HashMap<UserId, i64> = HashMap::new();
        for &guesser in guessed.values() {
            *per_player.entry(guesser).or_default() += 1;
        }

        let half = teams.len() / 2;
        let mut results: Vec<TeamResult> = (0..half)
            .map(|i| {
                let a = teams[i];
                let b = teams[(i + half) % teams.len()];
                let score = per_player.get(&a).copied().unwrap_or(0)
                    + per_player.get(&b).copied().unwrap_or(0);
                TeamResult::new(a, b, score)
            })
            .collect();
        // Stable sort keeps insertion order between equal scores.
        results.sort_by(|a, b| b.score.cmp(&a.score));
        results
    }

    /// Host walked out: mark the game dead. The caller emits the farewell
    /// and fires the end signal afterwards.
    pub async fn mark_forcefully_ended(&self) {
        let mut process = self.process.write().await;
        process.phase = Phase::ForcefullyEnded;
        process.turn = None;
    }

    /// Continue into the next stage after a stage end.
    pub async fn continue_stage(&self) -> Result<(), Rejection> {
        let mut process = self.process.write().await;
        if process.phase != Phase::StageEnd {
            return Err(ClientInputError::WrongPhase("request_to_continue").into());
        }
        process.phase = Phase::Guess;
        Ok(())
    }

    /// Snapshot everything the persistence layer records about this game.
    pub async fn completed_record(&self) -> CompletedGame {
        let process = self.process.read().await;
        let lobby = self.lobby.read().await;
        CompletedGame {
            id: self.id,
            host: self.host,
            settings: self.settings,
            players: lobby
                .order
                .iter()
                .filter_map(|id| lobby.seats.get(id))
                .map(|seat| seat.user.clone())
                .collect(),
            words_by_user: lobby.words.by_user.clone(),
            guessed: process.guessed.clone(),
            stage_results: process.stage_results.clone(),
            forcefully_ended: process.phase == Phase::ForcefullyEnded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: UserId) -> User {
        User {
            id,
            email: format!("{id}@example.com"),
            username: format!("player-{id}"),
        }
    }

    fn settings() -> GameSettings {
        GameSettings {
            num_players: 2,
            num_words: 2,
            num_stages: 1,
            turn_seconds: 5,
        }
    }

    #[tokio::test]
    async fn lobby_rejects_overflow_and_rejoin() {
        let (game, _rx) = Game::new(1, user(1), settings());

        game.add_player(user(2)).await.unwrap();
        assert_eq!(
            game.add_player(user(3)).await,
            Err(DomainError::LobbyFull)
        );
        assert_eq!(
            {
                let (game, _rx) = Game::new(2, user(1), settings());
                game.add_player(user(1)).await
            },
            Err(DomainError::AlreadyJoined)
        );
        assert_eq!(game.player_ids().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn word_pool_enforces_quota_and_uniqueness() {
        let (game, _rx) = Game::new(1, user(1), settings());
        game.add_player(user(2)).await.unwrap();

        game.add_word(1, "foo").await.unwrap();
        assert_eq!(
            game.add_word(2, "foo").await,
            Err(DomainError::DuplicateWord)
        );
        assert_eq!(
            game.add_word(9, "bar").await,
            Err(DomainError::UnknownPlayer(9))
        );

        game.add_word(1, "bar").await.unwrap();
        assert_eq!(
            game.add_word(1, "baz").await,
            Err(DomainError::WordQuotaReached)
        );

        assert!(!game.words_submission_complete().await);
        game.add_word(2, "baz").await.unwrap();
        game.add_word(2, "qux").await.unwrap();
        assert!(game.words_submission_complete().await);
    }

    #[tokio::test]
    async fn teams_are_a_permutation_with_opposite_pairing() {
        let four = GameSettings {
            num_players: 4,
            ..settings()
        };
        let (game, _rx) = Game::new(1, user(1), four);
        for id in 2..=4 {
            game.add_player(user(id)).await.unwrap();
        }

        let teams = game.form_teams().await.unwrap();
        assert!(game.form_teams().await.is_none());

        let mut sorted = teams.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 3, 4]);

        // Pairs are (i, i + n/2): both orderings must name each other.
        for i in 0..4 {
            let mate = teams[(i + 2) % 4];
            let back = teams[((i + 2) % 4 + 2) % 4];
            assert_eq!(back, teams[i]);
            assert_ne!(mate, teams[i]);
        }
    }

    #[tokio::test]
    async fn draw_never_returns_a_guessed_word() {
        let (game, _rx) = Game::new(1, user(1), settings());
        game.add_player(user(2)).await.unwrap();
        for (id, word) in [(1, "a"), (1, "b"), (2, "c"), (2, "d")] {
            game.add_word(id, word).await.unwrap();
        }
        game.form_teams().await;

        let mut drawn = Vec::new();
        for _ in 0..4 {
            let (word, _storyteller) = game.draw_next_word().await.unwrap();
            assert!(!drawn.contains(&word));
            game.guess(&word).await.unwrap();
            drawn.push(word);
        }
        assert!(game.draw_next_word().await.is_none());
    }

    #[tokio::test]
    async fn guessing_an_unknown_word_is_refused() {
        let (game, _rx) = Game::new(1, user(1), settings());
        game.add_player(user(2)).await.unwrap();
        game.add_word(1, "real").await.unwrap();
        game.form_teams().await;

        assert_eq!(
            game.guess("fake").await,
            Err(DomainError::UnknownWord("fake".to_string()))
        );
        game.guess("real").await.unwrap();
        // Overwrite of an already-guessed word is allowed.
        game.guess("real").await.unwrap();
    }

    #[tokio::test]
    async fn tally_scores_sum_to_guessed_count_and_rank_descending() {
        let four = GameSettings {
            num_players: 4,
            num_words: 1,
            ..settings()
        };
        let (game, _rx) = Game::new(1, user(1), four);
        for id in 2..=4 {
            game.add_player(user(id)).await.unwrap();
        }
        for (id, word) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            game.add_word(id, word).await.unwrap();
        }
        game.form_teams().await;

        for word in ["a", "b", "c"] {
            game.guess(word).await.unwrap();
        }
        let StageOutcome::GameOver { results } = game.close_stage().await else {
            panic!("single-stage game should finish");
        };

        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().map(|r| r.score).sum::<i64>(), 3);
        assert!(results[0].score >= results[1].score);
        for result in &results {
            assert!(result.first_id < result.second_id);
        }
    }

    #[tokio::test]
    async fn multi_stage_rollover_resets_guessed_and_keeps_teams() {
        let two_stage = GameSettings {
            num_players: 2,
            num_words: 1,
            num_stages: 2,
            turn_seconds: 5,
        };
        let (game, _rx) = Game::new(1, user(1), two_stage);
        game.add_player(user(2)).await.unwrap();
        game.add_word(1, "a").await.unwrap();
        game.add_word(2, "b").await.unwrap();
        game.form_teams().await;

        game.guess("a").await.unwrap();
        game.guess("b").await.unwrap();
        let outcome = game.close_stage().await;
        assert!(matches!(outcome, StageOutcome::NextStage { .. }));
        assert_eq!(game.phase().await, Phase::StageEnd);

        // Pool restored, teams untouched.
        game.continue_stage().await.unwrap();
        assert!(game.draw_next_word().await.is_some());
        let record = game.completed_record().await;
        assert_eq!(record.stage_results.len(), 1);
        assert_eq!(record.stage_results[0].stage, 1);
    }

    #[tokio::test]
    async fn no_events_after_game_end_signal() {
        let (game, mut rx) = Game::new(1, user(1), settings());

        game.emit(Event::to(1, 1, hat_types::ServerEvent::WordPhaseStart));
        game.ended().fire();
        game.emit(Event::to(1, 1, hat_types::ServerEvent::Tick(3)));
        game.close_events();

        assert!(matches!(
            rx.recv().await.map(|e| e.event),
            Some(hat_types::ServerEvent::WordPhaseStart)
        ));
        assert!(rx.recv().await.is_none());
    }
}
