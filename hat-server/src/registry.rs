use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{error, info, warn};
use warp::ws::Message;

use hat_core::{Game, GameStore, engine};
use hat_types::{ClientCommand, DomainError, Event, GameId, GameSettings, GameSnapshot, User, UserId};

/// A live game together with the outbound socket of every connected player.
pub struct GameSession {
    pub game: Arc<Game>,
    sockets: RwLock<HashMap<UserId, mpsc::UnboundedSender<Message>>>,
}

impl GameSession {
    fn new(game: Arc<Game>) -> Self {
        Self {
            game,
            sockets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn attach_socket(&self, id: UserId, sender: mpsc::UnboundedSender<Message>) {
        self.sockets.write().await.insert(id, sender);
    }

    /// Forget one player's socket; their writer drains and closes.
    pub async fn detach_socket(&self, id: UserId) {
        self.sockets.write().await.remove(&id);
    }

    async fn close_all(&self) {
        self.sockets.write().await.clear();
    }

    /// Fan one event out to its recipients. A recipient with no usable
    /// socket is skipped; the game does not care whether a player is
    /// still listening.
    async fn deliver(&self, event: &Event) {
        let frame = match serde_json::to_string(&event.event) {
            Ok(frame) => frame,
            Err(error) => {
                error!(game = event.game_id, %error, "failed to serialize event");
                return;
            }
        };

        let sockets = self.sockets.read().await;
        for id in &event.recipients {
            if let Some(sender) = sockets.get(id) {
                if sender.send(Message::text(frame.clone())).is_err() {
                    warn!(game = event.game_id, player = id, "dropping event for closed socket");
                }
            }
        }
    }
}

/// All currently running games, behind one reader-writer lock. Ids are
/// allocated as `1 + max(live ids)`, so they are unique among live games
/// and O(N) to pick, which is fine for the expected few hundred games.
pub struct Registry {
    games: RwLock<HashMap<GameId, Arc<GameSession>>>,
    store: Arc<dyn GameStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn GameStore>) -> Arc<Self> {
        Arc::new(Self {
            games: RwLock::new(HashMap::new()),
            store,
        })
    }

    /// Create a game with `host` already seated, and spawn its event
    /// dispatcher.
    pub async fn host_game(
        self: &Arc<Self>,
        host: User,
        settings: GameSettings,
    ) -> Arc<GameSession> {
        let mut games = self.games.write().await;
        let id = games.keys().max().copied().unwrap_or(0) + 1;

        let (game, events) = Game::new(id, host, settings);
        let session = Arc::new(GameSession::new(game));
        games.insert(id, session.clone());

        tokio::spawn(dispatch_events(self.clone(), session.clone(), events));
        info!(game = id, "game created");
        session
    }

    pub async fn find(&self, id: GameId) -> Option<Arc<GameSession>> {
        self.games.read().await.get(&id).cloned()
    }

    pub async fn snapshot(&self, id: GameId) -> Option<GameSnapshot> {
        let session = self.find(id).await?;
        Some(session.game.snapshot().await)
    }

    /// Seat `user` in an existing game. The socket is attached separately,
    /// once the caller holds the session.
    pub async fn join_game(
        &self,
        id: GameId,
        user: User,
    ) -> Result<Arc<GameSession>, DomainError> {
        let session = self.find(id).await.ok_or(DomainError::NotFound(id))?;
        session.game.add_player(user).await?;
        Ok(session)
    }

    /// Forward a parsed client command to the engine.
    pub async fn dispatch_command(
        &self,
        game_id: GameId,
        user_id: UserId,
        command: ClientCommand,
    ) -> Result<(), DomainError> {
        let session = self
            .find(game_id)
            .await
            .ok_or(DomainError::NotFound(game_id))?;
        engine::handle_command(&session.game, user_id, command).await;
        Ok(())
    }

    /// Called by the dispatcher once the game's event channel closes:
    /// unregister, persist when there is anything worth keeping, and close
    /// every remaining socket.
    async fn finish_game(&self, id: GameId) {
        let session = { self.games.write().await.remove(&id) };
        let Some(session) = session else {
            return;
        };

        let record = session.game.completed_record().await;
        if record.worth_recording() {
            // The in-memory results already went out to the players; a
            // persistence failure is logged, not replayed.
            if let Err(error) = self.store.add_game(&record).await {
                error!(game = id, %error, "failed to persist finished game");
            }
        }

        session.close_all().await;
        info!(game = id, "game torn down");
    }

    pub async fn active_games(&self) -> usize {
        self.games.read().await.len()
    }
}

/// Per-game dispatcher: the single reader of the event channel. Events from
/// one producer arrive in emission order, and each recipient sees its own
/// events in FIFO order through its socket queue.
async fn dispatch_events(
    registry: Arc<Registry>,
    session: Arc<GameSession>,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = events.recv().await {
        session.deliver(&event).await;
    }
    registry.finish_game(session.game.id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    use hat_core::CompletedGame;

    #[derive(Default)]
    struct RecordingStore {
        games: Mutex<Vec<CompletedGame>>,
    }

    #[async_trait]
    impl GameStore for RecordingStore {
        async fn add_game(&self, game: &CompletedGame) -> Result<()> {
            self.games.lock().unwrap().push(game.clone());
            Ok(())
        }
    }

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
            num_words: 1,
            num_stages: 1,
            turn_seconds: 30,
        }
    }

    #[tokio::test]
    async fn ids_grow_from_the_live_maximum() {
        let store = Arc::new(RecordingStore::default());
        let registry = Registry::new(store);

        let first = registry.host_game(user(1), settings()).await;
        let second = registry.host_game(user(2), settings()).await;
        assert_eq!(first.game.id, 1);
        assert_eq!(second.game.id, 2);
        assert_eq!(registry.active_games().await, 2);
    }

    #[tokio::test]
    async fn join_unknown_game_fails() {
        let store = Arc::new(RecordingStore::default());
        let registry = Registry::new(store);

        let result = registry.join_game(7, user(2)).await;
        assert!(matches!(result, Err(DomainError::NotFound(7))));
    }

    #[tokio::test]
    async fn forced_end_without_tally_skips_persistence() {
        let store = Arc::new(RecordingStore::default());
        let registry = Registry::new(store.clone());

        let session = registry.host_game(user(1), settings()).await;
        session.game.add_player(user(2)).await.unwrap();

        registry
            .dispatch_command(1, 1, ClientCommand::QuitLobby(None))
            .await
            .unwrap();

        // The dispatcher notices the closed channel and tears the game down.
        for _ in 0..50 {
            if registry.active_games().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.active_games().await, 0);
        assert!(store.games.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn finished_game_is_persisted() {
        let store = Arc::new(RecordingStore::default());
        let registry = Registry::new(store.clone());

        let session = registry.host_game(user(1), settings()).await;
        session.game.add_player(user(2)).await.unwrap();

        registry
            .dispatch_command(1, 1, ClientCommand::RequestToStart)
            .await
            .unwrap();
        registry
            .dispatch_command(1, 1, ClientCommand::AddWord("fox".into()))
            .await
            .unwrap();
        registry
            .dispatch_command(1, 2, ClientCommand::AddWord("owl".into()))
            .await
            .unwrap();

        let storyteller = session.game.storyteller().await.unwrap();
        let teammate = if storyteller == 1 { 2 } else { 1 };
        registry
            .dispatch_command(1, storyteller, ClientCommand::Ready)
            .await
            .unwrap();
        registry
            .dispatch_command(1, teammate, ClientCommand::Guess("fox".into()))
            .await
            .unwrap();
        registry
            .dispatch_command(1, teammate, ClientCommand::Guess("owl".into()))
            .await
            .unwrap();

        for _ in 0..50 {
            if registry.active_games().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let recorded = store.games.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].id, 1);
        assert_eq!(recorded[0].stage_results.len(), 1);
        assert_eq!(recorded[0].stage_results[0].results[0].score, 2);
        assert!(!recorded[0].forcefully_ended);
    }
}
