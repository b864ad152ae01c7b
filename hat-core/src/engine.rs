use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, sleep};
use tracing::{info, warn};

use hat_types::{ClientCommand, ClientInputError, Event, ServerEvent, UserId};

use crate::game::{Game, Phase, Rejection, StageOutcome, TurnStart};
use crate::signal::Signal;

/// Apply one client command to a game. Rule violations never escape: they
/// come back to the sender as an `error` event.
pub async fn handle_command(game: &Arc<Game>, sender: UserId, command: ClientCommand) {
    let outcome = match command {
        ClientCommand::AddWord(word) => handle_add_word(game, sender, &word).await,
        ClientCommand::Ready => handle_ready(game, sender).await,
        ClientCommand::Guess(word) => handle_guess(game, sender, &word).await,
        ClientCommand::RequestToStart => handle_start(game, sender).await,
        ClientCommand::RequestToContinue => handle_continue(game, sender).await,
        ClientCommand::QuitLobby(target) => handle_quit(game, sender, target).await,
    };

    if let Err(rejection) = outcome {
        warn!(game = game.id, player = sender, %rejection, "command rejected");
        notify_error(game, sender, rejection.to_string());
    }
}

/// Send an `error` event to a single player.
pub fn notify_error(game: &Game, recipient: UserId, message: String) {
    game.emit(Event::to(game.id, recipient, ServerEvent::Error(message)));
}

/// Broadcast the current lobby snapshot; sent on every join and leave.
pub async fn announce_lobby(game: &Game) {
    let snapshot = game.snapshot().await;
    let ids = game.player_ids().await;
    game.emit(Event::broadcast(
        game.id,
        ids,
        ServerEvent::GameInfo(snapshot),
    ));
}

async fn handle_start(game: &Arc<Game>, sender: UserId) -> Result<(), Rejection> {
    if sender != game.host {
        return Err(ClientInputError::NotHost.into());
    }
    game.begin_word_phase().await?;
    let ids = game.player_ids().await;
    game.emit(Event::broadcast(game.id, ids, ServerEvent::WordPhaseStart));
    info!(game = game.id, "word submission started");
    Ok(())
}

async fn handle_add_word(game: &Arc<Game>, sender: UserId, word: &str) -> Result<(), Rejection> {
    if game.phase().await != Phase::WordSubmission {
        return Err(ClientInputError::WrongPhase("word").into());
    }
    game.add_word(sender, word).await?;
    game.emit(Event::to(
        game.id,
        sender,
        ServerEvent::AddWord(word.to_string()),
    ));

    if game.words_submission_complete().await {
        start_guess_phase(game).await;
    }
    Ok(())
}

/// The hat is full: shuffle teams, tell every player who their teammate is,
/// and hand the floor to the first storyteller.
async fn start_guess_phase(game: &Arc<Game>) {
    let Some(teams) = game.form_teams().await else {
        return;
    };
    let half = teams.len() / 2;
    for (i, &id) in teams.iter().enumerate() {
        let teammate = teams[(i + half) % teams.len()];
        game.emit(Event::to(game.id, id, ServerEvent::Team(teammate)));
    }
    info!(game = game.id, "guess phase started");
    announce_storyteller(game).await;
}

async fn announce_storyteller(game: &Game) {
    let Some(storyteller) = game.storyteller().await else {
        return;
    };
    let ids = game.player_ids().await;
    game.emit(Event::broadcast(
        game.id,
        ids,
        ServerEvent::GuessPhaseStart(storyteller),
    ));
    game.emit(Event::to(game.id, storyteller, ServerEvent::ReadyStoryteller));
}

async fn handle_ready(game: &Arc<Game>, sender: UserId) -> Result<(), Rejection> {
    match game.try_begin_turn(sender).await? {
        Some(turn) => {
            start_turn(game, turn);
            Ok(())
        }
        // Nothing left to draw: the stage is over.
        None => {
            end_stage(game).await;
            Ok(())
        }
    }
}

fn start_turn(game: &Arc<Game>, turn: TurnStart) {
    let TurnStart {
        word,
        storyteller,
        turn,
        stage_end,
    } = turn;
    game.emit(Event::to(game.id, storyteller, ServerEvent::Story(word)));

    tokio::spawn(run_ticker(game.clone(), stage_end.clone()));
    tokio::spawn(run_turn(game.clone(), turn, stage_end));
}

/// Turn controller: waits for whichever comes first of the turn deadline,
/// the stage end, or the game end. Only the deadline advances the
/// storyteller.
async fn run_turn(game: Arc<Game>, turn: Signal, stage_end: Signal) {
    tokio::select! {
        _ = sleep(Duration::from_secs(game.settings.turn_seconds)) => {
            if game.advance_storyteller(&turn).await.is_some() {
                announce_storyteller(&game).await;
            }
        }
        _ = stage_end.fired() => {}
        _ = game.ended().fired() => {}
    }
    turn.fire();
}

/// Tick emitter: one `tick` per second with the seconds remaining, counting
/// down to zero unless the stage or game ends first.
async fn run_ticker(game: Arc<Game>, stage_end: Signal) {
    let mut remaining = game.settings.turn_seconds;
    let mut timer = interval(Duration::from_secs(1));
    timer.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = timer.tick() => {
                remaining = remaining.saturating_sub(1);
                let ids = game.player_ids().await;
                game.emit(Event::broadcast(game.id, ids, ServerEvent::Tick(remaining)));
                if remaining == 0 {
                    return;
                }
            }
            _ = stage_end.fired() => return,
            _ = game.ended().fired() => return,
        }
    }
}

async fn handle_guess(game: &Arc<Game>, _sender: UserId, word: &str) -> Result<(), Rejection> {
    if game.phase().await != Phase::Guess {
        return Err(ClientInputError::WrongPhase("guess").into());
    }
    if !game.turn_active().await {
        return Err(ClientInputError::NoActiveTurn.into());
    }
    game.guess(word).await?;

    // A guessed word is immediately followed by the next draw.
    match game.draw_next_word().await {
        Some((story, storyteller)) => {
            game.emit(Event::to(game.id, storyteller, ServerEvent::Story(story)));
        }
        None => end_stage(game).await,
    }
    Ok(())
}

async fn end_stage(game: &Arc<Game>) {
    match game.close_stage().await {
        StageOutcome::NextStage {
            results,
            ended_stage,
        } => {
            ended_stage.fire();
            let ids = game.player_ids().await;
            game.emit(Event::broadcast(game.id, ids, ServerEvent::StageEnd(results)));
            game.emit(Event::to(game.id, game.host, ServerEvent::ReadyToStart));
            info!(game = game.id, "stage finished, waiting for host");
        }
        StageOutcome::GameOver { results } => {
            let ids = game.player_ids().await;
            game.emit(Event::broadcast(game.id, ids, ServerEvent::GameEnd(results)));
            game.ended().fire();
            game.close_events();
            info!(game = game.id, "game finished");
        }
    }
}

async fn handle_continue(game: &Arc<Game>, sender: UserId) -> Result<(), Rejection> {
    if sender != game.host {
        return Err(ClientInputError::NotHost.into());
    }
    game.continue_stage().await?;
    info!(game = game.id, "next stage started");
    announce_storyteller(game).await;
    Ok(())
}

async fn handle_quit(
    game: &Arc<Game>,
    sender: UserId,
    target: Option<UserId>,
) -> Result<(), Rejection> {
    match target {
        // The host may name another player to evict from the lobby.
        Some(victim) if victim != sender => {
            if sender != game.host {
                return Err(ClientInputError::NotHost.into());
            }
            if victim == game.host {
                return Err(ClientInputError::WrongPhase("quit_lobby").into());
            }
            remove_from_lobby(game, victim).await
        }
        _ => {
            if sender == game.host {
                force_end(game).await;
                Ok(())
            } else {
                remove_from_lobby(game, sender).await
            }
        }
    }
}

/// A non-host player leaves (or is evicted). Only possible while the game is
/// still gathering players; once words are in play the lobby is sealed.
async fn remove_from_lobby(game: &Arc<Game>, id: UserId) -> Result<(), Rejection> {
    if game.phase().await != Phase::Lobby {
        return Err(ClientInputError::WrongPhase("quit_lobby").into());
    }
    let seat = game.remove_seat(id).await?;
    game.emit(Event::to(game.id, id, ServerEvent::ForcefullyEnded));
    seat.quit.fire();
    announce_lobby(game).await;
    info!(game = game.id, player = id, "player left the lobby");
    Ok(())
}

/// The host walked out: tell everyone, then wedge the game shut.
async fn force_end(game: &Arc<Game>) {
    game.mark_forcefully_ended().await;
    let ids = game.player_ids().await;
    game.emit(Event::broadcast(game.id, ids, ServerEvent::ForcefullyEnded));
    game.ended().fire();
    game.close_events();
    info!(game = game.id, "game forcefully ended by host");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hat_types::{GameSettings, User};

    fn user(id: UserId) -> User {
        User {
            id,
            email: format!("{id}@example.com"),
            username: format!("player-{id}"),
        }
    }

    fn new_game(
        settings: GameSettings,
    ) -> (Arc<Game>, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        Game::new(1, user(1), settings)
    }

    fn settings() -> GameSettings {
        GameSettings {
            num_players: 2,
            num_words: 1,
            num_stages: 1,
            turn_seconds: 5,
        }
    }

    async fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("expected an event")
            .expect("event channel open")
    }

    #[tokio::test]
    async fn only_the_host_can_start() {
        let (game, mut rx) = new_game(settings());
        game.add_player(user(2)).await.unwrap();

        handle_command(&game, 2, ClientCommand::RequestToStart).await;
        let event = next_event(&mut rx).await;
        assert!(matches!(event.event, ServerEvent::Error(_)));
        assert!(event.recipients.contains(&2));
        assert_eq!(game.phase().await, Phase::Lobby);
    }

    #[tokio::test]
    async fn start_requires_a_full_lobby() {
        let (game, mut rx) = new_game(settings());

        handle_command(&game, 1, ClientCommand::RequestToStart).await;
        let event = next_event(&mut rx).await;
        assert!(
            matches!(event.event, ServerEvent::Error(ref msg) if msg == "not enough players")
        );

        game.add_player(user(2)).await.unwrap();
        handle_command(&game, 1, ClientCommand::RequestToStart).await;
        let event = next_event(&mut rx).await;
        assert!(matches!(event.event, ServerEvent::WordPhaseStart));
        assert_eq!(event.recipients.len(), 2);
    }

    #[tokio::test]
    async fn words_are_rejected_outside_submission_phase() {
        let (game, mut rx) = new_game(settings());
        game.add_player(user(2)).await.unwrap();

        handle_command(&game, 1, ClientCommand::AddWord("early".into())).await;
        let event = next_event(&mut rx).await;
        assert!(matches!(event.event, ServerEvent::Error(_)));
    }

    #[tokio::test]
    async fn host_quit_forcefully_ends_the_game() {
        let (game, mut rx) = new_game(settings());
        game.add_player(user(2)).await.unwrap();

        handle_command(&game, 1, ClientCommand::QuitLobby(None)).await;

        let event = next_event(&mut rx).await;
        assert!(matches!(event.event, ServerEvent::ForcefullyEnded));
        assert_eq!(event.recipients.len(), 2);
        assert!(game.ended().is_fired());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn non_host_quit_refreshes_the_lobby() {
        let (game, mut rx) = new_game(settings());
        game.add_player(user(2)).await.unwrap();

        handle_command(&game, 2, ClientCommand::QuitLobby(None)).await;

        let farewell = next_event(&mut rx).await;
        assert!(matches!(farewell.event, ServerEvent::ForcefullyEnded));
        assert_eq!(farewell.recipients, [2].into_iter().collect());

        let info = next_event(&mut rx).await;
        match info.event {
            ServerEvent::GameInfo(snapshot) => {
                assert_eq!(snapshot.players.len(), 1);
                assert_eq!(snapshot.players[0].id, 1);
            }
            other => panic!("expected game info, got {other:?}"),
        }
        assert!(!game.ended().is_fired());
    }

    #[tokio::test]
    async fn host_can_evict_a_joiner_but_not_vice_versa() {
        let (game, mut rx) = new_game(settings());
        game.add_player(user(2)).await.unwrap();

        handle_command(&game, 2, ClientCommand::QuitLobby(Some(1))).await;
        let event = next_event(&mut rx).await;
        assert!(matches!(event.event, ServerEvent::Error(_)));

        handle_command(&game, 1, ClientCommand::QuitLobby(Some(2))).await;
        let farewell = next_event(&mut rx).await;
        assert!(matches!(farewell.event, ServerEvent::ForcefullyEnded));
        assert_eq!(farewell.recipients, [2].into_iter().collect());
        assert_eq!(game.player_ids().await, vec![1]);
    }

    #[tokio::test]
    async fn ready_from_the_wrong_player_is_refused() {
        let (game, mut rx) = new_game(settings());
        game.add_player(user(2)).await.unwrap();
        handle_command(&game, 1, ClientCommand::RequestToStart).await;
        handle_command(&game, 1, ClientCommand::AddWord("a".into())).await;
        handle_command(&game, 2, ClientCommand::AddWord("b".into())).await;

        let storyteller = game.storyteller().await.unwrap();
        let bystander = if storyteller == 1 { 2 } else { 1 };

        handle_command(&game, bystander, ClientCommand::Ready).await;
        let rejected = loop {
            let event = next_event(&mut rx).await;
            if let ServerEvent::Error(ref msg) = event.event {
                break msg.clone();
            }
        };
        assert_eq!(rejected, "it is not your turn to tell");
    }
}
