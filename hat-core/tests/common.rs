use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use hat_core::Game;
use hat_types::{Event, GameSettings, ServerEvent, User, UserId};

pub fn user(id: UserId) -> User {
    User {
        id,
        email: format!("{id}@example.com"),
        username: format!("player-{id}"),
    }
}

/// A game with a full lobby, host id 1, joiners 2..=n.
pub async fn full_lobby(settings: GameSettings) -> (Arc<Game>, UnboundedReceiver<Event>) {
    let (game, rx) = Game::new(1, user(1), settings);
    for id in 2..=settings.num_players as UserId {
        game.add_player(user(id)).await.unwrap();
    }
    (game, rx)
}

pub async fn next_event(rx: &mut UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed unexpectedly")
}

/// Skip ahead to the next event matching `pred`, discarding everything else.
pub async fn next_matching(
    rx: &mut UnboundedReceiver<Event>,
    pred: impl Fn(&ServerEvent) -> bool,
) -> Event {
    loop {
        let event = next_event(rx).await;
        if pred(&event.event) {
            return event;
        }
    }
}

/// The word carried by the next `story` event.
pub async fn next_story(rx: &mut UnboundedReceiver<Event>) -> (String, Event) {
    let event = next_matching(rx, |e| matches!(e, ServerEvent::Story(_))).await;
    let ServerEvent::Story(ref word) = event.event else {
        unreachable!();
    };
    (word.clone(), event.clone())
}
