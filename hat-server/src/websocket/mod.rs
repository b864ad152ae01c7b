use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::registry::{GameSession, Registry};
use hat_core::{Signal, engine};
use hat_types::{
    ClientCommand, ClientInputError, Envelope, GameId, GameSettings, ServerEvent, User,
};

/// Open a new game with `host` as its first player and bind their socket.
pub async fn run_host(
    websocket: WebSocket,
    registry: Arc<Registry>,
    host: User,
    settings: GameSettings,
) {
    let host_id = host.id;
    let session = registry.host_game(host, settings).await;
    attach_and_run(websocket, registry, session, host_id).await;
}

/// Bind a joiner's socket to an existing game. A refused join (unknown
/// game, full or already-entered lobby) is answered with a single `error`
/// frame before the socket closes.
pub async fn run_join(
    websocket: WebSocket,
    registry: Arc<Registry>,
    game_id: GameId,
    user: User,
) {
    let user_id = user.id;
    match registry.join_game(game_id, user).await {
        Ok(session) => attach_and_run(websocket, registry, session, user_id).await,
        Err(error) => {
            warn!(game = game_id, player = user_id, %error, "join refused");
            let frame = serde_json::to_string(&ServerEvent::Error(error.to_string()))
                .unwrap_or_default();
            let (mut ws_tx, _ws_rx) = websocket.split();
            let _ = ws_tx.send(Message::text(frame)).await;
            let _ = ws_tx.close().await;
        }
    }
}

/// Per-connection duplex loop: a writer task drains the player's outbound
/// queue, while the read loop turns frames into commands until the socket
/// dies, the player is kicked, or the game ends.
async fn attach_and_run(
    websocket: WebSocket,
    registry: Arc<Registry>,
    session: Arc<GameSession>,
    user_id: hat_types::UserId,
) {
    let connection = Uuid::new_v4();
    info!(%connection, game = session.game.id, player = user_id, "socket attached");

    let (mut ws_tx, mut ws_rx) = websocket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    session.attach_socket(user_id, out_tx).await;

    // Joining (or hosting) refreshes the lobby for everyone.
    engine::announce_lobby(&session.game).await;

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(error) = ws_tx.send(message).await {
                warn!(%connection, error = %error, "failed to write to socket");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let quit = session
        .game
        .quit_signal(user_id)
        .await
        .unwrap_or_else(Signal::new);
    let ended = session.game.ended().clone();

    let mut detach = true;
    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(message)) => handle_frame(message, &registry, &session, user_id).await,
                    Some(Err(error)) => {
                        warn!(%connection, error = %error, "websocket read error");
                        break;
                    }
                    None => break,
                }
            }
            _ = quit.fired() => break,
            // The registry closes every socket during teardown; keep ours
            // attached so the farewell events still flush.
            _ = ended.fired() => {
                detach = false;
                break;
            }
        }
    }

    if detach {
        session.detach_socket(user_id).await;
    }
    let _ = writer.await;
    info!(%connection, game = session.game.id, player = user_id, "socket closed");
}

/// One inbound text frame: parse the `{Type, Msg}` envelope, convert it to
/// a command, and hand it to the registry. Anything unreadable becomes an
/// `error` event back to the sender; the game itself never stops over a
/// bad frame.
async fn handle_frame(
    message: Message,
    registry: &Registry,
    session: &GameSession,
    user_id: hat_types::UserId,
) {
    if !message.is_text() {
        return;
    }
    let Ok(text) = message.to_str() else {
        return;
    };

    let command = match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => match ClientCommand::try_from(envelope) {
            Ok(command) => command,
            Err(error) => {
                engine::notify_error(&session.game, user_id, error.to_string());
                return;
            }
        },
        Err(error) => {
            engine::notify_error(
                &session.game,
                user_id,
                ClientInputError::Malformed(error.to_string()).to_string(),
            );
            return;
        }
    };

    if let Err(error) = registry
        .dispatch_command(session.game.id, user_id, command)
        .await
    {
        // The game is already gone; the socket is about to close anyway.
        warn!(game = session.game.id, player = user_id, %error, "command for dead game");
    }
}
