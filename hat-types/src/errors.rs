use thiserror::Error;

use crate::{GameId, UserId};

/// Rule violations raised by game-state mutators. These are surfaced to the
/// offending player as an `error` event and never abort the game.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("too many players")]
    LobbyFull,
    #[error("player already in game")]
    AlreadyJoined,
    #[error("no player with id {0}")]
    UnknownPlayer(UserId),
    #[error("words limit reached")]
    WordQuotaReached,
    #[error("already used this word")]
    DuplicateWord,
    #[error("no word {0:?} in this game")]
    UnknownWord(String),
    #[error("not enough players")]
    NotEnoughPlayers,
    #[error("no game with id {0}")]
    NotFound(GameId),
}

/// Problems with the inbound frame itself: unparsable JSON, an unknown tag,
/// a missing payload, or a command sent in the wrong phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientInputError {
    #[error("can't decode message: {0}")]
    Malformed(String),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("message {0:?} needs a word payload")]
    MissingPayload(String),
    #[error("{0} is not allowed right now")]
    WrongPhase(&'static str),
    #[error("only the host can do that")]
    NotHost,
    #[error("it is not your turn to tell")]
    NotStoryteller,
    #[error("no turn is running")]
    NoActiveTurn,
}
