use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::{GameId, UserId, errors::ClientInputError, game::GameSnapshot, game::TeamResult};

/// One WebSocket text frame, both directions: `{"Type": tag, "Msg": payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Msg", default)]
    pub msg: Value,
}

/// Parsed inbound command, one per state-changing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Submit one word during word submission.
    AddWord(String),
    /// Storyteller announces readiness, starting a turn.
    Ready,
    /// Record a guess of the drawn word.
    Guess(String),
    /// Host begins the word-submission phase.
    RequestToStart,
    /// Host begins the next stage after a stage end.
    RequestToContinue,
    /// Sender leaves; the host may instead name a joiner to evict.
    QuitLobby(Option<UserId>),
}

impl TryFrom<Envelope> for ClientCommand {
    type Error = ClientInputError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let word_payload = |msg: &Value| {
            msg.as_str()
                .map(str::to_owned)
                .filter(|w| !w.trim().is_empty())
                .ok_or_else(|| ClientInputError::MissingPayload(envelope.kind.clone()))
        };

        match envelope.kind.as_str() {
            "word" => Ok(ClientCommand::AddWord(word_payload(&envelope.msg)?)),
            "guess" => Ok(ClientCommand::Guess(word_payload(&envelope.msg)?)),
            "ready" => Ok(ClientCommand::Ready),
            "request_to_start" => Ok(ClientCommand::RequestToStart),
            "request_to_continue" => Ok(ClientCommand::RequestToContinue),
            "quit_lobby" => {
                let target = envelope.msg.as_u64().map(|id| id as UserId);
                Ok(ClientCommand::QuitLobby(target))
            }
            other => Err(ClientInputError::UnknownType(other.to_string())),
        }
    }
}

/// Outbound event payloads, matched by clients on the `Type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "Type", content = "Msg")]
#[ts(export)]
pub enum ServerEvent {
    /// Game snapshot for lobby display.
    #[serde(rename = "game")]
    GameInfo(GameSnapshot),
    #[serde(rename = "word_phase_start")]
    WordPhaseStart,
    /// Carries the current storyteller's id.
    #[serde(rename = "guess_phase_start")]
    GuessPhaseStart(UserId),
    /// Carries the receiver's teammate id.
    #[serde(rename = "team")]
    Team(UserId),
    /// Echo of an accepted word, to its submitter only.
    #[serde(rename = "add_word")]
    AddWord(String),
    #[serde(rename = "error")]
    Error(String),
    /// The drawn word, to the storyteller only.
    #[serde(rename = "story")]
    Story(String),
    /// Seconds remaining in the running turn.
    #[serde(rename = "tick")]
    Tick(u64),
    #[serde(rename = "ready_to_start")]
    ReadyToStart,
    #[serde(rename = "ready_storyteller")]
    ReadyStoryteller,
    #[serde(rename = "stage_end")]
    StageEnd(Vec<TeamResult>),
    #[serde(rename = "game_end")]
    GameEnd(Vec<TeamResult>),
    #[serde(rename = "forcefully_ended")]
    ForcefullyEnded,
}

/// An emitted event with its recipient set. Values are immutable once
/// pushed onto a game's event channel.
#[derive(Debug, Clone)]
pub struct Event {
    pub game_id: GameId,
    pub event: ServerEvent,
    pub recipients: HashSet<UserId>,
}

impl Event {
    pub fn to(game_id: GameId, recipient: UserId, event: ServerEvent) -> Self {
        Self {
            game_id,
            event,
            recipients: HashSet::from([recipient]),
        }
    }

    pub fn broadcast(
        game_id: GameId,
        recipients: impl IntoIterator<Item = UserId>,
        event: ServerEvent,
    ) -> Self {
        Self {
            game_id,
            event,
            recipients: recipients.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_word_command_parses() {
        let envelope: Envelope = serde_json::from_str(r#"{"Type":"word","Msg":"fox"}"#).unwrap();
        let command = ClientCommand::try_from(envelope).unwrap();
        assert_eq!(command, ClientCommand::AddWord("fox".to_string()));
    }

    #[test]
    fn inbound_ready_needs_no_payload() {
        let envelope: Envelope = serde_json::from_str(r#"{"Type":"ready"}"#).unwrap();
        assert_eq!(
            ClientCommand::try_from(envelope).unwrap(),
            ClientCommand::Ready
        );
    }

    #[test]
    fn quit_lobby_accepts_optional_target() {
        let plain: Envelope = serde_json::from_str(r#"{"Type":"quit_lobby"}"#).unwrap();
        assert_eq!(
            ClientCommand::try_from(plain).unwrap(),
            ClientCommand::QuitLobby(None)
        );

        let evict: Envelope = serde_json::from_str(r#"{"Type":"quit_lobby","Msg":4}"#).unwrap();
        assert_eq!(
            ClientCommand::try_from(evict).unwrap(),
            ClientCommand::QuitLobby(Some(4))
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let envelope: Envelope = serde_json::from_str(r#"{"Type":"dance"}"#).unwrap();
        assert!(ClientCommand::try_from(envelope).is_err());
    }

    #[test]
    fn word_payload_must_be_a_string() {
        let envelope: Envelope = serde_json::from_str(r#"{"Type":"word","Msg":17}"#).unwrap();
        assert!(ClientCommand::try_from(envelope).is_err());
    }

    #[test]
    fn outbound_events_use_type_msg_envelope() {
        let frame = serde_json::to_value(ServerEvent::Story("fox".to_string())).unwrap();
        assert_eq!(frame["Type"], "story");
        assert_eq!(frame["Msg"], "fox");

        let frame = serde_json::to_value(ServerEvent::Tick(9)).unwrap();
        assert_eq!(frame["Type"], "tick");
        assert_eq!(frame["Msg"], 9);
    }

    #[test]
    fn stage_results_serialize_with_canonical_ids() {
        let frame = serde_json::to_value(ServerEvent::StageEnd(vec![TeamResult::new(5, 2, 3)]))
            .unwrap();
        assert_eq!(frame["Type"], "stage_end");
        assert_eq!(frame["Msg"][0]["FirstID"], 2);
        assert_eq!(frame["Msg"][0]["SecondID"], 5);
        assert_eq!(frame["Msg"][0]["Score"], 3);
    }
}
