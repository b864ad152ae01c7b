use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::UserId;

/// User snapshot as cached inside a game and shown in the lobby.
/// Credentials never leave the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct User {
    #[serde(rename = "ID")]
    pub id: UserId,
    #[serde(rename = "Email")]
    pub email: String,
    #[serde(rename = "Username")]
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Statistics {
    #[serde(rename = "GamesPlayed")]
    pub games_played: i64,
    #[serde(rename = "NumberOfWins")]
    pub number_of_wins: i64,
    #[serde(rename = "NumberOfTies")]
    pub number_of_ties: i64,
    #[serde(rename = "TopWords")]
    pub top_words: Vec<WordCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WordCount {
    #[serde(rename = "Word")]
    pub word: String,
    #[serde(rename = "Count")]
    pub count: i64,
}
