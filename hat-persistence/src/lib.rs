pub mod connection;
pub mod entities;
pub mod repositories;

use sea_orm::DbErr;
use thiserror::Error;

/// Database faults, tagged by the operation that failed. HTTP handlers map
/// `Conflict` to 409 and everything else to 500; none of these ever reach a
/// WebSocket client.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database insert error: {0}")]
    Insert(#[source] DbErr),
    #[error("database conflict error: {0}")]
    Conflict(String),
    #[error("database open error: {0}")]
    Open(#[source] DbErr),
    #[error("database config error: {0}")]
    Config(String),
    #[error("database migrate error: {0}")]
    Migrate(#[source] DbErr),
    #[error("database update error: {0}")]
    Update(#[source] DbErr),
    #[error("database query error: {0}")]
    Query(#[source] DbErr),
}

impl PersistenceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
