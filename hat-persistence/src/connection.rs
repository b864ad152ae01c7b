use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};

use crate::PersistenceError;

/// Open the configured database and bring the schema up to date.
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, PersistenceError> {
    let db = Database::connect(database_url)
        .await
        .map_err(PersistenceError::Open)?;
    Migrator::up(&db, None)
        .await
        .map_err(PersistenceError::Migrate)?;
    Ok(db)
}

/// Fresh in-memory sqlite with the full schema, for tests.
pub async fn connect_to_memory_database() -> Result<DatabaseConnection, PersistenceError> {
    connect_and_migrate("sqlite::memory:").await
}
