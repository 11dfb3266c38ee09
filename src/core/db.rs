//! SQLite connection setup shared by the message log and the session store

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::conversation::UnknownStage;

/// Errors from the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt conversation state for user {user_id}: {source}")]
    CorruptState {
        user_id: i64,
        #[source]
        source: UnknownStage,
    },

    #[error("Corrupt chat message {id}: {reason}")]
    CorruptMessage { id: i64, reason: String },
}

/// Open (creating if needed) the database file at `db_path`
pub async fn open(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Create parent directories if they don't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Private in-memory database for tests.
///
/// Every SQLite `:memory:` connection is its own database, so the pool is
/// capped at one connection.
#[cfg(test)]
pub async fn open_in_memory() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
}
