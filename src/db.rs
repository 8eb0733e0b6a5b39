use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::time::Duration;

use crate::config::{Config, DbConfig};

/// Open the SQLite database described by `[db]`, creating the file and its
/// parent directory on first use. WAL mode keeps readers unblocked during
/// import transactions; foreign keys enforce the exchange and tag-edge
/// cascades.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db = &config.db;

    if let Some(dir) = db.path.parent() {
        std::fs::create_dir_all(dir).with_context(|| {
            format!("failed to create database directory {}", dir.display())
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(&db.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    pool_options(db)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {}", db.path.display()))
}

fn pool_options(db: &DbConfig) -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(db.max_connections)
        .min_connections(db.min_connections)
        .max_lifetime(Duration::from_secs(db.conn_max_lifetime_secs))
}

/// In-memory pool, used by tests and ephemeral tooling. Capped at one
/// connection so every query sees the same `:memory:` database.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}
