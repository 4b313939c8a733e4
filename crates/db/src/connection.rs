use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use furlo_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Write contention between the sweeper and concurrent decisions resolves
/// through SQLite retries; this is how long a writer waits before the
/// conditional update surfaces as a busy error.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a pool using the approval store's SQLite policy: foreign keys are
/// enforced (approvals hang off leave_requests), WAL keeps report reads from
/// blocking decision writes, and the database file must already exist so a
/// typoed URL fails instead of silently creating an empty store.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .connect_with(options)
        .await
}
