//! Schema setup for the SQLite key/value table.
//!
//! `_migrations` records each applied schema step; snapshot format
//! migrations live in the snapshot store, not here.

use crate::Error;
use tokio_rusqlite::{Connection, params};

/// Schema steps in application order. Each one creates what it needs with
/// `IF NOT EXISTS`.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_kv_store.sql"))];

/// Bring the key/value schema up to date. Returns the number of steps applied.
///
/// # Errors
///
/// Returns an error if a schema step fails to execute.
pub async fn run(conn: &Connection) -> Result<usize, Error> {
    conn.call(|conn| -> Result<usize, Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current: i64 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

        let mut applied = 0;
        for (version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
            conn.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("schema step {version}: {e}")))?;
            conn.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, chrono::Utc::now().to_rfc3339()],
            )?;
            tracing::debug!(version, "kv store schema step applied");
            applied += 1;
        }

        if applied > 0 {
            tracing::info!(applied, from = current, "kv store schema upgraded");
        }
        Ok(applied)
    })
    .await
    .map_err(Error::from)
}
