//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: snapshot cache
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        scope            TEXT PRIMARY KEY,
        data             JSON NOT NULL,
        meta             JSON NOT NULL,
        cached_at        DATETIME NOT NULL
    );
    "#,
    // Version 2: fetch history for the status line
    r#"
    CREATE TABLE IF NOT EXISTS fetch_log (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        scope            TEXT NOT NULL,
        fetched_at       DATETIME NOT NULL,
        source           TEXT NOT NULL,
        row_count        INTEGER NOT NULL,
        error            TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_fetch_log_scope ON fetch_log(scope, fetched_at);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
