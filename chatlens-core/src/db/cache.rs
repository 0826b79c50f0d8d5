//! Snapshot cache
//!
//! Holds the last successfully fetched turn set per scope, so the dashboard can
//! keep working while the remote source is unreachable.

use crate::error::Result;
use crate::types::Turn;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Cached payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheData {
    pub turns: Vec<Turn>,
}

/// Provenance of a cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub cached_at: DateTime<Utc>,
    /// Where the turns came from (e.g. "rest", "demo")
    pub source: String,
    /// Raw rows behind the cached turns
    pub row_count: usize,
    /// Lower bound of the fetch window, if any
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub data: CacheData,
    pub meta: CacheMeta,
}

impl CacheSnapshot {
    pub fn new(turns: Vec<Turn>, source: &str, row_count: usize, since: Option<DateTime<Utc>>) -> Self {
        Self {
            data: CacheData { turns },
            meta: CacheMeta {
                cached_at: Utc::now(),
                source: source.to_string(),
                row_count,
                since,
            },
        }
    }
}

/// Read/write access to cached snapshots, keyed by scope.
///
/// An unreadable snapshot is reported as absent, never as an error.
pub trait SnapshotCache {
    /// Latest snapshot for `scope`, or `None` if missing or corrupt.
    fn read_snapshot(&self, scope: &str) -> Result<Option<CacheSnapshot>>;

    /// Replace the snapshot for `scope`.
    fn write_snapshot(&self, scope: &str, snapshot: &CacheSnapshot) -> Result<()>;
}

/// One fetch attempt, as shown in `chatlens status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRecord {
    pub scope: String,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
    pub row_count: usize,
    pub error: Option<String>,
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing, or with the cache disabled)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        super::schema::run_migrations(&conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Snapshot operations
    // ============================================

    /// Drop the snapshot for `scope`
    pub fn clear_snapshot(&self, scope: &str) -> Result<bool> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM snapshots WHERE scope = ?", [scope])?;
        Ok(removed > 0)
    }

    // ============================================
    // Fetch log operations
    // ============================================

    /// Append a fetch attempt to the log
    pub fn record_fetch(&self, record: &FetchRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO fetch_log (scope, fetched_at, source, row_count, error)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.scope,
                record.fetched_at.to_rfc3339(),
                record.source,
                record.row_count as i64,
                record.error,
            ],
        )?;
        Ok(())
    }

    /// Most recent fetch attempts for `scope`, newest first
    pub fn recent_fetches(&self, scope: &str, limit: usize) -> Result<Vec<FetchRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT scope, fetched_at, source, row_count, error
            FROM fetch_log
            WHERE scope = ?1
            ORDER BY fetched_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![scope, limit as i64], |row| {
            let fetched_at: String = row.get(1)?;
            let row_count: i64 = row.get(3)?;
            Ok(FetchRecord {
                scope: row.get(0)?,
                fetched_at: DateTime::parse_from_rfc3339(&fetched_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_default(),
                source: row.get(2)?,
                row_count: usize::try_from(row_count).unwrap_or(0),
                error: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }
}

impl SnapshotCache for Database {
    fn read_snapshot(&self, scope: &str) -> Result<Option<CacheSnapshot>> {
        let conn = self.lock();
        let stored: Option<(String, String)> = conn
            .query_row(
                "SELECT data, meta FROM snapshots WHERE scope = ?",
                [scope],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((data, meta)) = stored else {
            return Ok(None);
        };

        let parsed = serde_json::from_str::<CacheData>(&data).and_then(|data| {
            serde_json::from_str::<CacheMeta>(&meta).map(|meta| CacheSnapshot { data, meta })
        });
        match parsed {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(scope, error = %e, "Ignoring unreadable cache snapshot");
                Ok(None)
            }
        }
    }

    fn write_snapshot(&self, scope: &str, snapshot: &CacheSnapshot) -> Result<()> {
        let data = serde_json::to_string(&snapshot.data)?;
        let meta = serde_json::to_string(&snapshot.meta)?;

        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO snapshots (scope, data, meta, cached_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(scope) DO UPDATE SET
                data = excluded.data,
                meta = excluded.meta,
                cached_at = excluded.cached_at
            "#,
            params![scope, data, meta, snapshot.meta.cached_at.to_rfc3339()],
        )?;

        tracing::debug!(
            scope,
            turns = snapshot.data.turns.len(),
            "Wrote cache snapshot"
        );
        Ok(())
    }
}
