pub mod activity;
pub mod audit;
pub mod breaker;
pub mod tokens;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

pub use activity::{ActivityEvent, ActivityFilter, ActivityStore, ActivitySummary, ActivityType};
pub use audit::{AuditEntry, AuditFilter, AuditOutcome, AuditStore, ExecutedBy, ExportFormat};
pub use breaker::{BreakerStore, PersistedBreaker};
pub use tokens::{FileBucket, SavingsMetric, SavingsReport, TokenMetricsStore};

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io(PathBuf, std::io::Error),
    Closed,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(err) => write!(f, "database error: {err}"),
            StoreError::Io(path, err) => {
                write!(f, "store I/O error at {}: {}", path.display(), err)
            }
            StoreError::Closed => write!(f, "store is closed"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::Sqlite(value)
    }
}

/// Shared connection with an async façade. Queries run on the blocking
/// pool; writers serialize on the mutex while WAL keeps readers moving.
#[derive(Clone)]
pub struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHandle {
    /// Open (or create) the database at `path` in WAL mode and bring its
    /// schema up to date. Initialization is idempotent.
    pub async fn open(path: &Path, migrations: &'static [&'static str]) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::Io(parent.to_path_buf(), err))?;
        }

        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            // journal_mode returns the resulting mode as a row.
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
            conn.execute_batch("PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
            apply_migrations(&conn, migrations)?;
            Ok(conn)
        })
        .await
        .map_err(|_| StoreError::Closed)??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard).map_err(StoreError::Sqlite)
        })
        .await
        .map_err(|_| StoreError::Closed)?
    }

    pub async fn call_mut<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard).map_err(StoreError::Sqlite)
        })
        .await
        .map_err(|_| StoreError::Closed)?
    }
}

/// Versioned, idempotent migration runner. `migrations[i]` brings the
/// schema from version `i` to `i + 1`.
fn apply_migrations(
    conn: &Connection,
    migrations: &[&str],
) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
    )?;
    let current: i64 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    for (index, migration) in migrations.iter().enumerate() {
        let target = index as i64 + 1;
        if target <= current {
            continue;
        }
        conn.execute_batch(migration)?;
        if conn
            .execute("UPDATE schema_version SET version = ?1", [target])?
            == 0
        {
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [target])?;
        }
    }
    Ok(())
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
