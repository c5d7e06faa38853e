//! `SQLite`-backed implementation of [`RunStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::{self, StoreError};
use crate::store::{RunRecord, RunStats, RunStatus, RunStore};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for the run table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS task_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    rows_read INTEGER NOT NULL DEFAULT 0,
    rows_written INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_task_runs_task ON task_runs (task, id);
";

/// `SQLite`-backed run history.
///
/// Create with [`SqliteRunStore::open`] for file-backed persistence or
/// [`SqliteRunStore::in_memory`] for tests.
pub struct SqliteRunStore {
    conn: Mutex<Connection>,
}

impl SqliteRunStore {
    /// Open or create a run database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory can't be created, or
    /// [`StoreError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Create an in-memory run store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlite`] if the schema can't be created.
    pub fn in_memory() -> error::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> error::Result<Self> {
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn now_sqlite() -> String {
        Utc::now().format(SQLITE_DATETIME_FMT).to_string()
    }

    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
impl RunStore for SqliteRunStore {
    fn start_run(&self, task: &str) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO task_runs (task, status, started_at) VALUES (?1, ?2, ?3)",
            params![task, RunStatus::Running.as_str(), Self::now_sqlite()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE task_runs SET status = ?1, finished_at = ?2, rows_read = ?3, \
             rows_written = ?4, error_message = ?5 WHERE id = ?6",
            params![
                status.as_str(),
                Self::now_sqlite(),
                stats.rows_read as i64,
                stats.rows_written as i64,
                stats.error_message,
                run_id
            ],
        )?;
        Ok(())
    }

    fn last_runs(&self, task: &str, limit: usize) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, task, status, started_at, finished_at, rows_read, rows_written, error_message \
             FROM task_runs WHERE task = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![task, i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, task, status, started_at, finished_at, rows_read, rows_written, error_message) = row?;
            records.push(RunRecord {
                id,
                task,
                status: status.parse()?,
                started_at: Self::sqlite_to_iso8601(&started_at),
                finished_at: finished_at.as_deref().map(Self::sqlite_to_iso8601),
                stats: RunStats {
                    rows_read: rows_read as u64,
                    rows_written: rows_written as u64,
                    error_message,
                },
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lifecycle() {
        let store = SqliteRunStore::in_memory().unwrap();
        let id = store.start_run("users_load").unwrap();
        let runs = store.last_runs("users_load", 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Running);
        assert!(runs[0].finished_at.is_none());
        assert!(runs[0].started_at.ends_with('Z'));

        store
            .complete_run(
                id,
                RunStatus::Completed,
                &RunStats {
                    rows_read: 10,
                    rows_written: 9,
                    error_message: None,
                },
            )
            .unwrap();
        let run = &store.last_runs("users_load", 5).unwrap()[0];
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.stats.rows_written, 9);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn last_runs_is_newest_first_and_limited() {
        let store = SqliteRunStore::in_memory().unwrap();
        let ids: Vec<i64> = (0..3).map(|_| store.start_run("t").unwrap()).collect();
        store.start_run("other").unwrap();
        let runs = store.last_runs("t", 2).unwrap();
        assert_eq!(runs.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    }

    #[test]
    fn failed_run_keeps_message() {
        let store = SqliteRunStore::in_memory().unwrap();
        let id = store.start_run("t").unwrap();
        let stats = RunStats {
            error_message: Some("table count (1) != stream count (2)".into()),
            ..RunStats::default()
        };
        store.complete_run(id, RunStatus::Failed, &stats).unwrap();
        let run = &store.last_runs("t", 1).unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.stats.error_message, stats.error_message);
    }

    #[test]
    fn file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("runs.db");
        let id = SqliteRunStore::open(&path).unwrap().start_run("t").unwrap();
        let reopened = SqliteRunStore::open(&path).unwrap();
        assert_eq!(reopened.last_runs("t", 1).unwrap()[0].id, id);
    }
}
