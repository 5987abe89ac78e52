//! `SQLite`-backed implementation of [`StateBackend`].
//!
//! Uses a single `Mutex<Connection>` for thread safety.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use sales_etl_types::state::{
    PipelineId, RunRecord, RunStats, RunStatus, TaskAttempt, TaskStatus,
};
use sales_etl_types::{RunKey, TaskId};

use crate::backend::StateBackend;
use crate::error::{self, StateError};

/// `SQLite` datetime format (UTC, no timezone suffix).
const SQLITE_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Idempotent DDL for ledger tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS etl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline TEXT NOT NULL,
    run_key TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    finished_at TEXT,
    rows_online INTEGER DEFAULT 0,
    rows_instore INTEGER DEFAULT 0,
    rows_dropped INTEGER DEFAULT 0,
    rows_loaded INTEGER DEFAULT 0,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_etl_runs_pipeline ON etl_runs (pipeline, id);

CREATE TABLE IF NOT EXISTS etl_task_attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES etl_runs(id),
    task TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_etl_task_attempts_run ON etl_task_attempts (run_id);

CREATE TABLE IF NOT EXISTS etl_leases (
    target TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at INTEGER NOT NULL
);
";

/// `SQLite`-backed run ledger.
///
/// Create with [`SqliteStateBackend::open`] for file-backed persistence
/// or [`SqliteStateBackend::in_memory`] for tests.
pub struct SqliteStateBackend {
    conn: Mutex<Connection>,
}

impl SqliteStateBackend {
    /// Open or create a `SQLite` ledger database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(StateError::backend)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` backend (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't
    /// be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StateError::backend)?;
        conn.execute_batch(CREATE_TABLES)
            .map_err(StateError::backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection lock.
    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Convert a `SQLite` datetime string to ISO-8601.
    fn sqlite_to_iso8601(raw: &str) -> String {
        NaiveDateTime::parse_from_str(raw, SQLITE_DATETIME_FMT).map_or_else(
            |_| raw.to_string(),
            |ndt| format!("{}Z", ndt.format("%Y-%m-%dT%H:%M:%S")),
        )
    }

    #[allow(clippy::cast_sign_loss)]
    fn decode_run(row: RawRunRow) -> error::Result<RunRecord> {
        let status = RunStatus::parse(&row.status)
            .ok_or_else(|| StateError::Corrupt(format!("run status '{}'", row.status)))?;
        let run_key = RunKey::new(row.run_key)
            .map_err(|e| StateError::Corrupt(e.to_string()))?;
        Ok(RunRecord {
            id: row.id,
            pipeline: PipelineId::new(row.pipeline),
            run_key,
            status,
            started_at: Self::sqlite_to_iso8601(&row.started_at),
            finished_at: row.finished_at.as_deref().map(Self::sqlite_to_iso8601),
            stats: RunStats {
                rows_online: row.counts[0].max(0) as u64,
                rows_instore: row.counts[1].max(0) as u64,
                rows_dropped: row.counts[2].max(0) as u64,
                rows_loaded: row.counts[3].max(0) as u64,
                error_message: row.error_message,
            },
        })
    }

    #[cfg(test)]
    fn lease_holder(&self, target: &str) -> error::Result<Option<String>> {
        let conn = self.lock_conn()?;
        match conn.query_row(
            "SELECT holder FROM etl_leases WHERE target = ?1",
            [target],
            |row| row.get(0),
        ) {
            Ok(holder) => Ok(Some(holder)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StateError::backend(e)),
        }
    }
}

struct RawRunRow {
    id: i64,
    pipeline: String,
    run_key: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    counts: [i64; 4],
    error_message: Option<String>,
}

impl StateBackend for SqliteStateBackend {
    fn start_run(&self, pipeline: &PipelineId, run_key: &RunKey) -> error::Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO etl_runs (pipeline, run_key, status) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                pipeline.as_str(),
                run_key.as_str(),
                RunStatus::Running.as_str()
            ],
        )
        .map_err(StateError::backend)?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::cast_possible_wrap)]
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE etl_runs SET status = ?1, finished_at = datetime('now'), \
             rows_online = ?2, rows_instore = ?3, rows_dropped = ?4, rows_loaded = ?5, \
             error_message = ?6 WHERE id = ?7",
            rusqlite::params![
                status.as_str(),
                stats.rows_online as i64,
                stats.rows_instore as i64,
                stats.rows_dropped as i64,
                stats.rows_loaded as i64,
                stats.error_message,
                run_id,
            ],
        )
        .map_err(StateError::backend)?;
        Ok(())
    }

    fn record_task_attempt(&self, run_id: i64, attempt: &TaskAttempt) -> error::Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO etl_task_attempts (run_id, task, attempt, status, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                run_id,
                attempt.task.as_str(),
                attempt.attempt,
                attempt.status.as_str(),
                attempt.error_message,
            ],
        )
        .map_err(StateError::backend)?;
        Ok(())
    }

    fn list_runs(&self, pipeline: &PipelineId, limit: u32) -> error::Result<Vec<RunRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, pipeline, run_key, status, started_at, finished_at, \
                 rows_online, rows_instore, rows_dropped, rows_loaded, error_message \
                 FROM etl_runs WHERE pipeline = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| StateError::backend_context("list_runs: prepare", e))?;

        let rows = stmt
            .query_map(rusqlite::params![pipeline.as_str(), limit], |row| {
                Ok(RawRunRow {
                    id: row.get(0)?,
                    pipeline: row.get(1)?,
                    run_key: row.get(2)?,
                    status: row.get(3)?,
                    started_at: row.get(4)?,
                    finished_at: row.get(5)?,
                    counts: [row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?],
                    error_message: row.get(10)?,
                })
            })
            .map_err(|e| StateError::backend_context("list_runs: query", e))?;

        let mut runs = Vec::new();
        for row in rows {
            let row = row.map_err(|e| StateError::backend_context("list_runs: row", e))?;
            runs.push(Self::decode_run(row)?);
        }
        Ok(runs)
    }

    fn task_attempts(&self, run_id: i64) -> error::Result<Vec<TaskAttempt>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT task, attempt, status, error_message FROM etl_task_attempts \
                 WHERE run_id = ?1 ORDER BY id",
            )
            .map_err(|e| StateError::backend_context("task_attempts: prepare", e))?;

        let rows = stmt
            .query_map([run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(|e| StateError::backend_context("task_attempts: query", e))?;

        let mut attempts = Vec::new();
        for row in rows {
            let (task, attempt, status, error_message) =
                row.map_err(|e| StateError::backend_context("task_attempts: row", e))?;
            let task = TaskId::parse(&task)
                .ok_or_else(|| StateError::Corrupt(format!("task '{task}'")))?;
            let status = TaskStatus::parse(&status)
                .ok_or_else(|| StateError::Corrupt(format!("task status '{status}'")))?;
            attempts.push(TaskAttempt {
                task,
                attempt,
                status,
                error_message,
            });
        }
        Ok(attempts)
    }

    fn try_acquire_lease(&self, target: &str, holder: &str, ttl: Duration) -> error::Result<bool> {
        let now = Utc::now().timestamp();
        let stale_before = now.saturating_sub(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("acquire_lease: begin tx", e))?;
        tx.execute(
            "DELETE FROM etl_leases WHERE target = ?1 AND acquired_at <= ?2",
            rusqlite::params![target, stale_before],
        )
        .map_err(|e| StateError::backend_context("acquire_lease: expire", e))?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO etl_leases (target, holder, acquired_at) \
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![target, holder, now],
            )
            .map_err(|e| StateError::backend_context("acquire_lease: insert", e))?;
        tx.commit()
            .map_err(|e| StateError::backend_context("acquire_lease: commit", e))?;

        Ok(inserted > 0)
    }

    fn release_lease(&self, target: &str, holder: &str) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn
            .execute(
                "DELETE FROM etl_leases WHERE target = ?1 AND holder = ?2",
                rusqlite::params![target, holder],
            )
            .map_err(StateError::backend)?;
        Ok(removed > 0)
    }
}
