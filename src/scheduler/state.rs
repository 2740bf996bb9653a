use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::Mutex;

/// Terminal and in-flight run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Started,
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One persisted materialization record.
#[derive(Debug, Clone, Serialize)]
pub struct RunRow {
    pub run_id: String,
    pub asset: String,
    pub partition_key: String,
    pub status: String,
    pub degraded: bool,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub metrics: Option<String>,
    pub error: Option<String>,
    pub error_class: Option<String>,
}

/// Embedded run-state repository keyed on `(asset, partition_key)`.
/// Last-success timestamps drive freshness; the partial unique index on
/// active runs blocks concurrent duplicate (asset, partition) attempts.
pub struct RunStateDb {
    conn: Mutex<Connection>,
}

const SELECT_RUN: &str = "SELECT run_id, asset, partition_key, status, degraded, \
     started_at, ended_at, metrics, error, error_class FROM runs";

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        asset: row.get(1)?,
        partition_key: row.get(2)?,
        status: row.get(3)?,
        degraded: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        metrics: row.get(7)?,
        error: row.get(8)?,
        error_class: row.get(9)?,
    })
}

impl RunStateDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self { conn: Mutex::new(conn) };
        db.run_migrations()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                run_id        TEXT PRIMARY KEY,
                asset         TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                status        TEXT NOT NULL CHECK(status IN ('started','success','partial_success','failed','cancelled')),
                degraded      INTEGER NOT NULL DEFAULT 0,
                started_at    TEXT NOT NULL,
                ended_at      TEXT,
                metrics       TEXT,
                error         TEXT,
                error_class   TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_runs_asset ON runs(asset, partition_key, started_at DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_active ON runs(asset, partition_key) WHERE status = 'started';

            CREATE TABLE IF NOT EXISTS cursors (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Claim `(asset, partition_key)` for a new run. Returns false when
    /// another run of the same pair is already active.
    pub fn try_claim(
        &self,
        asset: &str,
        partition_key: &str,
        run_id: &str,
        now: &str,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT INTO runs (run_id, asset, partition_key, status, started_at) \
             VALUES (?1, ?2, ?3, 'started', ?4)",
            params![run_id, asset, partition_key, now],
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Is any partition of this asset currently running? Used by assets
    /// tagged for strict serial execution.
    pub fn has_active(&self, asset: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE asset = ?1 AND status = 'started'",
            params![asset],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        degraded: bool,
        ended_at: &str,
        metrics: Option<&str>,
        error: Option<&str>,
        error_class: Option<&str>,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET status = ?2, degraded = ?3, ended_at = ?4, \
             metrics = ?5, error = ?6, error_class = ?7 WHERE run_id = ?1",
            params![run_id, status.as_str(), degraded, ended_at, metrics, error, error_class],
        )?;
        Ok(())
    }

    /// Was `(asset, partition_key)` ever materialized successfully?
    /// Partial success counts: the committed endpoints are usable.
    pub fn has_success(&self, asset: &str, partition_key: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE asset = ?1 AND partition_key = ?2 \
             AND status IN ('success','partial_success')",
            params![asset, partition_key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Timestamp of the asset's most recent successful materialization.
    pub fn last_success(&self, asset: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ended_at FROM runs WHERE asset = ?1 \
             AND status IN ('success','partial_success') AND ended_at IS NOT NULL \
             ORDER BY ended_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![asset], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_runs(&self, asset: &str, limit: i64) -> anyhow::Result<Vec<RunRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RUN} WHERE asset = ?1 ORDER BY started_at DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![asset, limit], row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The most recent run per asset.
    pub fn latest_runs(&self) -> anyhow::Result<Vec<RunRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RUN} WHERE run_id IN ( \
                 SELECT run_id FROM runs r1 WHERE started_at = ( \
                     SELECT MAX(started_at) FROM runs r2 WHERE r2.asset = r1.asset \
                 ) \
             ) ORDER BY asset"
        ))?;
        let rows = stmt
            .query_map([], row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Failed runs started after `cursor` (exclusive), oldest first.
    pub fn failures_after(&self, cursor: &str, limit: i64) -> anyhow::Result<Vec<RunRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RUN} WHERE status = 'failed' AND started_at > ?1 \
             ORDER BY started_at ASC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![cursor, limit], row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_cursor(&self, key: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM cursors WHERE key = ?1")?;
        let mut rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?)
    }

    pub fn set_cursor(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cursors (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_blocks_concurrent_duplicates() {
        let db = RunStateDb::open_in_memory().unwrap();
        assert!(db
            .try_claim("bronze_piezo", "2024-10-02", "run-1", "2024-10-03T02:30:00Z")
            .unwrap());
        // Same (asset, partition) while run-1 is active: blocked.
        assert!(!db
            .try_claim("bronze_piezo", "2024-10-02", "run-2", "2024-10-03T02:31:00Z")
            .unwrap());
        // A different partition of the same asset is fine.
        assert!(db
            .try_claim("bronze_piezo", "2024-10-01", "run-3", "2024-10-03T02:31:00Z")
            .unwrap());

        // After the first run finishes, the partition can be claimed again.
        db.finish_run(
            "run-1",
            RunStatus::Success,
            false,
            "2024-10-03T02:35:00Z",
            None,
            None,
            None,
        )
        .unwrap();
        assert!(db
            .try_claim("bronze_piezo", "2024-10-02", "run-4", "2024-10-03T03:00:00Z")
            .unwrap());
    }

    #[test]
    fn success_lookup_and_freshness_timestamp() {
        let db = RunStateDb::open_in_memory().unwrap();
        db.try_claim("silver_measures", "2024-10-02", "run-1", "2024-10-03T02:30:00Z")
            .unwrap();
        assert!(!db.has_success("silver_measures", "2024-10-02").unwrap());

        db.finish_run(
            "run-1",
            RunStatus::PartialSuccess,
            false,
            "2024-10-03T02:40:00Z",
            Some("{\"records_count\":42}"),
            None,
            None,
        )
        .unwrap();
        assert!(db.has_success("silver_measures", "2024-10-02").unwrap());
        assert_eq!(
            db.last_success("silver_measures").unwrap().as_deref(),
            Some("2024-10-03T02:40:00Z")
        );
    }

    #[test]
    fn serial_assets_see_active_runs() {
        let db = RunStateDb::open_in_memory().unwrap();
        db.try_claim("gold_near", "2024-W40", "run-1", "2024-10-03T03:00:00Z")
            .unwrap();
        assert!(db.has_active("gold_near").unwrap());
        db.finish_run("run-1", RunStatus::Cancelled, false, "2024-10-03T03:30:00Z", None, None, Some("cancelled"))
            .unwrap();
        assert!(!db.has_active("gold_near").unwrap());
    }

    #[test]
    fn failure_cursor_walk() {
        let db = RunStateDb::open_in_memory().unwrap();
        db.try_claim("bronze_hydro", "2024-10-01", "run-1", "2024-10-02T02:30:00Z")
            .unwrap();
        db.finish_run(
            "run-1",
            RunStatus::Failed,
            false,
            "2024-10-02T02:31:00Z",
            None,
            Some("retry budget exhausted"),
            Some("transient"),
        )
        .unwrap();

        let failures = db.failures_after("", 10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].asset, "bronze_hydro");

        let after = db.failures_after("2024-10-02T02:30:00Z", 10).unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn latest_runs_returns_one_row_per_asset() {
        let db = RunStateDb::open_in_memory().unwrap();
        for (run, started) in [("r1", "2024-10-01T02:30:00Z"), ("r2", "2024-10-02T02:30:00Z")] {
            db.try_claim("bronze_piezo", &format!("p-{run}"), run, started).unwrap();
            db.finish_run(run, RunStatus::Success, false, started, None, None, None)
                .unwrap();
        }
        let latest = db.latest_runs().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].run_id, "r2");
    }

    #[test]
    fn cursors_round_trip() {
        let db = RunStateDb::open_in_memory().unwrap();
        assert!(db.get_cursor("failure_recovery").unwrap().is_none());
        db.set_cursor("failure_recovery", "2024-10-02T02:30:00Z").unwrap();
        db.set_cursor("failure_recovery", "2024-10-03T02:30:00Z").unwrap();
        assert_eq!(
            db.get_cursor("failure_recovery").unwrap().as_deref(),
            Some("2024-10-03T02:30:00Z")
        );
    }
}
