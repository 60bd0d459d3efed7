//! Dedup ledger: the persisted idempotence record.
//!
//! One row per (email_id, concern) pair. Rows are written only after
//! the corresponding side effect has durably succeeded, so a crash
//! mid-cycle can only cause reprocessing, never a silent skip.
//! Lives in its own SQLite file so corruption here cannot take the
//! other stores down with it.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::AutomationError;
use crate::types::Concern;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed_emails (
    email_id     TEXT NOT NULL,
    concern      TEXT NOT NULL,
    processed_at TEXT NOT NULL,
    PRIMARY KEY (email_id, concern)
);
";

/// SQLite-backed ledger of processed (email, concern) pairs.
///
/// The connection is held behind a `std::sync::Mutex`: every operation
/// is a single short statement, so callers never hold the lock across
/// an await point.
pub struct DedupLedger {
    conn: Mutex<Connection>,
}

impl DedupLedger {
    /// Open (or create) the ledger at `{state_dir}/processed.db`.
    pub fn open(state_dir: &std::path::Path) -> Result<Self, AutomationError> {
        Self::open_at(state_dir.join("processed.db"))
    }

    /// Open a ledger at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, AutomationError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Has this email already been processed for the given concern?
    pub fn has_processed(&self, email_id: &str, concern: Concern) -> Result<bool, AutomationError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AutomationError::Storage("ledger lock poisoned".into()))?;
        let mut stmt = conn.prepare(
            "SELECT EXISTS(SELECT 1 FROM processed_emails WHERE email_id = ?1 AND concern = ?2)",
        )?;
        let exists: i64 = stmt.query_row(params![email_id, concern.as_str()], |row| row.get(0))?;
        Ok(exists != 0)
    }

    /// Record that the side effect for (email, concern) has completed.
    ///
    /// `INSERT OR IGNORE` keeps the first row's timestamp: a pair is
    /// marked at most once no matter how often this is called.
    pub fn mark_processed(&self, email_id: &str, concern: Concern) -> Result<(), AutomationError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AutomationError::Storage("ledger lock poisoned".into()))?;
        conn.execute(
            "INSERT OR IGNORE INTO processed_emails (email_id, concern, processed_at)
             VALUES (?1, ?2, ?3)",
            params![email_id, concern.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete entries older than `max_age_days`. Emails that old have
    /// fallen out of every fetch window, so the markers are dead weight.
    /// Returns the number of rows pruned.
    pub fn prune(&self, max_age_days: u32) -> Result<usize, AutomationError> {
        let cutoff = (Utc::now() - chrono::Duration::days(max_age_days as i64)).to_rfc3339();
        let conn = self
            .conn
            .lock()
            .map_err(|_| AutomationError::Storage("ledger lock poisoned".into()))?;
        let pruned = conn.execute(
            "DELETE FROM processed_emails WHERE processed_at < ?1",
            params![cutoff],
        )?;
        Ok(pruned)
    }

    #[cfg(test)]
    fn processed_at(&self, email_id: &str, concern: Concern) -> Option<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT processed_at FROM processed_emails WHERE email_id = ?1 AND concern = ?2",
            params![email_id, concern.as_str()],
            |row| row.get(0),
        )
        .ok()
    }
}
