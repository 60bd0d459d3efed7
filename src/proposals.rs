//! Proposal store: the durable state machine for extracted scheduling
//! intents.
//!
//! Rows move `pending` -> `accepted` or `pending` -> `rejected`, never
//! backwards. Transitions compare-and-set on the current status at the
//! SQL level, and a mutation lock serializes the
//! check -> materialize -> commit sequence so two concurrent accepts
//! cannot both create a calendar event.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::capabilities::CalendarProvider;
use crate::error::AutomationError;
use crate::types::{Proposal, ProposalStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS proposals (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    start_time      TEXT NOT NULL,
    end_time        TEXT,
    location        TEXT,
    notes           TEXT,
    attendees       TEXT NOT NULL DEFAULT '[]',
    source_email_id TEXT NOT NULL,
    source_summary  TEXT NOT NULL,
    status          TEXT NOT NULL CHECK (status IN ('pending', 'accepted', 'rejected')),
    created_at      TEXT NOT NULL,
    resolved_at     TEXT,
    event_id        TEXT
);
CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status);
";

pub struct ProposalStore {
    conn: Mutex<Connection>,
    /// Serializes status transitions across the materializer await.
    mutate: tokio::sync::Mutex<()>,
}

impl ProposalStore {
    /// Open (or create) the store at `{state_dir}/proposals.db`.
    pub fn open(state_dir: &std::path::Path) -> Result<Self, AutomationError> {
        Self::open_at(state_dir.join("proposals.db"))
    }

    /// Open a store at an explicit path. Useful for testing.
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
            mutate: tokio::sync::Mutex::new(()),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AutomationError> {
        self.conn
            .lock()
            .map_err(|_| AutomationError::Storage("proposal store lock poisoned".into()))
    }

    /// Persist a proposal row as-is (pending from extraction, or
    /// already accepted on the auto-add path).
    pub fn insert(&self, proposal: &Proposal) -> Result<(), AutomationError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO proposals (id, title, start_time, end_time, location, notes, attendees,
                                    source_email_id, source_summary, status,
                                    created_at, resolved_at, event_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                proposal.id,
                proposal.title,
                proposal.start,
                proposal.end,
                proposal.location,
                proposal.notes,
                serde_json::to_string(&proposal.attendees)?,
                proposal.source_email_id,
                proposal.source_summary,
                proposal.status.as_str(),
                proposal.created_at.to_rfc3339(),
                proposal.resolved_at.map(|t| t.to_rfc3339()),
                proposal.event_id,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Proposal>, AutomationError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, start_time, end_time, location, notes, attendees,
                    source_email_id, source_summary, status, created_at, resolved_at, event_id
             FROM proposals WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_proposal)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// List proposals, newest first, optionally filtered by status.
    pub fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, AutomationError> {
        let conn = self.lock_conn()?;
        let (sql, filter) = match status {
            Some(s) => (
                "SELECT id, title, start_time, end_time, location, notes, attendees,
                        source_email_id, source_summary, status, created_at, resolved_at, event_id
                 FROM proposals WHERE status = ?1 ORDER BY created_at DESC",
                Some(s.as_str()),
            ),
            None => (
                "SELECT id, title, start_time, end_time, location, notes, attendees,
                        source_email_id, source_summary, status, created_at, resolved_at, event_id
                 FROM proposals ORDER BY created_at DESC",
                None,
            ),
        };

        let mut stmt = conn.prepare(sql)?;
        let mut proposals = Vec::new();
        match filter {
            Some(s) => {
                for row in stmt.query_map(params![s], row_to_proposal)? {
                    proposals.push(row?);
                }
            }
            None => {
                for row in stmt.query_map([], row_to_proposal)? {
                    proposals.push(row?);
                }
            }
        }
        Ok(proposals)
    }

    /// Accept a pending proposal: materialize the calendar event, then
    /// commit the transition.
    ///
    /// Idempotent on re-accept: an already-accepted proposal returns
    /// its existing `event_id` without another materialize call. A
    /// rejected proposal is terminal and fails with an invalid-state
    /// error. If the materializer fails, the proposal stays `pending`
    /// untouched.
    pub async fn accept(
        &self,
        id: &str,
        calendar: &dyn CalendarProvider,
    ) -> Result<Proposal, AutomationError> {
        let _guard = self.mutate.lock().await;

        let current = self
            .get(id)?
            .ok_or_else(|| AutomationError::NotFound(format!("proposal {}", id)))?;

        match current.status {
            ProposalStatus::Accepted => Ok(current),
            ProposalStatus::Rejected => Err(AutomationError::InvalidState(format!(
                "proposal {} is already rejected",
                id
            ))),
            ProposalStatus::Pending => {
                let event_id = calendar.create_event(&current).await?;
                let resolved_at = Utc::now();

                let changed = {
                    let conn = self.lock_conn()?;
                    conn.execute(
                        "UPDATE proposals
                         SET status = 'accepted', event_id = ?1, resolved_at = ?2
                         WHERE id = ?3 AND status = 'pending'",
                        params![event_id, resolved_at.to_rfc3339(), id],
                    )?
                };
                if changed == 0 {
                    // The row moved out of pending underneath us.
                    return Err(AutomationError::InvalidState(format!(
                        "proposal {} changed state during accept",
                        id
                    )));
                }

                Ok(Proposal {
                    status: ProposalStatus::Accepted,
                    event_id: Some(event_id),
                    resolved_at: Some(resolved_at),
                    ..current
                })
            }
        }
    }

    /// Reject a pending proposal. No external call is made.
    pub async fn reject(&self, id: &str) -> Result<Proposal, AutomationError> {
        let _guard = self.mutate.lock().await;

        let current = self
            .get(id)?
            .ok_or_else(|| AutomationError::NotFound(format!("proposal {}", id)))?;

        match current.status {
            ProposalStatus::Accepted => Err(AutomationError::InvalidState(format!(
                "proposal {} is already accepted",
                id
            ))),
            ProposalStatus::Rejected => Err(AutomationError::InvalidState(format!(
                "proposal {} is already rejected",
                id
            ))),
            ProposalStatus::Pending => {
                let resolved_at = Utc::now();
                let changed = {
                    let conn = self.lock_conn()?;
                    conn.execute(
                        "UPDATE proposals
                         SET status = 'rejected', resolved_at = ?1
                         WHERE id = ?2 AND status = 'pending'",
                        params![resolved_at.to_rfc3339(), id],
                    )?
                };
                if changed == 0 {
                    return Err(AutomationError::InvalidState(format!(
                        "proposal {} changed state during reject",
                        id
                    )));
                }

                Ok(Proposal {
                    status: ProposalStatus::Rejected,
                    resolved_at: Some(resolved_at),
                    ..current
                })
            }
        }
    }
}

fn row_to_proposal(row: &Row<'_>) -> rusqlite::Result<Proposal> {
    let attendees_json: String = row.get(6)?;
    let status_str: String = row.get(9)?;
    let created_at_str: String = row.get(10)?;
    let resolved_at_str: Option<String> = row.get(11)?;

    Ok(Proposal {
        id: row.get(0)?,
        title: row.get(1)?,
        start: row.get(2)?,
        end: row.get(3)?,
        location: row.get(4)?,
        notes: row.get(5)?,
        attendees: serde_json::from_str(&attendees_json).unwrap_or_default(),
        source_email_id: row.get(7)?,
        source_summary: row.get(8)?,
        status: ProposalStatus::parse(&status_str).unwrap_or(ProposalStatus::Pending),
        created_at: parse_rfc3339(&created_at_str),
        resolved_at: resolved_at_str.as_deref().map(parse_rfc3339),
        event_id: row.get(12)?,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
