//! Shared application state: the stores, the caches, and the status
//! record every cycle and user action reads and writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::activity::ActivityLog;
use crate::cache::SnapshotCell;
use crate::config::Config;
use crate::error::AutomationError;
use crate::ledger::DedupLedger;
use crate::proposals::ProposalStore;
use crate::rules::RuleStore;
use crate::types::{AutomationStatus, CalendarEntry, EmailMessage};

/// Mutable status fields other than the run flag.
#[derive(Debug, Default)]
struct StatusInner {
    last_run_at: Option<DateTime<Utc>>,
    last_refresh_at: Option<DateTime<Utc>>,
    last_labeled_count: u32,
    last_error: Option<String>,
}

/// The cycle run flag plus the rest of the status record.
///
/// `running` is the Idle/Running two-state machine: `begin_cycle` is a
/// compare-and-set from Idle to Running, and the returned token flips
/// it back on drop, so every exit path (including fatal aborts) ends
/// Running.
pub struct StatusCell {
    running: AtomicBool,
    inner: Mutex<StatusInner>,
}

/// RAII token proving the holder is the one active cycle.
pub struct CycleToken<'a> {
    cell: &'a StatusCell,
}

impl Drop for CycleToken<'_> {
    fn drop(&mut self) {
        self.cell.running.store(false, Ordering::SeqCst);
    }
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            inner: Mutex::new(StatusInner::default()),
        }
    }

    /// Try to move Idle -> Running. `None` means a cycle is already
    /// active and the caller must back off.
    pub fn begin_cycle(&self) -> Option<CycleToken<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleToken { cell: self })
    }

    pub fn running_now(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_last_run_at(&self, at: DateTime<Utc>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_run_at = Some(at);
        }
    }

    pub fn set_last_refresh_at(&self, at: DateTime<Utc>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_refresh_at = Some(at);
        }
    }

    pub fn set_last_labeled_count(&self, count: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_labeled_count = count;
        }
    }

    pub fn set_last_error(&self, error: Option<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_error = error;
        }
    }

    fn snapshot_inner(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>, u32, Option<String>) {
        match self.inner.lock() {
            Ok(inner) => (
                inner.last_run_at,
                inner.last_refresh_at,
                inner.last_labeled_count,
                inner.last_error.clone(),
            ),
            Err(_) => (None, None, 0, None),
        }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Context object holding everything the scheduler, the pipeline
/// stages, and the service surface share.
pub struct AppState {
    pub config: Config,
    pub rules: RuleStore,
    pub ledger: DedupLedger,
    pub proposals: ProposalStore,
    pub activity: ActivityLog,
    pub mail_cache: SnapshotCell<EmailMessage>,
    pub calendar_cache: SnapshotCell<CalendarEntry>,
    pub status: StatusCell,
}

impl AppState {
    /// Open every store under `config.state_dir`.
    ///
    /// The JSON-backed stores recover from corruption on their own; the
    /// SQLite stores must open cleanly because the pipeline cannot
    /// guarantee idempotence without them.
    pub fn open(config: Config) -> Result<Self, AutomationError> {
        let state_dir = config.state_dir.clone();
        if !state_dir.exists() {
            std::fs::create_dir_all(&state_dir)?;
        }

        let rules = RuleStore::open(&state_dir);
        let ledger = DedupLedger::open(&state_dir)?;
        let proposals = ProposalStore::open(&state_dir)?;
        let activity = ActivityLog::open(
            &state_dir,
            config.log_retention_days,
            config.log_max_entries,
        );

        Ok(Self {
            config,
            rules,
            ledger,
            proposals,
            activity,
            mail_cache: SnapshotCell::new(),
            calendar_cache: SnapshotCell::new(),
            status: StatusCell::new(),
        })
    }

    /// Assemble the status surface from the status cell and the
    /// persisted flags.
    pub fn automation_status(&self) -> AutomationStatus {
        let (last_run_at, last_refresh_at, last_labeled_count, last_error) =
            self.status.snapshot_inner();
        AutomationStatus {
            automation_enabled: self.rules.automation_enabled(),
            auto_add_events: self.rules.auto_add_events(),
            running_now: self.status.running_now(),
            last_run_at,
            last_refresh_at,
            last_labeled_count,
            last_error,
        }
    }
}
