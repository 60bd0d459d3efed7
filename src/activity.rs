//! Activity log: the bounded, user-facing audit trail.
//!
//! Appends are cheap and synchronous. The log is bounded two ways:
//! entries older than the retention window are evicted, and the total
//! count never exceeds the configured maximum (oldest evicted first).
//! Persistence is fire-and-forget; a failed write loses history, not
//! correctness.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

use crate::types::{ActivityLevel, ActivityLogEntry};
use crate::util::atomic_write_str;

pub struct ActivityLog {
    path: PathBuf,
    retention_days: u32,
    max_entries: usize,
    /// Newest first.
    entries: Mutex<Vec<ActivityLogEntry>>,
}

impl ActivityLog {
    /// Open the log at `{state_dir}/activity_log.json`.
    pub fn open(state_dir: &std::path::Path, retention_days: u32, max_entries: usize) -> Self {
        Self::open_at(
            state_dir.join("activity_log.json"),
            retention_days,
            max_entries,
        )
    }

    pub fn open_at(path: PathBuf, retention_days: u32, max_entries: usize) -> Self {
        let mut entries = load_entries(&path);
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Self {
            path,
            retention_days,
            max_entries,
            entries: Mutex::new(entries),
        }
    }

    /// Append an entry and persist. Eviction runs inline so the bounds
    /// hold after every append.
    pub fn append(&self, level: ActivityLevel, message: impl Into<String>) {
        let entry = ActivityLogEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };

        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.insert(0, entry);
        self.evict(&mut entries);

        if let Err(e) = self.save(&entries) {
            log::warn!("Activity log write failed: {}", e);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(ActivityLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.append(ActivityLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(ActivityLevel::Error, message);
    }

    /// Entries newer than `within_hours` (all retained entries when
    /// `None`), newest first, capped at `limit`.
    pub fn recent(&self, limit: usize, within_hours: Option<u32>) -> Vec<ActivityLogEntry> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let cutoff = within_hours.map(|h| Utc::now() - chrono::Duration::hours(h as i64));
        entries
            .iter()
            .filter(|e| cutoff.map(|c| e.timestamp >= c).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, entries: &mut Vec<ActivityLogEntry>) {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days as i64);
        entries.retain(|e| e.timestamp >= cutoff);
        if entries.len() > self.max_entries {
            entries.truncate(self.max_entries);
        }
    }

    fn save(&self, entries: &[ActivityLogEntry]) -> Result<(), String> {
        let content =
            serde_json::to_string(entries).map_err(|e| format!("serialize: {}", e))?;
        atomic_write_str(&self.path, &content).map_err(|e| format!("write: {}", e))
    }
}

fn load_entries(path: &std::path::Path) -> Vec<ActivityLogEntry> {
    if !path.exists() {
        return Vec::new();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!(
                "Activity log at {} is corrupt ({}); starting fresh",
                path.display(),
                e
            );
            Vec::new()
        }),
        Err(e) => {
            log::warn!(
                "Could not read activity log at {} ({}); starting fresh",
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp(retention_days: u32, max_entries: usize) -> (tempfile::TempDir, ActivityLog) {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = ActivityLog::open_at(
            dir.path().join("activity_log.json"),
            retention_days,
            max_entries,
        );
        (dir, log)
    }

    #[test]
    fn test_append_and_recent() {
        let (_dir, log) = open_temp(30, 100);
        log.info("cycle started");
        log.warn("calendar refresh failed");

        let recent = log.recent(10, None);
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].message, "calendar refresh failed");
        assert_eq!(recent[0].level, ActivityLevel::Warn);
        assert_eq!(recent[1].level, ActivityLevel::Info);
    }

    #[test]
    fn test_max_entries_evicts_oldest() {
        let (_dir, log) = open_temp(30, 3);
        for i in 0..5 {
            log.info(format!("entry {}", i));
        }

        assert_eq!(log.len(), 3);
        let recent = log.recent(10, None);
        assert_eq!(recent[0].message, "entry 4");
        assert_eq!(recent[2].message, "entry 2");
    }

    #[test]
    fn test_retention_evicts_old_entries() {
        let (_dir, log) = open_temp(7, 100);
        log.info("fresh");
        {
            let mut entries = log.entries.lock().unwrap();
            entries.push(ActivityLogEntry {
                id: "old".into(),
                timestamp: Utc::now() - chrono::Duration::days(30),
                level: ActivityLevel::Info,
                message: "ancient".into(),
            });
        }

        // Next append triggers eviction.
        log.info("trigger");

        let messages: Vec<String> = log.recent(10, None).into_iter().map(|e| e.message).collect();
        assert!(!messages.contains(&"ancient".to_string()));
        assert!(messages.contains(&"fresh".to_string()));
    }

    #[test]
    fn test_recent_limit() {
        let (_dir, log) = open_temp(30, 100);
        for i in 0..10 {
            log.info(format!("entry {}", i));
        }
        assert_eq!(log.recent(4, None).len(), 4);
    }

    #[test]
    fn test_recent_window_filter() {
        let (_dir, log) = open_temp(30, 100);
        log.info("now");
        {
            let mut entries = log.entries.lock().unwrap();
            entries.push(ActivityLogEntry {
                id: "old".into(),
                timestamp: Utc::now() - chrono::Duration::hours(48),
                level: ActivityLevel::Info,
                message: "two days ago".into(),
            });
        }

        assert_eq!(log.recent(10, Some(24)).len(), 1);
        assert_eq!(log.recent(10, None).len(), 2);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("activity_log.json");
        {
            let log = ActivityLog::open_at(path.clone(), 30, 100);
            log.info("persisted");
        }
        let log = ActivityLog::open_at(path, 30, 100);
        assert_eq!(log.recent(10, None)[0].message, "persisted");
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("activity_log.json");
        std::fs::write(&path, "][").unwrap();

        let log = ActivityLog::open_at(path, 30, 100);
        assert!(log.is_empty());
        log.info("works again");
        assert_eq!(log.len(), 1);
    }
}
