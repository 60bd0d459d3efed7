//! Whole-replace snapshot cells for mailbox and calendar data.
//!
//! A snapshot is never partially mutated: a refresh either replaces the
//! whole thing or leaves the previous snapshot standing (refresh
//! failures keep stale data rather than dropping to empty).

use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::types::FetchWindow;

/// One immutable snapshot of fetched items.
#[derive(Debug, Clone)]
pub struct CacheSnapshot<T> {
    pub items: Vec<T>,
    pub fetched_at: DateTime<Utc>,
    pub window: FetchWindow,
}

/// Holder for the current snapshot of one data source.
pub struct SnapshotCell<T> {
    inner: RwLock<Option<CacheSnapshot<T>>>,
}

impl<T: Clone> SnapshotCell<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, items: Vec<T>, window: FetchWindow) {
        let snapshot = CacheSnapshot {
            items,
            fetched_at: Utc::now(),
            window,
        };
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(snapshot);
        }
    }

    /// Current snapshot, if any refresh has ever succeeded.
    pub fn get(&self) -> Option<CacheSnapshot<T>> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.fetched_at))
    }
}

impl<T: Clone> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> FetchWindow {
        FetchWindow {
            days: 7,
            max_results: 50,
        }
    }

    #[test]
    fn test_starts_empty() {
        let cell: SnapshotCell<String> = SnapshotCell::new();
        assert!(cell.get().is_none());
        assert!(cell.fetched_at().is_none());
    }

    #[test]
    fn test_replace_is_wholesale() {
        let cell = SnapshotCell::new();
        cell.replace(vec!["a".to_string(), "b".to_string()], window());
        cell.replace(vec!["c".to_string()], window());

        let snapshot = cell.get().unwrap();
        assert_eq!(snapshot.items, vec!["c".to_string()]);
        assert_eq!(snapshot.window, window());
    }

    #[test]
    fn test_skipped_refresh_retains_snapshot() {
        let cell = SnapshotCell::new();
        cell.replace(vec![1, 2, 3], window());
        let first = cell.get().unwrap();

        // A failed refresh simply never calls replace(); the old
        // snapshot stays visible.
        let still = cell.get().unwrap();
        assert_eq!(still.items, first.items);
        assert_eq!(still.fetched_at, first.fetched_at);
    }
}
