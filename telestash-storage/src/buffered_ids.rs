// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Buffered id ledger
//!
//! Remembers which telemetry ids were durably written but not yet confirmed
//! delivered, one deduplicated set per [`TelemetryKind`]. Each set is stored
//! in the preference store as a JSON array of strings, so it survives process
//! death together with the data it points at.

use crate::preferences::PreferenceStore;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use telestash_core::{PreferenceValue, Result, StorageError, TelemetryKind};

pub const BUFFERED_IDS_KEY_PREFIX: &str = "buffered_ids.";

pub struct BufferedIdTracker {
    preferences: Arc<PreferenceStore>,
    /// Serializes read-modify-write of a set
    lock: Mutex<()>,
}

impl BufferedIdTracker {
    pub fn new(preferences: Arc<PreferenceStore>) -> Self {
        Self {
            preferences,
            lock: Mutex::new(()),
        }
    }

    pub fn key(kind: TelemetryKind) -> String {
        format!("{}{}", BUFFERED_IDS_KEY_PREFIX, kind.as_str())
    }

    /// Returns true if the id was not already buffered. Adding a present id
    /// does not touch the disk.
    pub fn add(&self, kind: TelemetryKind, id: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut ids = self.load_or_heal(kind);
        if !ids.insert(id.to_string()) {
            return Ok(false);
        }
        self.store(kind, &ids)?;
        Ok(true)
    }

    /// Drop an acknowledged id. Returns true if it was buffered.
    pub fn remove(&self, kind: TelemetryKind, id: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut ids = self.load_or_heal(kind);
        if !ids.remove(id) {
            return Ok(false);
        }
        if ids.is_empty() {
            self.preferences.edit().remove(Self::key(kind)).commit()?;
        } else {
            self.store(kind, &ids)?;
        }
        Ok(true)
    }

    /// All buffered ids for `kind`. A corrupt entry reads as empty and is
    /// removed so the failure does not repeat.
    pub fn all(&self, kind: TelemetryKind) -> Vec<String> {
        let _guard = self.lock.lock();
        self.load_or_heal(kind).into_iter().collect()
    }

    pub fn contains(&self, kind: TelemetryKind, id: &str) -> bool {
        let _guard = self.lock.lock();
        self.load_or_heal(kind).contains(id)
    }

    pub fn clear(&self, kind: TelemetryKind) -> Result<()> {
        let _guard = self.lock.lock();
        self.preferences.edit().remove(Self::key(kind)).commit()
    }

    /// Startup recovery for a delivery worker: keeps ids whose backing data
    /// still exists and forgets the orphans. Returns the ids left to deliver.
    pub fn reconcile<F>(&self, kind: TelemetryKind, has_data: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        let _guard = self.lock.lock();
        let ids = self.load_or_heal(kind);
        let (live, orphaned): (BTreeSet<String>, BTreeSet<String>) =
            ids.into_iter().partition(|id| has_data(id));

        if !orphaned.is_empty() {
            tracing::info!(
                "Dropping {} orphaned {} ids with no backing data",
                orphaned.len(),
                kind
            );
            if live.is_empty() {
                self.preferences.edit().remove(Self::key(kind)).commit()?;
            } else {
                self.store(kind, &live)?;
            }
        }

        Ok(live.into_iter().collect())
    }

    fn load(&self, kind: TelemetryKind) -> Result<BTreeSet<String>> {
        let key = Self::key(kind);
        match self.preferences.get(&key) {
            None => Ok(BTreeSet::new()),
            Some(PreferenceValue::String(json)) => serde_json::from_str::<Vec<String>>(&json)
                .map(|ids| ids.into_iter().collect())
                .map_err(|e| StorageError::corrupt(self.preferences.path(), format!("{key}: {e}"))),
            Some(other) => Err(StorageError::corrupt(
                self.preferences.path(),
                format!("{key}: expected string, found {}", other.type_name()),
            )),
        }
    }

    fn load_or_heal(&self, kind: TelemetryKind) -> BTreeSet<String> {
        match self.load(kind) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Discarding buffered {} ids: {}", kind, e);
                self.preferences.edit().remove(Self::key(kind)).apply();
                BTreeSet::new()
            }
        }
    }

    fn store(&self, kind: TelemetryKind, ids: &BTreeSet<String>) -> Result<()> {
        let json = serde_json::to_string(ids)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.preferences
            .edit()
            .put(Self::key(kind), PreferenceValue::String(json))
            .commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalFsBackend;
    use tempfile::TempDir;

    fn preferences(temp_dir: &TempDir) -> Arc<PreferenceStore> {
        Arc::new(PreferenceStore::open(
            temp_dir.path().join("preferences.dat"),
            Arc::new(LocalFsBackend::new()),
        ))
    }

    #[test]
    fn test_add_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let tracker = BufferedIdTracker::new(preferences(&temp_dir));

        assert!(tracker.add(TelemetryKind::Span, "a").unwrap());
        assert!(!tracker.add(TelemetryKind::Span, "a").unwrap());

        assert_eq!(tracker.all(TelemetryKind::Span), vec!["a"]);
        assert!(tracker.all(TelemetryKind::Log).is_empty());
    }

    #[test]
    fn test_persisted_as_json_array() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = preferences(&temp_dir);
        let tracker = BufferedIdTracker::new(Arc::clone(&prefs));
        tracker.add(TelemetryKind::Log, "b").unwrap();
        tracker.add(TelemetryKind::Log, "a").unwrap();

        assert_eq!(
            prefs.get("buffered_ids.log"),
            Some(PreferenceValue::String("[\"a\",\"b\"]".to_string()))
        );

        let reopened = BufferedIdTracker::new(preferences(&temp_dir));
        assert_eq!(reopened.all(TelemetryKind::Log), vec!["a", "b"]);
    }

    #[test]
    fn test_corrupt_entry_reads_empty_and_heals() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = preferences(&temp_dir);
        prefs
            .edit()
            .put(
                BufferedIdTracker::key(TelemetryKind::SessionReplay),
                PreferenceValue::String("{not json".into()),
            )
            .commit()
            .unwrap();

        let tracker = BufferedIdTracker::new(Arc::clone(&prefs));
        assert!(tracker.all(TelemetryKind::SessionReplay).is_empty());
        assert!(!prefs.contains("buffered_ids.session-replay"));
        assert!(tracker.all(TelemetryKind::SessionReplay).is_empty());

        // and the scope is usable again
        assert!(tracker.add(TelemetryKind::SessionReplay, "x").unwrap());
        assert_eq!(tracker.all(TelemetryKind::SessionReplay), vec!["x"]);
    }

    #[test]
    fn test_wrong_value_type_is_treated_as_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = preferences(&temp_dir);
        prefs
            .edit()
            .put("buffered_ids.span", PreferenceValue::Int(4))
            .commit()
            .unwrap();

        let tracker = BufferedIdTracker::new(Arc::clone(&prefs));
        assert!(tracker.all(TelemetryKind::Span).is_empty());
        assert!(!prefs.contains("buffered_ids.span"));
    }

    #[test]
    fn test_remove_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = preferences(&temp_dir);
        let tracker = BufferedIdTracker::new(Arc::clone(&prefs));
        tracker.add(TelemetryKind::Span, "a").unwrap();
        tracker.add(TelemetryKind::Span, "b").unwrap();

        assert!(tracker.remove(TelemetryKind::Span, "a").unwrap());
        assert!(!tracker.remove(TelemetryKind::Span, "a").unwrap());
        assert_eq!(tracker.all(TelemetryKind::Span), vec!["b"]);

        tracker.clear(TelemetryKind::Span).unwrap();
        assert!(tracker.all(TelemetryKind::Span).is_empty());
        assert!(!prefs.contains("buffered_ids.span"));
    }

    #[test]
    fn test_reconcile_drops_orphans() {
        let temp_dir = TempDir::new().unwrap();
        let tracker = BufferedIdTracker::new(preferences(&temp_dir));
        for id in ["kept", "orphan-1", "orphan-2"] {
            tracker.add(TelemetryKind::Span, id).unwrap();
        }

        let live = tracker
            .reconcile(TelemetryKind::Span, |id| id == "kept")
            .unwrap();
        assert_eq!(live, vec!["kept"]);
        assert_eq!(tracker.all(TelemetryKind::Span), vec!["kept"]);

        let live = tracker.reconcile(TelemetryKind::Span, |_| false).unwrap();
        assert!(live.is_empty());
        assert!(tracker.all(TelemetryKind::Span).is_empty());
    }
}
