//! Snapshot persistence and the snapshot manager.
//!
//! A snapshot is a serialized thing plus the revision it was taken at.
//! It only bounds recovery replay; the journal stays authoritative.
//!
//! The file-backed store keeps the latest snapshot per thing at
//! `<base_dir>/snapshots/<thing_id>/snapshot.json`. Writes are atomic via
//! a temp-rename pattern to prevent corruption from crashes mid-write.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::model::{Thing, ThingId};

/// Retention hint for downstream cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotTag {
    Protected,
    Unprotected,
}

/// A point-in-time copy of a thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub thing: Thing,
    /// Number of events folded into `thing`. Replay resumes at `revision + 1`.
    pub revision: u64,
    pub tag: SnapshotTag,
}

/// Point-in-time snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Persist `snapshot` as the latest snapshot of `thing_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if the snapshot could not be written.
    async fn save(&self, thing_id: &ThingId, snapshot: &Snapshot) -> Result<(), SnapshotError>;

    /// Load the latest snapshot of `thing_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] only for unexpected storage failures; a
    /// missing snapshot is `Ok(None)`.
    async fn load_latest(&self, thing_id: &ThingId) -> Result<Option<Snapshot>, SnapshotError>;
}

/// Snapshot store held in process memory. `Clone` shares storage.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<Mutex<HashMap<ThingId, Snapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, thing_id: &ThingId, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(thing_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_latest(&self, thing_id: &ThingId) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(thing_id)
            .cloned())
    }
}

/// Snapshot store writing one JSON file per thing.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    base_dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store rooted at `base_dir`. The directory is created lazily.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Compute the filesystem path for a snapshot file.
    ///
    /// # Returns
    ///
    /// `<base_dir>/snapshots/<thing_id>/snapshot.json`
    pub fn snapshot_path(&self, thing_id: &ThingId) -> PathBuf {
        snapshot_path(&self.base_dir, thing_id)
    }
}

fn snapshot_path(base_dir: &Path, thing_id: &ThingId) -> PathBuf {
    base_dir
        .join("snapshots")
        .join(thing_id.as_str())
        .join("snapshot.json")
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    /// Writes to `snapshot.json.tmp` in the same directory, then renames it
    /// to `snapshot.json`, so readers never see a partially-written file.
    async fn save(&self, thing_id: &ThingId, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let path = self.snapshot_path(thing_id);
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::other("snapshot path has no parent directory"))?;
        tokio::fs::create_dir_all(dir).await?;

        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// A corrupt file is logged and treated as a miss; recovery then
    /// replays the full journal.
    async fn load_latest(&self, thing_id: &ThingId) -> Result<Option<Snapshot>, SnapshotError> {
        let path = self.snapshot_path(thing_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snap) => Ok(Some(snap)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to deserialize snapshot; treating as cache miss"
                );
                Ok(None)
            }
        }
    }
}

/// Decides when a thing is snapshotted and tracks the outcome.
///
/// At most one save is in flight at a time. `last_snapshot_revision` only
/// advances when a save succeeds, so a failed save is retried by the next
/// trigger.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    threshold: u64,
    last_snapshot_revision: u64,
    in_flight: Option<u64>,
}

impl SnapshotManager {
    /// # Arguments
    ///
    /// * `threshold` - Unsnapshotted revisions that trigger a snapshot.
    /// * `last_snapshot_revision` - Revision of the snapshot recovery used, or `0`.
    pub fn new(threshold: u64, last_snapshot_revision: u64) -> Self {
        Self {
            threshold,
            last_snapshot_revision,
            in_flight: None,
        }
    }

    pub fn last_snapshot_revision(&self) -> u64 {
        self.last_snapshot_revision
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether the latest snapshot covers `current_revision`.
    pub fn is_up_to_date(&self, current_revision: u64) -> bool {
        self.last_snapshot_revision >= current_revision
    }

    /// Whether enough revisions accumulated since the last snapshot.
    pub fn threshold_passed(&self, current_revision: u64) -> bool {
        current_revision > self.last_snapshot_revision
            && current_revision - self.last_snapshot_revision >= self.threshold
    }

    /// Start a snapshot of `thing` at `revision`.
    ///
    /// # Returns
    ///
    /// The snapshot to save, or `None` when the thing is absent, the latest
    /// snapshot already covers `revision`, or another save is in flight.
    pub fn begin(&mut self, thing: Option<&Thing>, revision: u64) -> Option<Snapshot> {
        let Some(thing) = thing else {
            tracing::info!(revision, "thing is absent, skipping snapshot");
            return None;
        };
        if self.is_up_to_date(revision) {
            tracing::debug!(
                thing_id = %thing.thing_id,
                revision,
                "snapshot already up to date"
            );
            return None;
        }
        if let Some(pending) = self.in_flight {
            tracing::debug!(
                thing_id = %thing.thing_id,
                pending,
                "snapshot already in flight"
            );
            return None;
        }
        self.in_flight = Some(revision);
        Some(Snapshot {
            thing: thing.clone(),
            revision,
            tag: SnapshotTag::Unprotected,
        })
    }

    /// Record the outcome of the save started for `revision`.
    pub fn complete(&mut self, revision: u64, succeeded: bool) {
        if self.in_flight == Some(revision) {
            self.in_flight = None;
        }
        if succeeded && revision > self.last_snapshot_revision {
            self.last_snapshot_revision = revision;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_fixtures::{sample_thing, thing_id};

    fn snapshot(revision: u64) -> Snapshot {
        let mut thing = sample_thing("s");
        thing.revision = revision;
        Snapshot {
            thing,
            revision,
            tag: SnapshotTag::Unprotected,
        }
    }

    #[test]
    fn snapshot_path_returns_expected_path() {
        let store = FileSnapshotStore::new("/data/things");
        let path = store.snapshot_path(&thing_id("s"));
        assert_eq!(
            path,
            PathBuf::from("/data/things/snapshots/org.example:s/snapshot.json")
        );
    }

    #[test]
    fn tag_serializes_upper_case() {
        let json = serde_json::to_value(SnapshotTag::Unprotected).expect("serialize");
        assert_eq!(json, serde_json::json!("UNPROTECTED"));
    }

    #[tokio::test]
    async fn file_save_then_load_roundtrips() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(dir.path());
        let id = thing_id("s");

        store.save(&id, &snapshot(7)).await.expect("save should succeed");
        let loaded = store
            .load_latest(&id)
            .await
            .expect("load should succeed")
            .expect("snapshot should exist");
        assert_eq!(loaded, snapshot(7));
    }

    #[tokio::test]
    async fn file_load_nonexistent_returns_none() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(dir.path());
        let result = store
            .load_latest(&thing_id("missing"))
            .await
            .expect("load should succeed");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn file_load_corrupt_json_returns_none() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(dir.path());
        let id = thing_id("bad");
        let path = store.snapshot_path(&id);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        std::fs::write(&path, b"this is not valid json!!!").expect("write corrupt file");

        let result = store.load_latest(&id).await.expect("load should not Err");
        assert!(
            result.is_none(),
            "corrupt JSON should return Ok(None), not Ok(Some(...))"
        );
    }

    #[tokio::test]
    async fn file_save_uses_atomic_temp_rename() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(dir.path());
        let id = thing_id("atomic");
        store.save(&id, &snapshot(3)).await.expect("save");

        let final_path = store.snapshot_path(&id);
        let tmp_path = final_path.with_extension("json.tmp");
        assert!(final_path.exists(), "final snapshot file should exist");
        assert!(
            !tmp_path.exists(),
            "temp file should not exist after successful save"
        );
    }

    #[tokio::test]
    async fn in_memory_store_keeps_latest() {
        let store = InMemorySnapshotStore::new();
        let id = thing_id("s");
        store.save(&id, &snapshot(2)).await.expect("save");
        store.save(&id, &snapshot(5)).await.expect("save");
        let loaded = store.load_latest(&id).await.expect("load").expect("exists");
        assert_eq!(loaded.revision, 5);
    }

    #[test]
    fn threshold_counts_unsnapshotted_revisions() {
        let manager = SnapshotManager::new(5, 0);
        assert!(!manager.threshold_passed(4));
        assert!(manager.threshold_passed(5));

        let manager = SnapshotManager::new(5, 3);
        assert!(!manager.threshold_passed(7));
        assert!(manager.threshold_passed(8));
    }

    #[test]
    fn zero_threshold_requires_new_revision() {
        let manager = SnapshotManager::new(0, 4);
        assert!(!manager.threshold_passed(4));
        assert!(manager.threshold_passed(5));
    }

    #[test]
    fn begin_skips_absent_thing() {
        let mut manager = SnapshotManager::new(1, 0);
        assert!(manager.begin(None, 3).is_none());
        assert!(!manager.is_in_flight());
    }

    #[test]
    fn success_advances_last_snapshot_revision() {
        let mut manager = SnapshotManager::new(1, 0);
        let thing = sample_thing("s");
        let snap = manager.begin(Some(&thing), 4).expect("snapshot starts");
        assert_eq!(snap.tag, SnapshotTag::Unprotected);
        assert!(manager.is_in_flight());
        assert!(manager.begin(Some(&thing), 5).is_none(), "one save at a time");

        manager.complete(4, true);
        assert_eq!(manager.last_snapshot_revision(), 4);
        assert!(!manager.is_in_flight());
        assert!(manager.begin(Some(&thing), 4).is_none(), "already up to date");
    }

    #[test]
    fn failure_leaves_last_snapshot_revision() {
        let mut manager = SnapshotManager::new(1, 2);
        let thing = sample_thing("s");
        manager.begin(Some(&thing), 6).expect("snapshot starts");
        manager.complete(6, false);
        assert_eq!(manager.last_snapshot_revision(), 2);
        assert!(manager.begin(Some(&thing), 6).is_some(), "retried later");
    }
}
