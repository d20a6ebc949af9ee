//! File-backed journal.
//!
//! The layout follows this structure:
//! ```text
//! <base_dir>/
//!     streams/
//!         <thing_id>/
//!             events.jsonl    -- one JSON-encoded event per line
//!     meta/
//!         things.jsonl        -- registry of every thing that has events
//! ```
//!
//! Each append writes one line and syncs it to disk before returning. The
//! last revision of every stream is cached after the first read, so the
//! conflict check on append does not rescan the file. The cache is cleared
//! while a write is in progress: an append that fails or is dropped midway
//! forces the next append to re-read the file. A trailing line without a
//! newline is an interrupted append; reads skip it and the next append
//! truncates it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::JournalError;
use crate::event::{ThingEvent, now_millis};
use crate::journal::Journal;
use crate::model::ThingId;

/// Per-thing append lock guarding the cached last revision.
/// `None` until the stream file was read, and while an append is writing.
type StreamLock = Arc<tokio::sync::Mutex<Option<u64>>>;

/// Journal storing each thing's events as a JSONL file.
///
/// `FileJournal` is cheap to clone; clones share the revision cache.
#[derive(Debug, Clone)]
pub struct FileJournal {
    base_dir: PathBuf,
    streams: Arc<Mutex<HashMap<ThingId, StreamLock>>>,
}

impl FileJournal {
    /// Create a journal rooted at the given base directory.
    ///
    /// # Arguments
    ///
    /// * `base_dir` - Root directory for all journal data.
    ///   The directory does not need to exist yet; it is created lazily on
    ///   the first append.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns `<base_dir>/streams/<thing_id>`.
    pub fn stream_dir(&self, thing_id: &ThingId) -> PathBuf {
        self.base_dir.join("streams").join(thing_id.as_str())
    }

    /// Returns `<base_dir>/streams/<thing_id>/events.jsonl`.
    pub fn events_path(&self, thing_id: &ThingId) -> PathBuf {
        self.stream_dir(thing_id).join("events.jsonl")
    }

    /// Returns `<base_dir>/meta`.
    pub fn meta_dir(&self) -> PathBuf {
        self.base_dir.join("meta")
    }

    /// Lists the IDs of every thing with a stream directory.
    ///
    /// # Returns
    ///
    /// A sorted `Vec<String>` of thing IDs. Returns an empty vector if no
    /// stream was written yet.
    ///
    /// # Errors
    ///
    /// Returns `std::io::Error` if reading the directory fails for a reason
    /// other than the directory not existing.
    pub async fn list_things(&self) -> io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(self.base_dir.join("streams")).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn stream_lock(&self, thing_id: &ThingId) -> StreamLock {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.entry(thing_id.clone()).or_default().clone()
    }

    /// Read every complete event of a stream, oldest first.
    ///
    /// # Returns
    ///
    /// The events, and the byte length of the complete lines if the file
    /// ends with an interrupted append.
    async fn read_stream(
        &self,
        thing_id: &ThingId,
    ) -> Result<(Vec<ThingEvent>, Option<u64>), JournalError> {
        let contents = match tokio::fs::read_to_string(self.events_path(thing_id)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), None)),
            Err(e) => return Err(e.into()),
        };
        let complete = contents.rfind('\n').map_or(0, |end| end + 1);
        let torn = (complete < contents.len()).then_some(complete as u64);
        let events = contents[..complete]
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).map_err(JournalError::from))
            .collect::<Result<_, _>>()?;
        Ok((events, torn))
    }

    /// Re-read the last revision of a stream, truncating an interrupted
    /// append.
    async fn read_last_revision(&self, thing_id: &ThingId) -> Result<u64, JournalError> {
        let (events, torn) = self.read_stream(thing_id).await?;
        if let Some(len) = torn {
            tracing::warn!(thing_id = %thing_id, len, "truncating interrupted append");
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(self.events_path(thing_id))
                .await?;
            file.set_len(len).await?;
            file.sync_data().await?;
        }
        Ok(events.last().map_or(0, |e| e.revision))
    }

    /// Create the stream directory and its registry entry.
    async fn ensure_stream(&self, thing_id: &ThingId) -> io::Result<()> {
        if tokio::fs::try_exists(self.stream_dir(thing_id)).await? {
            return Ok(());
        }
        tokio::fs::create_dir_all(self.stream_dir(thing_id)).await?;
        tokio::fs::create_dir_all(self.meta_dir()).await?;

        let entry = serde_json::json!({
            "id": thing_id.as_str(),
            "ts": now_millis() / 1000,
        });
        let mut registry = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.meta_dir().join("things.jsonl"))
            .await?;
        registry.write_all(format!("{entry}\n").as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn append(
        &self,
        thing_id: &ThingId,
        event: &ThingEvent,
        expected_revision: u64,
    ) -> Result<(), JournalError> {
        let lock = self.stream_lock(thing_id);
        let mut last = lock.lock().await;
        let actual = match *last {
            Some(revision) => revision,
            None => self.read_last_revision(thing_id).await?,
        };
        *last = Some(actual);

        if actual != expected_revision || event.revision != expected_revision + 1 {
            return Err(JournalError::Conflict {
                thing_id: thing_id.clone(),
                expected: expected_revision,
                actual,
            });
        }
        // Unknown until the line is synced.
        *last = None;

        if actual == 0 {
            self.ensure_stream(thing_id).await?;
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(thing_id))
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;

        *last = Some(event.revision);
        Ok(())
    }

    async fn load_events(
        &self,
        thing_id: &ThingId,
        from_revision: u64,
    ) -> Result<Vec<ThingEvent>, JournalError> {
        let (mut events, _) = self.read_stream(thing_id).await?;
        events.retain(|e| e.revision >= from_revision);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::journal::test_fixtures::history;
    use crate::model::test_fixtures::thing_id;

    async fn append_all(journal: &FileJournal, events: &[ThingEvent]) {
        for event in events {
            journal
                .append(&event.thing_id, event, event.revision - 1)
                .await
                .expect("append should succeed");
        }
    }

    #[test]
    fn path_helpers_correct() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let journal = FileJournal::new(tmp.path());
        let id = thing_id("lamp");

        assert_eq!(journal.base_dir(), tmp.path());
        assert_eq!(
            journal.events_path(&id),
            tmp.path().join("streams/org.example:lamp/events.jsonl")
        );
        assert_eq!(journal.meta_dir(), tmp.path().join("meta"));
    }

    #[tokio::test]
    async fn append_then_load_roundtrips() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let journal = FileJournal::new(tmp.path());
        let events = history("lamp", 4);
        append_all(&journal, &events).await;

        let loaded = journal
            .load_events(&thing_id("lamp"), 1)
            .await
            .expect("load should succeed");
        assert_eq!(loaded, events);

        let tail = journal
            .load_events(&thing_id("lamp"), 3)
            .await
            .expect("load should succeed");
        assert_eq!(tail, events[2..].to_vec());
    }

    #[tokio::test]
    async fn reopened_journal_continues_after_last_revision() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let events = history("lamp", 4);
        append_all(&FileJournal::new(tmp.path()), &events[..3]).await;

        let reopened = FileJournal::new(tmp.path());
        let id = thing_id("lamp");
        let err = reopened
            .append(&id, &events[2], 2)
            .await
            .expect_err("stale expected revision must conflict");
        assert!(matches!(err, JournalError::Conflict { actual: 3, .. }));

        reopened
            .append(&id, &events[3], 3)
            .await
            .expect("next revision appends");
        let loaded = reopened.load_events(&id, 1).await.expect("load");
        assert_eq!(loaded, events);
    }

    #[tokio::test]
    async fn dropped_append_never_duplicates_a_revision() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let journal = FileJournal::new(tmp.path());
        let id = thing_id("lamp");
        let events = history("lamp", 2);
        append_all(&journal, &events[..1]).await;

        let append = journal.append(&id, &events[1], 1);
        let dropped = tokio::time::timeout(Duration::ZERO, append).await;
        assert!(dropped.is_err(), "append must still be writing");
        // Let the blocking write submitted before the drop settle, then make
        // sure the line reached the file either way.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let on_disk = std::fs::read_to_string(journal.events_path(&id)).expect("stream exists");
        if on_disk.lines().count() == 1 {
            let mut line = serde_json::to_string(&events[1]).expect("serialize");
            line.push('\n');
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(journal.events_path(&id))
                .expect("open stream");
            std::io::Write::write_all(&mut file, line.as_bytes()).expect("write line");
        }

        let err = journal
            .append(&id, &events[1], 1)
            .await
            .expect_err("revision 2 is already on disk");
        assert!(matches!(err, JournalError::Conflict { actual: 2, .. }));
        let revisions: Vec<u64> = journal
            .load_events(&id, 1)
            .await
            .expect("load")
            .iter()
            .map(|e| e.revision)
            .collect();
        assert_eq!(revisions, vec![1, 2]);
    }

    #[tokio::test]
    async fn interrupted_line_is_skipped_then_truncated() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let id = thing_id("lamp");
        let events = history("lamp", 2);
        append_all(&FileJournal::new(tmp.path()), &events[..1]).await;

        let journal = FileJournal::new(tmp.path());
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(journal.events_path(&id))
            .expect("open stream");
        std::io::Write::write_all(&mut file, br#"{"thingId":"org.exa"#).expect("write");

        let loaded = journal.load_events(&id, 1).await.expect("torn tail is skipped");
        assert_eq!(loaded, events[..1].to_vec());

        journal
            .append(&id, &events[1], 1)
            .await
            .expect("append after interrupted line");
        assert_eq!(journal.load_events(&id, 1).await.expect("load"), events);
        let contents = std::fs::read_to_string(journal.events_path(&id)).expect("read");
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn first_append_registers_thing() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let journal = FileJournal::new(tmp.path());
        append_all(&journal, &history("charlie", 1)).await;
        append_all(&journal, &history("alpha", 2)).await;

        let things = journal.list_things().await.expect("list should succeed");
        assert_eq!(things, vec!["org.example:alpha", "org.example:charlie"]);

        let registry = std::fs::read_to_string(tmp.path().join("meta/things.jsonl"))
            .expect("registry exists");
        assert_eq!(registry.lines().count(), 2, "one entry per thing");
        for line in registry.lines() {
            let entry: serde_json::Value = serde_json::from_str(line).expect("valid JSON");
            assert!(entry.get("id").and_then(|v| v.as_str()).is_some());
            assert!(entry.get("ts").and_then(|v| v.as_u64()).is_some());
        }
    }

    #[tokio::test]
    async fn list_things_empty_without_streams() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let journal = FileJournal::new(tmp.path());
        assert!(journal.list_things().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn corrupt_line_is_a_serialization_error() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let journal = FileJournal::new(tmp.path());
        let id = thing_id("broken");
        std::fs::create_dir_all(journal.stream_dir(&id)).expect("create dir");
        std::fs::write(journal.events_path(&id), b"{not json}\n").expect("write");

        let err = journal
            .load_events(&id, 1)
            .await
            .expect_err("corrupt journal must not load");
        assert!(matches!(err, JournalError::Serialization(_)));
    }
}
