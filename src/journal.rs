//! Event log adapter.
//!
//! The [`Journal`] trait is the seam to whatever durable, append-only,
//! per-thing event store the deployment provides. Two adapters ship with
//! the crate: [`InMemoryJournal`] here, and
//! [`FileJournal`](crate::FileJournal) in the storage module.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::JournalError;
use crate::event::ThingEvent;
use crate::model::ThingId;

/// Append-only, per-thing ordered event storage.
///
/// Implementations must make `append` atomic, and a successful return must
/// imply durability. Revisions within one thing start at 1 and increase by
/// exactly one per event.
#[async_trait]
pub trait Journal: Send + Sync + 'static {
    /// Append `event` if the thing's journal currently ends at
    /// `expected_revision`.
    ///
    /// # Errors
    ///
    /// * [`JournalError::Conflict`] -- the journal ends at another revision,
    ///   i.e. a second writer exists.
    /// * [`JournalError::Io`] / [`JournalError::Serialization`] -- storage failure.
    async fn append(
        &self,
        thing_id: &ThingId,
        event: &ThingEvent,
        expected_revision: u64,
    ) -> Result<(), JournalError>;

    /// Load all events with `revision >= from_revision`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] if the events cannot be read or decoded.
    async fn load_events(
        &self,
        thing_id: &ThingId,
        from_revision: u64,
    ) -> Result<Vec<ThingEvent>, JournalError>;
}

/// Journal held in process memory.
///
/// `Clone` shares the underlying storage, so a test can keep one clone to
/// inspect what an actor persisted.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJournal {
    streams: Arc<Mutex<HashMap<ThingId, Vec<ThingEvent>>>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event persisted for `thing_id`.
    pub fn events(&self, thing_id: &ThingId) -> Vec<ThingEvent> {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.get(thing_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn append(
        &self,
        thing_id: &ThingId,
        event: &ThingEvent,
        expected_revision: u64,
    ) -> Result<(), JournalError> {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let stream = streams.entry(thing_id.clone()).or_default();
        let actual = stream.last().map_or(0, |e| e.revision);
        if actual != expected_revision || event.revision != expected_revision + 1 {
            return Err(JournalError::Conflict {
                thing_id: thing_id.clone(),
                expected: expected_revision,
                actual,
            });
        }
        stream.push(event.clone());
        Ok(())
    }

    async fn load_events(
        &self,
        thing_id: &ThingId,
        from_revision: u64,
    ) -> Result<Vec<ThingEvent>, JournalError> {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(streams
            .get(thing_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.revision >= from_revision)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::history;
    use super::*;
    use crate::model::test_fixtures::thing_id;

    #[tokio::test]
    async fn append_then_load_in_order() {
        let journal = InMemoryJournal::new();
        let id = thing_id("j1");
        for (expected, event) in history("j1", 3).iter().enumerate() {
            journal
                .append(&id, event, expected as u64)
                .await
                .expect("append should succeed");
        }

        let events = journal.load_events(&id, 1).await.expect("load");
        let revisions: Vec<u64> = events.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![1, 2, 3]);
        assert_eq!(journal.events(&id).len(), 3);
    }

    #[tokio::test]
    async fn load_from_revision_skips_earlier_events() {
        let journal = InMemoryJournal::new();
        let id = thing_id("j2");
        for (expected, event) in history("j2", 5).iter().enumerate() {
            journal
                .append(&id, event, expected as u64)
                .await
                .expect("append");
        }
        let events = journal.load_events(&id, 4).await.expect("load");
        let revisions: Vec<u64> = events.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![4, 5]);
    }

    #[tokio::test]
    async fn append_with_stale_expected_revision_conflicts() {
        let journal = InMemoryJournal::new();
        let id = thing_id("j3");
        let events = history("j3", 2);
        journal.append(&id, &events[0], 0).await.expect("append");

        let err = journal
            .append(&id, &events[0], 0)
            .await
            .expect_err("second writer must conflict");
        assert!(
            matches!(
                err,
                JournalError::Conflict {
                    expected: 0,
                    actual: 1,
                    ..
                }
            ),
            "unexpected error: {err:?}"
        );
        assert_eq!(journal.events(&id).len(), 1);
    }

    #[tokio::test]
    async fn unknown_thing_is_empty() {
        let journal = InMemoryJournal::new();
        let id = thing_id("nobody");
        assert!(journal.load_events(&id, 1).await.expect("load").is_empty());
        assert!(journal.events(&id).is_empty());
    }
}
