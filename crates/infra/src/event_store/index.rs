//! In-memory log index shared by every event store backend.
//!
//! Backends wrap one `LogIndex` in an `RwLock`: appends hold the write lock
//! across check-version / persist / commit, reads share the read lock.

use std::collections::HashMap;

use lineage_core::{ExpectedVersion, StreamId};

use super::query::{EventPage, Pagination, TimeRange};
use super::r#trait::{EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
struct StreamEntry {
    stream_type: String,
    /// Global positions of this stream's events, in version order.
    positions: Vec<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct LogIndex {
    /// Global log; the event at position `p` lives at index `p - 1`.
    events: Vec<StoredEvent>,
    streams: HashMap<StreamId, StreamEntry>,
}

impl LogIndex {
    pub(crate) fn max_position(&self) -> u64 {
        self.events.len() as u64
    }

    pub(crate) fn stream_version(&self, stream_id: &StreamId) -> u64 {
        self.streams
            .get(stream_id)
            .map(|s| s.positions.len() as u64)
            .unwrap_or(0)
    }

    /// Check the expectation and stamp versions/positions, without committing.
    pub(crate) fn prepare(
        &self,
        stream_id: &StreamId,
        stream_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if stream_type.trim().is_empty() {
            return Err(EventStoreError::InvalidAppend(
                "stream type must not be blank".to_string(),
            ));
        }

        let current = self.stream_version(stream_id);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency {
                stream_id: stream_id.clone(),
                expected: expected_version,
                actual: current,
            });
        }

        // Stream type is fixed by the first event.
        if let Some(existing) = self.streams.get(stream_id) {
            if existing.stream_type != stream_type {
                return Err(EventStoreError::StreamTypeMismatch {
                    stream_id: stream_id.clone(),
                    existing: existing.stream_type.clone(),
                    attempted: stream_type.to_string(),
                });
            }
        }

        let mut version = current;
        let mut position = self.max_position();
        let stored = events
            .into_iter()
            .map(|e| {
                version += 1;
                position += 1;
                StoredEvent {
                    event_id: e.event_id,
                    stream_id: stream_id.clone(),
                    stream_type: stream_type.to_string(),
                    event_type: e.event_type,
                    event_version: e.event_version,
                    version,
                    global_position: position,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                }
            })
            .collect();

        Ok(stored)
    }

    /// Commit events produced by `prepare` against this same, unchanged index.
    pub(crate) fn commit(&mut self, stored: &[StoredEvent]) {
        for e in stored {
            let entry = self
                .streams
                .entry(e.stream_id.clone())
                .or_insert_with(|| StreamEntry {
                    stream_type: e.stream_type.clone(),
                    positions: Vec::new(),
                });
            entry.positions.push(e.global_position);
            self.events.push(e.clone());
        }
    }

    /// Re-admit one previously persisted event, verifying contiguity.
    pub(crate) fn restore(&mut self, event: StoredEvent) -> Result<(), EventStoreError> {
        let expected_position = self.max_position() + 1;
        if event.global_position != expected_position {
            return Err(EventStoreError::Corrupt(format!(
                "expected global position {expected_position}, found {}",
                event.global_position
            )));
        }

        let expected_version = self.stream_version(&event.stream_id) + 1;
        if event.version != expected_version {
            return Err(EventStoreError::Corrupt(format!(
                "stream '{}' expected version {expected_version}, found {}",
                event.stream_id, event.version
            )));
        }

        if let Some(existing) = self.streams.get(&event.stream_id) {
            if existing.stream_type != event.stream_type {
                return Err(EventStoreError::Corrupt(format!(
                    "stream '{}' changes type from '{}' to '{}'",
                    event.stream_id, existing.stream_type, event.stream_type
                )));
            }
        }

        self.commit(std::slice::from_ref(&event));
        Ok(())
    }

    fn stream_events<'a>(&'a self, stream_id: &StreamId) -> impl Iterator<Item = &'a StoredEvent> + 'a {
        self.streams
            .get(stream_id)
            .into_iter()
            .flat_map(|s| s.positions.iter())
            .filter_map(|p| self.events.get((*p - 1) as usize))
    }

    pub(crate) fn read_stream(&self, stream_id: &StreamId) -> Vec<StoredEvent> {
        self.stream_events(stream_id).cloned().collect()
    }

    pub(crate) fn read_all(&self, from_position: u64, limit: usize) -> Vec<StoredEvent> {
        let start = usize::try_from(from_position).unwrap_or(usize::MAX);
        self.events
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn read_by_stream(&self, stream_id: &StreamId, pagination: Pagination) -> EventPage {
        pagination.page(self.stream_events(stream_id))
    }

    pub(crate) fn read_global_by_time(
        &self,
        range: TimeRange,
        event_type: Option<&str>,
        pagination: Pagination,
    ) -> EventPage {
        let mut matching: Vec<&StoredEvent> = self
            .events
            .iter()
            .filter(|e| range.contains(e.occurred_at))
            .filter(|e| event_type.is_none_or(|t| e.event_type == t))
            .collect();
        matching.sort_by_key(|e| (e.occurred_at, e.global_position));
        pagination.page(matching)
    }
}
