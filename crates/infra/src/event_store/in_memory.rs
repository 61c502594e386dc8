use std::sync::RwLock;

use lineage_core::{CancellationToken, ExpectedVersion, StreamId};

use super::index::LogIndex;
use super::query::{EventPage, Pagination, TimeRange};
use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev and for hosts that rebuild from another source on
/// start. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    index: RwLock<LogIndex>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        stream_id: &StreamId,
        stream_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        cancel.check()?;

        let mut index = self.index.write().map_err(|_| EventStoreError::poisoned())?;
        let committed = index.prepare(stream_id, stream_type, events, expected_version)?;
        index.commit(&committed);

        tracing::debug!(
            stream_id = %stream_id,
            stream_type,
            appended = committed.len(),
            version = index.stream_version(stream_id),
            "appended events"
        );

        Ok(committed)
    }

    fn read_stream(
        &self,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.read_stream(stream_id))
    }

    fn read_all(
        &self,
        from_position: u64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.read_all(from_position, limit))
    }

    fn read_by_stream(
        &self,
        stream_id: &StreamId,
        pagination: Pagination,
        cancel: &CancellationToken,
    ) -> Result<EventPage, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.read_by_stream(stream_id, pagination))
    }

    fn read_global_by_time(
        &self,
        range: TimeRange,
        event_type: Option<&str>,
        pagination: Pagination,
        cancel: &CancellationToken,
    ) -> Result<EventPage, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.read_global_by_time(range, event_type, pagination))
    }

    fn stream_version(
        &self,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<u64, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.stream_version(stream_id))
    }

    fn max_position(&self, cancel: &CancellationToken) -> Result<u64, EventStoreError> {
        cancel.check()?;
        let index = self.index.read().map_err(|_| EventStoreError::poisoned())?;
        Ok(index.max_position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use lineage_core::ErrorKind;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn stream(id: &str) -> StreamId {
        StreamId::new(id).unwrap()
    }

    fn event(event_type: &str) -> UncommittedEvent {
        UncommittedEvent::new(event_type, Utc::now(), json!({"n": 1}))
    }

    fn at(secs: i64, event_type: &str) -> UncommittedEvent {
        let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        UncommittedEvent::new(event_type, base + Duration::seconds(secs), json!({}))
    }

    #[test]
    fn sequential_appends_produce_contiguous_versions() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        let s = stream("person-1");

        store
            .append(&s, "person", vec![event("a")], ExpectedVersion::Any, &cancel)
            .unwrap();
        store
            .append(&s, "person", vec![event("b"), event("c")], ExpectedVersion::Exact(1), &cancel)
            .unwrap();
        store
            .append(&s, "person", vec![event("d")], ExpectedVersion::Exact(3), &cancel)
            .unwrap();

        assert_eq!(store.stream_version(&s, &cancel).unwrap(), 4);
        let versions: Vec<u64> = store
            .read_stream(&s, &cancel)
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn stale_expected_version_appends_nothing() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        let s = stream("person-1");
        store
            .append(&s, "person", vec![event("a")], ExpectedVersion::Any, &cancel)
            .unwrap();

        let err = store
            .append(&s, "person", vec![event("b"), event("c")], ExpectedVersion::Exact(0), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);
        assert_eq!(store.stream_version(&s, &cancel).unwrap(), 1);
        assert_eq!(store.max_position(&cancel).unwrap(), 1);
        assert_eq!(store.read_stream(&s, &cancel).unwrap().len(), 1);
    }

    #[test]
    fn missing_stream_reads_empty() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        assert!(store.read_stream(&stream("nobody"), &cancel).unwrap().is_empty());
        assert_eq!(store.stream_version(&stream("nobody"), &cancel).unwrap(), 0);
    }

    #[test]
    fn stream_type_is_fixed_by_first_append() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        let s = stream("x-1");
        store
            .append(&s, "person", vec![event("a")], ExpectedVersion::Any, &cancel)
            .unwrap();
        let err = store
            .append(&s, "family", vec![event("b")], ExpectedVersion::Any, &cancel)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::StreamTypeMismatch { .. }));
    }

    #[test]
    fn empty_batch_still_checks_version() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        let s = stream("x-1");
        assert!(store
            .append(&s, "person", vec![], ExpectedVersion::Exact(0), &cancel)
            .unwrap()
            .is_empty());
        assert!(store
            .append(&s, "person", vec![], ExpectedVersion::Exact(5), &cancel)
            .is_err());
    }

    #[test]
    fn cancelled_token_is_honoured_on_entry() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = store
            .append(&stream("a"), "person", vec![event("a")], ExpectedVersion::Any, &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(store.max_position(&CancellationToken::new()).unwrap(), 0);
    }

    #[test]
    fn timestamps_are_taken_from_events() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        let historical = at(0, "person.created");
        let when = historical.occurred_at;
        let stored = store
            .append(&stream("p"), "person", vec![historical], ExpectedVersion::Any, &cancel)
            .unwrap();
        assert_eq!(stored[0].occurred_at, when);
    }

    #[test]
    fn read_by_stream_pages() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        let s = stream("p");
        let batch = (0..5).map(|_| event("person.updated")).collect();
        store.append(&s, "person", batch, ExpectedVersion::Any, &cancel).unwrap();

        let page = store
            .read_by_stream(&s, Pagination::new(Some(2), Some(2)), &cancel)
            .unwrap();
        assert_eq!(page.total, 5);
        assert!(page.has_more);
        assert_eq!(page.events.iter().map(|e| e.version).collect::<Vec<_>>(), vec![3, 4]);

        let last = store
            .read_by_stream(&s, Pagination::new(Some(2), Some(4)), &cancel)
            .unwrap();
        assert!(!last.has_more);
        assert_eq!(last.events.len(), 1);
    }

    #[test]
    fn read_global_by_time_filters_and_orders() {
        let store = InMemoryEventStore::new();
        let cancel = CancellationToken::new();
        // Appended out of time order on purpose: backfill of older history.
        store
            .append(&stream("a"), "person", vec![at(30, "person.created")], ExpectedVersion::Any, &cancel)
            .unwrap();
        store
            .append(&stream("b"), "family", vec![at(10, "family.created")], ExpectedVersion::Any, &cancel)
            .unwrap();
        store
            .append(&stream("c"), "person", vec![at(20, "person.created"), at(90, "person.updated")], ExpectedVersion::Any, &cancel)
            .unwrap();

        let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let range = TimeRange::new(base, base + Duration::seconds(30)).unwrap();

        let all = store
            .read_global_by_time(range, None, Pagination::default(), &cancel)
            .unwrap();
        assert_eq!(all.total, 3);
        let ids: Vec<&str> = all.events.iter().map(|e| e.stream_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let persons = store
            .read_global_by_time(range, Some("person.created"), Pagination::new(Some(1), None), &cancel)
            .unwrap();
        assert_eq!(persons.total, 2);
        assert!(persons.has_more);
        assert_eq!(persons.events[0].stream_id.as_str(), "c");
    }

    #[test]
    fn concurrent_writers_on_one_stream_serialize() {
        let store = Arc::new(InMemoryEventStore::new());
        let s = stream("person-1");
        store
            .append(&s, "person", vec![event("a")], ExpectedVersion::Any, &CancellationToken::new())
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let s = s.clone();
                std::thread::spawn(move || {
                    store
                        .append(&s, "person", vec![event("b")], ExpectedVersion::Exact(1), &CancellationToken::new())
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.stream_version(&s, &CancellationToken::new()).unwrap(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 48,
            ..ProptestConfig::default()
        })]

        #[test]
        fn global_positions_are_unique_and_gap_free(
            batches in proptest::collection::vec((0usize..4, 1usize..4), 1..20),
            from in 0u64..30,
            limit in 0usize..30,
        ) {
            let store = InMemoryEventStore::new();
            let cancel = CancellationToken::new();
            let mut total = 0u64;
            for (stream_no, size) in &batches {
                let s = stream(&format!("s-{stream_no}"));
                let batch = (0..*size).map(|_| event("e")).collect();
                store.append(&s, "t", batch, ExpectedVersion::Any, &cancel).unwrap();
                total += *size as u64;
            }

            let all = store.read_all(0, usize::MAX, &cancel).unwrap();
            let positions: Vec<u64> = all.iter().map(|e| e.global_position).collect();
            prop_assert_eq!(positions, (1..=total).collect::<Vec<_>>());

            let page = store.read_all(from, limit, &cancel).unwrap();
            prop_assert!(page.len() <= limit);
            prop_assert!(page.iter().all(|e| e.global_position > from));
            for pair in page.windows(2) {
                prop_assert_eq!(pair[1].global_position, pair[0].global_position + 1);
            }
            if let Some(first) = page.first() {
                prop_assert_eq!(first.global_position, from + 1);
            }
        }
    }
}
