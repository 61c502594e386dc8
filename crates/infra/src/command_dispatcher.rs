//! Command execution pipeline (application-level orchestration).
//!
//! The `CommandDispatcher` is the write path: it appends a batch of events
//! under optimistic concurrency and then synchronously projects every
//! committed event into the read models.
//!
//! ## Command Execution Flow
//!
//! ```text
//! events[] + expected version
//!   ↓
//! 1. Append to the stream (all-or-nothing, version checked)
//!   ↓
//! 2. Project each committed event at its assigned stream version
//!   ↓
//! 3. Return the stream's new version
//! ```
//!
//! ## Failure handling
//!
//! - A concurrency conflict is returned as-is: nothing was appended, nothing
//!   is projected and nothing is retried. The caller re-reads and resubmits.
//! - A projection failure after a successful append is logged and swallowed.
//!   The log is authoritative; a later replay repairs the read models.

use chrono::{DateTime, Utc};
use thiserror::Error;

use lineage_core::{CancellationToken, Cancelled, DomainError, ErrorKind, EventId, ExpectedVersion, StreamId};
use lineage_records::{EntityKind, RecordEvent};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::projections::Projector;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale expected version).
    #[error("concurrency conflict on '{stream_id}': expected {expected:?}, actual {actual}")]
    Concurrency {
        stream_id: StreamId,
        expected: ExpectedVersion,
        actual: u64,
    },

    /// The command itself was rejected before anything was appended.
    #[error("invalid command: {0}")]
    InvalidInput(String),

    /// Persisting to the event store failed.
    #[error("event store error: {0}")]
    Store(EventStoreError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Concurrency { .. } => ErrorKind::ConcurrencyConflict,
            DispatchError::InvalidInput(_) => ErrorKind::InvalidInput,
            DispatchError::Store(e) => e.kind(),
            DispatchError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency {
                stream_id,
                expected,
                actual,
            } => DispatchError::Concurrency {
                stream_id,
                expected,
                actual,
            },
            EventStoreError::Cancelled(c) => DispatchError::Cancelled(c),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        DispatchError::InvalidInput(value.to_string())
    }
}

/// Append-then-project coordinator.
///
/// ## Generic Parameters
///
/// - `S`: event store implementation
/// - `P`: projector fed with every committed event
///
/// Append and projection are not one transaction: if the process dies in
/// between, the events are durable and the read models lag until the next
/// replay.
#[derive(Debug)]
pub struct CommandDispatcher<S, P> {
    store: S,
    projector: P,
}

impl<S, P> CommandDispatcher<S, P> {
    pub fn new(store: S, projector: P) -> Self {
        Self { store, projector }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn projector(&self) -> &P {
        &self.projector
    }
}

impl<S, P> CommandDispatcher<S, P>
where
    S: EventStore,
    P: Projector,
{
    /// Append `events` to a stream and project them.
    ///
    /// Returns the stream version after the append. An empty batch still runs
    /// the version check and returns the current version.
    pub fn execute(
        &self,
        stream_id: &StreamId,
        stream_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cancel: &CancellationToken,
    ) -> Result<u64, DispatchError> {
        cancel.check()?;

        let committed = self
            .store
            .append(stream_id, stream_type, events, expected_version, cancel)?;

        let Some(last) = committed.last() else {
            return Ok(self.store.stream_version(stream_id, cancel)?);
        };
        let new_version = last.version;

        self.project_committed(&committed, cancel);

        tracing::debug!(
            stream_id = %stream_id,
            stream_type,
            appended = committed.len(),
            new_version,
            "executed command"
        );

        Ok(new_version)
    }

    /// Validate typed record events against `kind`'s schema, serialize them
    /// with `occurred_at` and execute them on the entity's stream.
    pub fn execute_record(
        &self,
        kind: EntityKind,
        entity_id: &StreamId,
        events: Vec<RecordEvent>,
        expected_version: ExpectedVersion,
        occurred_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<u64, DispatchError> {
        let mut uncommitted = Vec::with_capacity(events.len());
        for event in &events {
            if event.kind != kind {
                return Err(DispatchError::InvalidInput(format!(
                    "{} event cannot be appended to a {kind} stream",
                    event.kind
                )));
            }
            event.validate()?;
            uncommitted.push(UncommittedEvent::from_record(EventId::new(), occurred_at, event)?);
        }

        self.execute(entity_id, kind.as_str(), uncommitted, expected_version, cancel)
    }

    fn project_committed(&self, committed: &[StoredEvent], cancel: &CancellationToken) {
        for event in committed {
            if let Err(e) = self.projector.project(event, event.version, cancel) {
                tracing::warn!(
                    stream_id = %event.stream_id,
                    version = event.version,
                    global_position = event.global_position,
                    error = %e,
                    "projection failed after append; read model is behind the log"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::{ProjectionError, ProjectionOutcome, RecordProjector};
    use crate::read_model::{InMemoryReadModelStore, ReadModelError, ReadModelStore};
    use lineage_records::{FieldChanges, FieldValue};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, RecordProjector<Arc<InMemoryReadModelStore>>>;

    fn setup() -> (Dispatcher, Arc<InMemoryReadModelStore>) {
        let models = Arc::new(InMemoryReadModelStore::new());
        let dispatcher = CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            RecordProjector::new(models.clone()),
        );
        (dispatcher, models)
    }

    fn person() -> StreamId {
        StreamId::new("person-1").unwrap()
    }

    fn create_john() -> RecordEvent {
        RecordEvent::created(EntityKind::Person, FieldChanges::new().with("name", "John"))
    }

    #[test]
    fn execute_appends_and_projects() {
        let (dispatcher, models) = setup();
        let cancel = CancellationToken::new();

        let version = dispatcher
            .execute_record(
                EntityKind::Person,
                &person(),
                vec![
                    create_john(),
                    RecordEvent::updated(EntityKind::Person, FieldChanges::new().with("notes", "a")),
                ],
                ExpectedVersion::Exact(0),
                Utc::now(),
                &cancel,
            )
            .unwrap();
        assert_eq!(version, 2);

        let model = models.get(EntityKind::Person, &person(), &cancel).unwrap().unwrap();
        assert_eq!(model.version, 2);
        assert_eq!(model.field("notes"), Some(FieldValue::text("a")));
    }

    #[test]
    fn conflict_propagates_without_projection() {
        let (dispatcher, models) = setup();
        let cancel = CancellationToken::new();
        dispatcher
            .execute_record(EntityKind::Person, &person(), vec![create_john()], ExpectedVersion::Any, Utc::now(), &cancel)
            .unwrap();

        let err = dispatcher
            .execute_record(
                EntityKind::Person,
                &person(),
                vec![RecordEvent::updated(EntityKind::Person, FieldChanges::new().with("notes", "x"))],
                ExpectedVersion::Exact(0),
                Utc::now(),
                &cancel,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrencyConflict);

        let model = models.get(EntityKind::Person, &person(), &cancel).unwrap().unwrap();
        assert_eq!(model.version, 1);
        assert_eq!(model.field("notes"), Some(FieldValue::text("")));
    }

    #[test]
    fn empty_batch_reports_current_version() {
        let (dispatcher, _) = setup();
        let cancel = CancellationToken::new();
        dispatcher
            .execute_record(EntityKind::Person, &person(), vec![create_john()], ExpectedVersion::Any, Utc::now(), &cancel)
            .unwrap();

        let version = dispatcher
            .execute(&person(), "person", vec![], ExpectedVersion::Exact(1), &cancel)
            .unwrap();
        assert_eq!(version, 1);
        assert!(dispatcher
            .execute(&person(), "person", vec![], ExpectedVersion::Exact(5), &cancel)
            .is_err());
    }

    #[test]
    fn invalid_record_events_are_rejected_before_append() {
        let (dispatcher, _) = setup();
        let cancel = CancellationToken::new();

        let wrong_kind = RecordEvent::created(EntityKind::Family, FieldChanges::new());
        let err = dispatcher
            .execute_record(EntityKind::Person, &person(), vec![wrong_kind], ExpectedVersion::Any, Utc::now(), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let unknown_field = RecordEvent::created(EntityKind::Person, FieldChanges::new().with("colour", "red"));
        let err = dispatcher
            .execute_record(EntityKind::Person, &person(), vec![unknown_field], ExpectedVersion::Any, Utc::now(), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert_eq!(dispatcher.store().max_position(&cancel).unwrap(), 0);
    }

    #[derive(Default)]
    struct FailingProjector {
        calls: AtomicUsize,
    }

    impl Projector for FailingProjector {
        fn project(
            &self,
            _event: &StoredEvent,
            _target_version: u64,
            _cancel: &CancellationToken,
        ) -> Result<ProjectionOutcome, ProjectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ReadModelError::Storage("disk full".to_string()).into())
        }

        fn apply(&self, event: &StoredEvent, cancel: &CancellationToken) -> Result<ProjectionOutcome, ProjectionError> {
            self.project(event, event.version, cancel)
        }

        fn reset(&self, _cancel: &CancellationToken) -> Result<(), ProjectionError> {
            Ok(())
        }
    }

    #[test]
    fn projection_failure_is_swallowed() {
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), FailingProjector::default());
        let cancel = CancellationToken::new();

        let version = dispatcher
            .execute_record(
                EntityKind::Person,
                &person(),
                vec![
                    create_john(),
                    RecordEvent::updated(EntityKind::Person, FieldChanges::new().with("notes", "a")),
                ],
                ExpectedVersion::Exact(0),
                Utc::now(),
                &cancel,
            )
            .unwrap();

        assert_eq!(version, 2);
        assert_eq!(dispatcher.projector().calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.store().stream_version(&person(), &cancel).unwrap(), 2);
    }
}
