//! Entity rollback by compensating event.
//!
//! History is never rewritten. Rolling a record back to version `n` folds its
//! stream up to `n`, diffs that state against the current read model and
//! appends one `updated` event (tagged `rolled_back_to = n`) carrying the
//! fields that differ.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use lineage_core::{CancellationToken, Cancelled, ErrorKind, ExpectedVersion, StreamId};
use lineage_records::{DecodedEvent, EntityKind, FieldChanges, FieldMap, RecordEvent, RecordState};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::projections::Projector;
use crate::read_model::{ReadModelError, ReadModelStore};

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("invalid rollback request: {0}")]
    InvalidInput(String),

    #[error("entity not found: {0}")]
    NotFound(StreamId),

    #[error("entity '{0}' is deleted and cannot be rolled back")]
    EntityDeleted(StreamId),

    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("read model error: {0}")]
    ReadModel(#[from] ReadModelError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl RollbackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RollbackError::InvalidInput(_) | RollbackError::EntityDeleted(_) => ErrorKind::InvalidInput,
            RollbackError::NotFound(_) => ErrorKind::NotFound,
            RollbackError::EventStore(e) => e.kind(),
            RollbackError::ReadModel(e) => e.kind(),
            RollbackError::Dispatch(e) => e.kind(),
            RollbackError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Nothing appended: the target is the current version or nothing differs.
    NoOp { version: u64 },
    /// One compensating event appended at `version`.
    Applied {
        from_version: u64,
        version: u64,
        changes: FieldChanges,
    },
}

/// A stream loaded and checked against the requested entity kind.
struct EntityHistory {
    kind: EntityKind,
    events: Vec<DecodedEvent>,
}

impl EntityHistory {
    fn version(&self) -> u64 {
        self.events.len() as u64
    }

    fn state_at(&self, entity_id: &StreamId, version: u64) -> RecordState {
        let take = usize::try_from(version).unwrap_or(usize::MAX);
        RecordState::replay(entity_id.clone(), self.kind, self.events.iter().take(take))
    }
}

/// Computes and executes rollbacks through the normal write path.
#[derive(Debug)]
pub struct RollbackService<S, P, R> {
    dispatcher: Arc<CommandDispatcher<S, P>>,
    read_models: R,
}

impl<S, P, R> RollbackService<S, P, R>
where
    S: EventStore,
    P: Projector,
    R: ReadModelStore,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, P>>, read_models: R) -> Self {
        Self {
            dispatcher,
            read_models,
        }
    }

    /// Fields whose value at `target_version` differs from the entity's
    /// current read model, carrying their historical values.
    pub fn compute_rollback_changes(
        &self,
        entity_type: &str,
        entity_id: &StreamId,
        target_version: u64,
        cancel: &CancellationToken,
    ) -> Result<FieldChanges, RollbackError> {
        let history = self.load(entity_type, entity_id, cancel)?;
        check_target(target_version, history.version())?;
        self.diff(&history, entity_id, target_version, cancel)
    }

    /// Roll `entity_id` back to the field values it had at `target_version`.
    pub fn rollback(
        &self,
        entity_type: &str,
        entity_id: &StreamId,
        target_version: u64,
        cancel: &CancellationToken,
    ) -> Result<RollbackOutcome, RollbackError> {
        let history = self.load(entity_type, entity_id, cancel)?;
        let current = history.version();
        check_target(target_version, current)?;

        if target_version == current {
            return Ok(RollbackOutcome::NoOp { version: current });
        }

        if history.state_at(entity_id, current).is_deleted() {
            return Err(RollbackError::EntityDeleted(entity_id.clone()));
        }

        let changes = self.diff(&history, entity_id, target_version, cancel)?;
        if changes.is_empty() {
            tracing::info!(
                entity_id = %entity_id,
                target_version,
                "rollback found no differing fields"
            );
            return Ok(RollbackOutcome::NoOp { version: current });
        }

        let event = RecordEvent::rollback(history.kind, changes.clone(), target_version);
        let version = self.dispatcher.execute_record(
            history.kind,
            entity_id,
            vec![event],
            ExpectedVersion::Exact(current),
            Utc::now(),
            cancel,
        )?;

        tracing::info!(
            entity_id = %entity_id,
            kind = %history.kind,
            target_version,
            from_version = current,
            new_version = version,
            fields = changes.len(),
            "rolled back entity"
        );

        Ok(RollbackOutcome::Applied {
            from_version: current,
            version,
            changes,
        })
    }

    fn load(
        &self,
        entity_type: &str,
        entity_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<EntityHistory, RollbackError> {
        cancel.check()?;
        let kind: EntityKind = entity_type
            .parse()
            .map_err(|_| RollbackError::InvalidInput(format!("unknown entity type '{entity_type}'")))?;

        let stored = self.dispatcher.store().read_stream(entity_id, cancel)?;
        let Some(first) = stored.first() else {
            return Err(RollbackError::NotFound(entity_id.clone()));
        };
        if first.stream_type != kind.as_str() {
            return Err(RollbackError::InvalidInput(format!(
                "entity '{entity_id}' is a {}, not a {kind}",
                first.stream_type
            )));
        }

        Ok(EntityHistory {
            kind,
            events: stored.iter().map(decode_lenient).collect(),
        })
    }

    fn diff(
        &self,
        history: &EntityHistory,
        entity_id: &StreamId,
        target_version: u64,
        cancel: &CancellationToken,
    ) -> Result<FieldChanges, RollbackError> {
        let historical = history.state_at(entity_id, target_version);
        let current = self.current_fields(history, entity_id, cancel)?;
        Ok(historical.changes_to_restore(&current))
    }

    /// Current field values: the read model when it reflects the stream's
    /// head, otherwise the folded log.
    fn current_fields(
        &self,
        history: &EntityHistory,
        entity_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<FieldMap, RollbackError> {
        match self.read_models.get(history.kind, entity_id, cancel)? {
            Some(model) if model.version == history.version() => Ok(model.fields),
            stale => {
                if let Some(model) = stale {
                    tracing::debug!(
                        entity_id = %entity_id,
                        model_version = model.version,
                        stream_version = history.version(),
                        "read model is not at the stream head; diffing against the log"
                    );
                }
                Ok(history.state_at(entity_id, history.version()).fields().clone())
            }
        }
    }
}

fn check_target(target_version: u64, current: u64) -> Result<(), RollbackError> {
    if target_version == 0 || target_version > current {
        return Err(RollbackError::InvalidInput(format!(
            "target version must be between 1 and {current}, got {target_version}"
        )));
    }
    Ok(())
}

/// Malformed history counts towards the version but changes nothing.
fn decode_lenient(event: &StoredEvent) -> DecodedEvent {
    DecodedEvent::decode(&event.event_type, &event.payload).unwrap_or_else(|e| {
        tracing::warn!(
            stream_id = %event.stream_id,
            version = event.version,
            error = %e,
            "ignoring undecodable event during rollback fold"
        );
        DecodedEvent::Unknown {
            event_type: event.event_type.clone(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::projections::RecordProjector;
    use crate::read_model::InMemoryReadModelStore;
    use lineage_records::FieldValue;

    type Service = RollbackService<
        Arc<InMemoryEventStore>,
        RecordProjector<Arc<InMemoryReadModelStore>>,
        Arc<InMemoryReadModelStore>,
    >;

    fn setup() -> (Service, Arc<InMemoryReadModelStore>) {
        let models = Arc::new(InMemoryReadModelStore::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            RecordProjector::new(models.clone()),
        ));
        (RollbackService::new(dispatcher, models.clone()), models)
    }

    fn person() -> StreamId {
        StreamId::new("person-1").unwrap()
    }

    fn write(service: &Service, events: Vec<RecordEvent>) -> u64 {
        service
            .dispatcher
            .execute_record(
                EntityKind::Person,
                &person(),
                events,
                ExpectedVersion::Any,
                Utc::now(),
                &CancellationToken::new(),
            )
            .unwrap()
    }

    fn seed(service: &Service) {
        write(
            service,
            vec![
                RecordEvent::created(EntityKind::Person, FieldChanges::new().with("name", "John")),
                RecordEvent::updated(EntityKind::Person, FieldChanges::new().with("notes", "a")),
                RecordEvent::updated(EntityKind::Person, FieldChanges::new().with("notes", "b")),
            ],
        );
    }

    #[test]
    fn rollback_restores_historical_values() {
        let (service, models) = setup();
        seed(&service);
        let cancel = CancellationToken::new();

        let changes = service
            .compute_rollback_changes("person", &person(), 1, &cancel)
            .unwrap();
        assert_eq!(changes, FieldChanges::new().with("notes", ""));

        let outcome = service.rollback("person", &person(), 1, &cancel).unwrap();
        assert_eq!(
            outcome,
            RollbackOutcome::Applied {
                from_version: 3,
                version: 4,
                changes: FieldChanges::new().with("notes", ""),
            }
        );

        let model = models.get(EntityKind::Person, &person(), &cancel).unwrap().unwrap();
        assert_eq!(model.version, 4);
        assert_eq!(model.field("notes"), Some(FieldValue::text("")));
        assert_eq!(model.field("name"), Some(FieldValue::text("John")));

        // Recomputing against the rolled-back model finds nothing left to restore.
        assert!(service
            .compute_rollback_changes("person", &person(), 1, &cancel)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn target_equal_to_current_is_a_noop() {
        let (service, _) = setup();
        seed(&service);
        assert_eq!(
            service.rollback("person", &person(), 3, &CancellationToken::new()).unwrap(),
            RollbackOutcome::NoOp { version: 3 }
        );
    }

    #[test]
    fn out_of_range_targets_are_invalid() {
        let (service, _) = setup();
        seed(&service);
        let cancel = CancellationToken::new();
        for target in [0, 4, 100] {
            let err = service.rollback("person", &person(), target, &cancel).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "target {target}");
        }
    }

    #[test]
    fn deleted_entities_are_refused() {
        let (service, _) = setup();
        seed(&service);
        write(&service, vec![RecordEvent::deleted(EntityKind::Person, None)]);
        let err = service
            .rollback("person", &person(), 2, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, RollbackError::EntityDeleted(_)));
    }

    #[test]
    fn identical_state_is_a_noop() {
        let (service, _) = setup();
        write(
            &service,
            vec![
                RecordEvent::created(EntityKind::Person, FieldChanges::new().with("name", "John")),
                RecordEvent::updated(EntityKind::Person, FieldChanges::new().with("name", "Jack")),
                RecordEvent::updated(EntityKind::Person, FieldChanges::new().with("name", "John")),
            ],
        );
        assert_eq!(
            service.rollback("person", &person(), 1, &CancellationToken::new()).unwrap(),
            RollbackOutcome::NoOp { version: 3 }
        );
    }

    #[test]
    fn entity_type_must_match_the_stream() {
        let (service, _) = setup();
        seed(&service);
        let cancel = CancellationToken::new();

        let err = service.rollback("family", &person(), 1, &cancel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = service.rollback("spaceship", &person(), 1, &cancel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_stream_is_not_found() {
        let (service, _) = setup();
        let err = service
            .rollback("person", &StreamId::new("person-404").unwrap(), 1, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn lagging_read_model_falls_back_to_the_log() {
        let (service, models) = setup();
        seed(&service);
        models.clear_all(&CancellationToken::new()).unwrap();

        let changes = service
            .compute_rollback_changes("person", &person(), 2, &CancellationToken::new())
            .unwrap();
        assert_eq!(changes, FieldChanges::new().with("notes", "a"));
    }

    #[test]
    fn stale_read_model_is_not_used_as_the_baseline() {
        let (service, models) = setup();
        seed(&service);
        let cancel = CancellationToken::new();

        // Pin the model at version 2, as if the projection of v3 had failed.
        let mut stale = models.get(EntityKind::Person, &person(), &cancel).unwrap().unwrap();
        stale.version = 2;
        stale.fields.insert("notes".into(), FieldValue::text("a"));
        models.save(stale, &cancel).unwrap();

        // The log says notes = "b"; rolling back to v2 must restore "a".
        let changes = service
            .compute_rollback_changes("person", &person(), 2, &cancel)
            .unwrap();
        assert_eq!(changes, FieldChanges::new().with("notes", "a"));

        let outcome = service.rollback("person", &person(), 2, &cancel).unwrap();
        assert!(matches!(outcome, RollbackOutcome::Applied { from_version: 3, version: 4, .. }));
    }

    #[test]
    fn cancelled_rollback_appends_nothing() {
        let (service, _) = setup();
        seed(&service);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service.rollback("person", &person(), 1, &cancel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(
            service
                .dispatcher
                .store()
                .stream_version(&person(), &CancellationToken::new())
                .unwrap(),
            3
        );
    }
}
