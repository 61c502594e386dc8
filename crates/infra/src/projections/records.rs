use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use lineage_core::{CancellationToken, StreamId};
use lineage_events::EventEnvelope;
use lineage_records::{DecodedEvent, EntityKind, RecordChange, RecordEvent};

use crate::event_store::StoredEvent;
use crate::projections::cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
use crate::projections::projector::{ProjectionError, ProjectionOutcome, Projector, SkipReason};
use crate::read_model::{ReadModelError, ReadModelStore, RecordReadModel};

/// Record projection.
///
/// Decodes stored record events and maintains one [`RecordReadModel`] per
/// entity in a [`ReadModelStore`].
///
/// - Idempotent by version: targets at or below the stored version are ignored
/// - Unknown and malformed events are counted, logged and skipped
/// - Only `created` builds a model; updates to a missing record are skipped
/// - Deletions remove the model; the cursor keeps its version
///
/// The version check, the model write and the cursor update run under one
/// lock, so concurrent writers on a stream cannot regress its model.
#[derive(Debug)]
pub struct RecordProjector<S, C = InMemoryCursorStore>
where
    S: ReadModelStore,
    C: ProjectionCursorStore,
{
    store: S,
    cursors: C,
    apply_lock: Mutex<()>,
    skipped: AtomicU64,
}

impl<S> RecordProjector<S>
where
    S: ReadModelStore,
{
    /// Create a projector with in-memory cursor tracking.
    pub fn new(store: S) -> Self {
        Self::with_cursors(store, InMemoryCursorStore::new())
    }
}

impl<S, C> RecordProjector<S, C>
where
    S: ReadModelStore,
    C: ProjectionCursorStore,
{
    pub fn with_cursors(store: S, cursors: C) -> Self {
        Self {
            store,
            cursors,
            apply_lock: Mutex::new(()),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of events skipped since creation: unknown, malformed,
    /// mismatched, or aimed at a record with no live model.
    pub fn skipped_events(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, ProjectionError> {
        self.apply_lock
            .lock()
            .map_err(|_| ReadModelError::Storage("projection lock poisoned".to_string()).into())
    }

    /// Highest version handled for a stream: its cursor or, if a model was
    /// loaded from elsewhere, the model's own stamp.
    fn current_version(
        &self,
        stream_id: &StreamId,
        existing: Option<&RecordReadModel>,
    ) -> Result<u64, ProjectionError> {
        let cursor = self.cursors.get_cursor(stream_id)?.unwrap_or(0);
        Ok(cursor.max(existing.map(|m| m.version).unwrap_or(0)))
    }

    fn skip(
        &self,
        event: &StoredEvent,
        target_version: u64,
        reason: SkipReason,
    ) -> Result<ProjectionOutcome, ProjectionError> {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            stream_id = %event.stream_id,
            event_type = %event.event_type,
            global_position = event.global_position,
            reason = ?reason,
            "skipping event during projection"
        );
        // Keep the stream's cursor aligned with the log so `apply` stays in step.
        self.cursors.update_cursor(&event.stream_id, target_version)?;
        Ok(ProjectionOutcome::Skipped(reason))
    }

    fn decode(&self, event: &StoredEvent) -> Result<EventEnvelope<RecordEvent>, SkipReason> {
        let decoded = DecodedEvent::decode(&event.event_type, &event.payload)
            .map_err(|e| SkipReason::Malformed(e.to_string()))?;

        let record = match decoded {
            DecodedEvent::Record(record) => record,
            DecodedEvent::Unknown { event_type } => return Err(SkipReason::UnknownEventType(event_type)),
        };

        if record.kind.as_str() != event.stream_type {
            return Err(SkipReason::StreamTypeMismatch {
                stream_type: event.stream_type.clone(),
                event_type: event.event_type.clone(),
            });
        }

        Ok(event.to_envelope(record))
    }

    /// Write the effect of `envelope` onto `existing`. Returns `false` when
    /// the event has no model to act on.
    fn mutate(
        &self,
        envelope: EventEnvelope<RecordEvent>,
        existing: Option<RecordReadModel>,
        target_version: u64,
        cancel: &CancellationToken,
    ) -> Result<bool, ProjectionError> {
        let stream_id = envelope.stream_id().clone();
        let occurred_at = envelope.occurred_at();
        let RecordEvent { kind, change } = envelope.into_payload();

        let mut model = match (change, existing) {
            (RecordChange::Created { fields }, _) => {
                let mut model = RecordReadModel::new(stream_id, kind, occurred_at);
                merge(&mut model, kind, fields);
                model
            }
            (RecordChange::Updated { changes, .. }, Some(mut model)) => {
                merge(&mut model, kind, changes);
                model
            }
            (RecordChange::Updated { .. }, None) => return Ok(false),
            (RecordChange::Deleted { .. }, _) => {
                self.store.delete(kind, &stream_id, cancel)?;
                return Ok(true);
            }
        };

        model.version = target_version;
        model.updated_at = occurred_at;
        self.store.save(model, cancel)?;
        Ok(true)
    }

    /// Body of `project`; the caller holds `apply_lock`.
    fn project_locked(
        &self,
        event: &StoredEvent,
        target_version: u64,
        cancel: &CancellationToken,
    ) -> Result<ProjectionOutcome, ProjectionError> {
        let envelope = match self.decode(event) {
            Ok(envelope) => envelope,
            Err(reason) => {
                let current = self.current_version(&event.stream_id, None)?;
                if target_version <= current {
                    return Ok(ProjectionOutcome::AlreadyApplied { stored_version: current });
                }
                return self.skip(event, target_version, reason);
            }
        };

        let existing = self
            .store
            .get(envelope.payload().kind, envelope.stream_id(), cancel)?;
        let current = self.current_version(&event.stream_id, existing.as_ref())?;
        if target_version <= current {
            tracing::debug!(
                stream_id = %event.stream_id,
                target_version,
                stored_version = current,
                "event already projected"
            );
            return Ok(ProjectionOutcome::AlreadyApplied { stored_version: current });
        }

        if !self.mutate(envelope, existing, target_version, cancel)? {
            let reason = SkipReason::NoLiveRecord {
                event_type: event.event_type.clone(),
            };
            return self.skip(event, target_version, reason);
        }
        self.cursors.update_cursor(&event.stream_id, target_version)?;

        tracing::debug!(
            stream_id = %event.stream_id,
            event_type = %event.event_type,
            version = target_version,
            "projected event"
        );

        Ok(ProjectionOutcome::Applied { version: target_version })
    }
}

fn merge(model: &mut RecordReadModel, kind: EntityKind, changes: lineage_records::FieldChanges) {
    for (name, value) in changes {
        if let Some(spec) = kind.field(&name) {
            model.fields.insert(name, spec.ty.normalize(value));
        }
    }
}

fn stream_kind(event: &StoredEvent) -> Option<EntityKind> {
    event.stream_type.parse().ok()
}

impl<S, C> Projector for RecordProjector<S, C>
where
    S: ReadModelStore,
    C: ProjectionCursorStore,
{
    fn project(
        &self,
        event: &StoredEvent,
        target_version: u64,
        cancel: &CancellationToken,
    ) -> Result<ProjectionOutcome, ProjectionError> {
        cancel.check()?;
        let _guard = self.lock()?;
        self.project_locked(event, target_version, cancel)
    }

    fn apply(
        &self,
        event: &StoredEvent,
        cancel: &CancellationToken,
    ) -> Result<ProjectionOutcome, ProjectionError> {
        cancel.check()?;
        let _guard = self.lock()?;

        let existing = match stream_kind(event) {
            Some(kind) => self.store.get(kind, &event.stream_id, cancel)?,
            None => None,
        };
        let target = self.current_version(&event.stream_id, existing.as_ref())? + 1;
        self.project_locked(event, target, cancel)
    }

    fn reset(&self, cancel: &CancellationToken) -> Result<(), ProjectionError> {
        cancel.check()?;
        let _guard = self.lock()?;
        self.store.clear_all(cancel)?;
        self.cursors.clear_cursors()?;
        Ok(())
    }
}
