use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use lineage_core::{CancellationToken, Cancelled, ErrorKind, StreamId};
use lineage_records::EntityKind;

use super::record::RecordReadModel;

#[derive(Debug, Error)]
pub enum ReadModelError {
    #[error("read model storage failure: {0}")]
    Storage(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ReadModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadModelError::Storage(_) => ErrorKind::Storage,
            ReadModelError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    fn poisoned() -> Self {
        ReadModelError::Storage("lock poisoned".to_string())
    }
}

/// Per-entity-kind key/value store for disposable read models.
///
/// - `save` is an idempotent upsert keyed by `(kind, entity_id)`
/// - `delete` is idempotent
/// - returned values are copies; callers cannot reach internal state
/// - every method checks `cancel` before touching storage
pub trait ReadModelStore: Send + Sync {
    fn get(
        &self,
        kind: EntityKind,
        entity_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<Option<RecordReadModel>, ReadModelError>;

    fn save(&self, model: RecordReadModel, cancel: &CancellationToken) -> Result<(), ReadModelError>;

    fn delete(
        &self,
        kind: EntityKind,
        entity_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<(), ReadModelError>;

    /// All models of one kind, ordered by entity id.
    fn list(&self, kind: EntityKind, cancel: &CancellationToken) -> Result<Vec<RecordReadModel>, ReadModelError>;

    /// Drop every model of one kind (rebuild support).
    fn clear(&self, kind: EntityKind, cancel: &CancellationToken) -> Result<(), ReadModelError>;

    /// Drop every model (full rebuild support).
    fn clear_all(&self, cancel: &CancellationToken) -> Result<(), ReadModelError>;
}

impl<S> ReadModelStore for Arc<S>
where
    S: ReadModelStore + ?Sized,
{
    fn get(
        &self,
        kind: EntityKind,
        entity_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<Option<RecordReadModel>, ReadModelError> {
        (**self).get(kind, entity_id, cancel)
    }

    fn save(&self, model: RecordReadModel, cancel: &CancellationToken) -> Result<(), ReadModelError> {
        (**self).save(model, cancel)
    }

    fn delete(
        &self,
        kind: EntityKind,
        entity_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<(), ReadModelError> {
        (**self).delete(kind, entity_id, cancel)
    }

    fn list(&self, kind: EntityKind, cancel: &CancellationToken) -> Result<Vec<RecordReadModel>, ReadModelError> {
        (**self).list(kind, cancel)
    }

    fn clear(&self, kind: EntityKind, cancel: &CancellationToken) -> Result<(), ReadModelError> {
        (**self).clear(kind, cancel)
    }

    fn clear_all(&self, cancel: &CancellationToken) -> Result<(), ReadModelError> {
        (**self).clear_all(cancel)
    }
}

/// In-memory read model store, partitioned by entity kind.
#[derive(Debug, Default)]
pub struct InMemoryReadModelStore {
    inner: RwLock<HashMap<EntityKind, BTreeMap<StreamId, RecordReadModel>>>,
}

impl InMemoryReadModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadModelStore for InMemoryReadModelStore {
    fn get(
        &self,
        kind: EntityKind,
        entity_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<Option<RecordReadModel>, ReadModelError> {
        cancel.check()?;
        let map = self.inner.read().map_err(|_| ReadModelError::poisoned())?;
        Ok(map.get(&kind).and_then(|models| models.get(entity_id)).cloned())
    }

    fn save(&self, model: RecordReadModel, cancel: &CancellationToken) -> Result<(), ReadModelError> {
        cancel.check()?;
        let mut map = self.inner.write().map_err(|_| ReadModelError::poisoned())?;
        map.entry(model.kind)
            .or_default()
            .insert(model.entity_id.clone(), model);
        Ok(())
    }

    fn delete(
        &self,
        kind: EntityKind,
        entity_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<(), ReadModelError> {
        cancel.check()?;
        let mut map = self.inner.write().map_err(|_| ReadModelError::poisoned())?;
        if let Some(models) = map.get_mut(&kind) {
            models.remove(entity_id);
        }
        Ok(())
    }

    fn list(&self, kind: EntityKind, cancel: &CancellationToken) -> Result<Vec<RecordReadModel>, ReadModelError> {
        cancel.check()?;
        let map = self.inner.read().map_err(|_| ReadModelError::poisoned())?;
        Ok(map
            .get(&kind)
            .map(|models| models.values().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self, kind: EntityKind, cancel: &CancellationToken) -> Result<(), ReadModelError> {
        cancel.check()?;
        let mut map = self.inner.write().map_err(|_| ReadModelError::poisoned())?;
        map.remove(&kind);
        Ok(())
    }

    fn clear_all(&self, cancel: &CancellationToken) -> Result<(), ReadModelError> {
        cancel.check()?;
        let mut map = self.inner.write().map_err(|_| ReadModelError::poisoned())?;
        map.clear();
        Ok(())
    }
}
