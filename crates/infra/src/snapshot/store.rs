use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lineage_core::{CancellationToken, Cancelled, ErrorKind, SnapshotId};

use crate::event_store::{EventStore, EventStoreError};

/// A named replay checkpoint: "read models were consistent up to `position`".
///
/// Snapshots never copy read-model state. Restoring from one means replaying
/// the log from `position` onwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub name: String,
    pub description: Option<String>,
    /// Global position captured; `0` means "before any event".
    pub position: u64,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        position: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            name: name.into(),
            description,
            position,
            created_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(SnapshotId),

    #[error("snapshot already exists: {0}")]
    Duplicate(SnapshotId),

    #[error("invalid snapshot: {0}")]
    InvalidInput(String),

    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("snapshot storage failure: {0}")]
    Storage(String),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::NotFound(_) => ErrorKind::NotFound,
            SnapshotError::Duplicate(_) => ErrorKind::ConcurrencyConflict,
            SnapshotError::InvalidInput(_) => ErrorKind::InvalidInput,
            SnapshotError::EventStore(e) => e.kind(),
            SnapshotError::Cancelled(_) => ErrorKind::Cancelled,
            SnapshotError::Storage(_) | SnapshotError::Io(_) | SnapshotError::Serialization(_) => {
                ErrorKind::Storage
            }
        }
    }

    pub(crate) fn poisoned() -> Self {
        SnapshotError::Storage("lock poisoned".to_string())
    }
}

/// Catalog of replay checkpoints.
pub trait SnapshotStore: Send + Sync {
    /// Record a checkpoint. Rejects a blank name, a position beyond the log's
    /// current position and an id already in the catalog.
    fn create(&self, snapshot: Snapshot, cancel: &CancellationToken) -> Result<Snapshot, SnapshotError>;

    fn get(&self, id: SnapshotId, cancel: &CancellationToken) -> Result<Snapshot, SnapshotError>;

    /// All checkpoints, newest `created_at` first.
    fn list(&self, cancel: &CancellationToken) -> Result<Vec<Snapshot>, SnapshotError>;

    fn delete(&self, id: SnapshotId, cancel: &CancellationToken) -> Result<(), SnapshotError>;

    /// The event log's current global position.
    fn max_position(&self, cancel: &CancellationToken) -> Result<u64, SnapshotError>;

    /// Checkpoint the log as it stands now.
    fn capture(
        &self,
        name: &str,
        description: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Snapshot, SnapshotError> {
        let position = self.max_position(cancel)?;
        self.create(Snapshot::new(name, description, position, Utc::now()), cancel)
    }
}

impl<S> SnapshotStore for Arc<S>
where
    S: SnapshotStore + ?Sized,
{
    fn create(&self, snapshot: Snapshot, cancel: &CancellationToken) -> Result<Snapshot, SnapshotError> {
        (**self).create(snapshot, cancel)
    }

    fn get(&self, id: SnapshotId, cancel: &CancellationToken) -> Result<Snapshot, SnapshotError> {
        (**self).get(id, cancel)
    }

    fn list(&self, cancel: &CancellationToken) -> Result<Vec<Snapshot>, SnapshotError> {
        (**self).list(cancel)
    }

    fn delete(&self, id: SnapshotId, cancel: &CancellationToken) -> Result<(), SnapshotError> {
        (**self).delete(id, cancel)
    }

    fn max_position(&self, cancel: &CancellationToken) -> Result<u64, SnapshotError> {
        (**self).max_position(cancel)
    }
}

/// Snapshot bookkeeping shared by the in-memory and file backends.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct SnapshotCatalog {
    snapshots: Vec<Snapshot>,
}

impl SnapshotCatalog {
    pub(crate) fn validate(&self, snapshot: &Snapshot, max_position: u64) -> Result<(), SnapshotError> {
        if snapshot.name.trim().is_empty() {
            return Err(SnapshotError::InvalidInput("name must not be blank".to_string()));
        }
        if snapshot.position > max_position {
            return Err(SnapshotError::InvalidInput(format!(
                "position {} is beyond the end of the log ({max_position})",
                snapshot.position
            )));
        }
        if self.snapshots.iter().any(|s| s.id == snapshot.id) {
            return Err(SnapshotError::Duplicate(snapshot.id));
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
    }

    pub(crate) fn get(&self, id: SnapshotId) -> Result<Snapshot, SnapshotError> {
        self.snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(SnapshotError::NotFound(id))
    }

    pub(crate) fn remove(&mut self, id: SnapshotId) -> Result<Snapshot, SnapshotError> {
        let idx = self
            .snapshots
            .iter()
            .position(|s| s.id == id)
            .ok_or(SnapshotError::NotFound(id))?;
        Ok(self.snapshots.remove(idx))
    }

    pub(crate) fn list(&self) -> Vec<Snapshot> {
        let mut all = self.snapshots.clone();
        // Insertion order breaks created_at ties: newest insert first.
        all.reverse();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

/// In-memory snapshot catalog over any event log.
#[derive(Debug)]
pub struct InMemorySnapshotStore<E> {
    events: E,
    catalog: RwLock<SnapshotCatalog>,
}

impl<E> InMemorySnapshotStore<E>
where
    E: EventStore,
{
    pub fn new(events: E) -> Self {
        Self {
            events,
            catalog: RwLock::new(SnapshotCatalog::default()),
        }
    }
}

impl<E> SnapshotStore for InMemorySnapshotStore<E>
where
    E: EventStore,
{
    fn create(&self, snapshot: Snapshot, cancel: &CancellationToken) -> Result<Snapshot, SnapshotError> {
        cancel.check()?;
        let max_position = self.events.max_position(cancel)?;

        let mut catalog = self.catalog.write().map_err(|_| SnapshotError::poisoned())?;
        catalog.validate(&snapshot, max_position)?;
        catalog.insert(snapshot.clone());

        tracing::info!(
            snapshot_id = %snapshot.id,
            name = %snapshot.name,
            position = snapshot.position,
            "created snapshot"
        );
        Ok(snapshot)
    }

    fn get(&self, id: SnapshotId, cancel: &CancellationToken) -> Result<Snapshot, SnapshotError> {
        cancel.check()?;
        let catalog = self.catalog.read().map_err(|_| SnapshotError::poisoned())?;
        catalog.get(id)
    }

    fn list(&self, cancel: &CancellationToken) -> Result<Vec<Snapshot>, SnapshotError> {
        cancel.check()?;
        let catalog = self.catalog.read().map_err(|_| SnapshotError::poisoned())?;
        Ok(catalog.list())
    }

    fn delete(&self, id: SnapshotId, cancel: &CancellationToken) -> Result<(), SnapshotError> {
        cancel.check()?;
        let mut catalog = self.catalog.write().map_err(|_| SnapshotError::poisoned())?;
        catalog.remove(id)?;
        tracing::info!(snapshot_id = %id, "deleted snapshot");
        Ok(())
    }

    fn max_position(&self, cancel: &CancellationToken) -> Result<u64, SnapshotError> {
        Ok(self.events.max_position(cancel)?)
    }
}
