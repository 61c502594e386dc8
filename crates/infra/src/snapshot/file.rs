//! Snapshot catalog persisted as one JSON document.
//!
//! Every mutation rewrites the whole catalog to a sibling temp file and
//! renames it over `snapshots.json`, so a crash leaves either the old or the
//! new catalog on disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use lineage_core::{CancellationToken, SnapshotId};

use super::store::{Snapshot, SnapshotCatalog, SnapshotError, SnapshotStore};
use crate::event_store::EventStore;

pub const SNAPSHOT_FILE: &str = "snapshots.json";

#[derive(Debug)]
pub struct FileSnapshotStore<E> {
    events: E,
    path: PathBuf,
    catalog: RwLock<SnapshotCatalog>,
}

impl<E> FileSnapshotStore<E>
where
    E: EventStore,
{
    pub fn open(events: E, data_dir: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(SNAPSHOT_FILE);

        let catalog = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SnapshotCatalog::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), "opened snapshot catalog");

        Ok(Self {
            events,
            path,
            catalog: RwLock::new(catalog),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, catalog: &SnapshotCatalog) -> Result<(), SnapshotError> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, catalog)?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl<E> SnapshotStore for FileSnapshotStore<E>
where
    E: EventStore,
{
    fn create(&self, snapshot: Snapshot, cancel: &CancellationToken) -> Result<Snapshot, SnapshotError> {
        cancel.check()?;
        let max_position = self.events.max_position(cancel)?;

        let mut catalog = self.catalog.write().map_err(|_| SnapshotError::poisoned())?;
        catalog.validate(&snapshot, max_position)?;
        catalog.insert(snapshot.clone());
        if let Err(e) = self.persist(&catalog) {
            // Keep memory in step with disk.
            catalog.remove(snapshot.id)?;
            return Err(e);
        }

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
        let removed = catalog.remove(id)?;
        if let Err(e) = self.persist(&catalog) {
            catalog.insert(removed);
            return Err(e);
        }
        tracing::info!(snapshot_id = %id, "deleted snapshot");
        Ok(())
    }

    fn max_position(&self, cancel: &CancellationToken) -> Result<u64, SnapshotError> {
        Ok(self.events.max_position(cancel)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{InMemoryEventStore, UncommittedEvent};
    use chrono::Utc;
    use lineage_core::{ErrorKind, ExpectedVersion, StreamId};
    use serde_json::json;
    use std::sync::Arc;

    fn events() -> Arc<InMemoryEventStore> {
        let events = Arc::new(InMemoryEventStore::new());
        events
            .append(
                &StreamId::new("family-1").unwrap(),
                "family",
                vec![UncommittedEvent::new("family.created", Utc::now(), json!({"fields": {}}))],
                ExpectedVersion::Exact(0),
                &CancellationToken::new(),
            )
            .unwrap();
        events
    }

    #[test]
    fn catalog_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let events = events();

        let (kept, dropped) = {
            let store = FileSnapshotStore::open(events.clone(), dir.path()).unwrap();
            let kept = store.capture("kept", None, &cancel).unwrap();
            let dropped = store.capture("dropped", Some("temp".into()), &cancel).unwrap();
            store.delete(dropped.id, &cancel).unwrap();
            (kept, dropped)
        };

        let reopened = FileSnapshotStore::open(events, dir.path()).unwrap();
        assert_eq!(reopened.get(kept.id, &cancel).unwrap(), kept);
        assert_eq!(
            reopened.get(dropped.id, &cancel).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(reopened.list(&cancel).unwrap().len(), 1);
    }

    #[test]
    fn rejected_create_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let store = FileSnapshotStore::open(events(), dir.path()).unwrap();
        store.capture("first", None, &cancel).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let ahead = Snapshot::new("ahead", None, 10, Utc::now());
        assert!(store.create(ahead, &cancel).is_err());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn unreadable_catalog_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), "[{").unwrap();
        let err = FileSnapshotStore::open(events(), dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
