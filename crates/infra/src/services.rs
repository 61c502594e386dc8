//! Explicit wiring of the persistence core.
//!
//! Every component is built once from a [`CoreConfig`] and handed out as an
//! `Arc`; nothing in the crate reaches for global state.

use std::sync::Arc;

use lineage_core::CancellationToken;

use crate::command_dispatcher::CommandDispatcher;
use crate::config::{ConfigError, CoreConfig, StorageBackend};
use crate::event_store::{EventStore, FileEventStore, FileEventStoreConfig, InMemoryEventStore};
use crate::projections::{replay, RecordProjector, ReplayError, ReplayOptions, ReplayReport};
use crate::read_model::InMemoryReadModelStore;
use crate::rollback::RollbackService;
use crate::snapshot::{FileSnapshotStore, InMemorySnapshotStore, Snapshot, SnapshotStore};

/// Event store selected at runtime by [`StorageBackend`].
pub type SharedEventStore = Arc<dyn EventStore>;
pub type SharedReadModels = Arc<InMemoryReadModelStore>;
pub type CoreProjector = Arc<RecordProjector<SharedReadModels>>;
pub type CoreDispatcher = CommandDispatcher<SharedEventStore, CoreProjector>;
pub type CoreRollback = RollbackService<SharedEventStore, CoreProjector, SharedReadModels>;

#[derive(Clone)]
pub struct CoreServices {
    pub event_store: SharedEventStore,
    pub read_models: SharedReadModels,
    pub projector: CoreProjector,
    pub dispatcher: Arc<CoreDispatcher>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub rollback: Arc<CoreRollback>,
    replay_page_size: usize,
}

impl core::fmt::Debug for CoreServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CoreServices")
            .field("replay_page_size", &self.replay_page_size)
            .finish_non_exhaustive()
    }
}

impl CoreServices {
    /// Open every store described by `config`.
    ///
    /// Read models always start empty; call [`CoreServices::rebuild`] after
    /// opening a file-backed log to bring them up to date.
    pub fn open(config: &CoreConfig) -> Result<Self, ConfigError> {
        if config.replay_page_size == 0 {
            return Err(ConfigError::Invalid {
                key: crate::config::ENV_REPLAY_PAGE_SIZE,
                value: "0".to_string(),
                reason: "expected a positive integer".to_string(),
            });
        }

        let (event_store, snapshots): (SharedEventStore, Arc<dyn SnapshotStore>) = match config.storage {
            StorageBackend::Memory => {
                let events: SharedEventStore = Arc::new(InMemoryEventStore::new());
                let snapshots: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new(events.clone()));
                (events, snapshots)
            }
            StorageBackend::File => {
                let events: SharedEventStore = Arc::new(FileEventStore::open(FileEventStoreConfig {
                    data_dir: config.data_dir.clone(),
                    fsync: config.fsync,
                })?);
                let snapshots: Arc<dyn SnapshotStore> =
                    Arc::new(FileSnapshotStore::open(events.clone(), &config.data_dir)?);
                (events, snapshots)
            }
        };

        let read_models = Arc::new(InMemoryReadModelStore::new());
        let projector = Arc::new(RecordProjector::new(read_models.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(event_store.clone(), projector.clone()));
        let rollback = Arc::new(RollbackService::new(dispatcher.clone(), read_models.clone()));

        tracing::info!(
            storage = ?config.storage,
            data_dir = %config.data_dir.display(),
            "opened persistence core"
        );

        Ok(Self {
            event_store,
            read_models,
            projector,
            dispatcher,
            snapshots,
            rollback,
            replay_page_size: config.replay_page_size,
        })
    }

    /// Full rebuild of the read models from position 0.
    pub fn rebuild(&self, cancel: &CancellationToken) -> Result<ReplayReport, ReplayError> {
        let options = ReplayOptions::full().with_page_size(self.replay_page_size);
        replay(&self.event_store, &self.projector, options, cancel)
    }

    /// Catch the read models up from a snapshot's checkpoint.
    pub fn replay_from(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<ReplayReport, ReplayError> {
        let options = ReplayOptions::from_snapshot(snapshot).with_page_size(self.replay_page_size);
        replay(&self.event_store, &self.projector, options, cancel)
    }
}
