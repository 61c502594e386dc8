//! Projection cursor persistence.
//!
//! A cursor remembers the last stream version the projector has handled per
//! stream. It outlives the read model itself: once a deletion is projected the
//! model is gone, but its cursor still stops an older `Created` from bringing
//! it back during replay.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lineage_core::StreamId;

use crate::read_model::ReadModelError;

/// Projection cursor store for per-stream versions.
pub trait ProjectionCursorStore: Send + Sync {
    /// Last handled version for a stream.
    fn get_cursor(&self, stream_id: &StreamId) -> Result<Option<u64>, ReadModelError>;

    /// Move the cursor forward. Never moves it backwards.
    fn update_cursor(&self, stream_id: &StreamId, version: u64) -> Result<(), ReadModelError>;

    /// Forget every cursor (full rebuild).
    fn clear_cursors(&self) -> Result<(), ReadModelError>;
}

impl<C> ProjectionCursorStore for Arc<C>
where
    C: ProjectionCursorStore + ?Sized,
{
    fn get_cursor(&self, stream_id: &StreamId) -> Result<Option<u64>, ReadModelError> {
        (**self).get_cursor(stream_id)
    }

    fn update_cursor(&self, stream_id: &StreamId, version: u64) -> Result<(), ReadModelError> {
        (**self).update_cursor(stream_id, version)
    }

    fn clear_cursors(&self) -> Result<(), ReadModelError> {
        (**self).clear_cursors()
    }
}

/// In-memory cursor store.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<StreamId, u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> ReadModelError {
    ReadModelError::Storage("cursor lock poisoned".to_string())
}

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(&self, stream_id: &StreamId) -> Result<Option<u64>, ReadModelError> {
        let cursors = self.cursors.read().map_err(|_| poisoned())?;
        Ok(cursors.get(stream_id).copied())
    }

    fn update_cursor(&self, stream_id: &StreamId, version: u64) -> Result<(), ReadModelError> {
        let mut cursors = self.cursors.write().map_err(|_| poisoned())?;
        let cursor = cursors.entry(stream_id.clone()).or_insert(0);
        *cursor = (*cursor).max(version);
        Ok(())
    }

    fn clear_cursors(&self) -> Result<(), ReadModelError> {
        let mut cursors = self.cursors.write().map_err(|_| poisoned())?;
        cursors.clear();
        Ok(())
    }
}
