//! The projector seam used by the write path and by replay.

use thiserror::Error;

use lineage_core::{CancellationToken, Cancelled, ErrorKind};

use crate::event_store::StoredEvent;
use crate::read_model::ReadModelError;

/// Why an event did not change any read model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Event-type label outside the record schema.
    UnknownEventType(String),
    /// Known label, undecodable payload.
    Malformed(String),
    /// Event kind does not match the stream's type label.
    StreamTypeMismatch { stream_type: String, event_type: String },
    /// Update for a record that was never created or has been deleted.
    NoLiveRecord { event_type: String },
}

/// Result of projecting one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// The read model now reflects `version`.
    Applied { version: u64 },
    /// The model already reflects `stored_version >= target`; nothing changed.
    AlreadyApplied { stored_version: u64 },
    /// Recorded and skipped; not an error.
    Skipped(SkipReason),
}

/// Projection failures. Only storage and cancellation are errors: decode
/// problems are reported as [`ProjectionOutcome::Skipped`].
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Store(#[from] ReadModelError),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ProjectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProjectionError::Store(e) => e.kind(),
            ProjectionError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

/// Turns stored events into read-model mutations.
///
/// Implementations must be **idempotent by version**: projecting an event at
/// a target version at or below what a model already reflects is a no-op, so
/// replaying any prefix of the log never regresses a newer model.
pub trait Projector: Send + Sync {
    /// Project `event` and stamp the affected model with `target_version`.
    fn project(
        &self,
        event: &StoredEvent,
        target_version: u64,
        cancel: &CancellationToken,
    ) -> Result<ProjectionOutcome, ProjectionError>;

    /// Project `event` at the stream's current projected version + 1.
    fn apply(
        &self,
        event: &StoredEvent,
        cancel: &CancellationToken,
    ) -> Result<ProjectionOutcome, ProjectionError>;

    /// Discard every read model and cursor before a rebuild from position 0.
    fn reset(&self, cancel: &CancellationToken) -> Result<(), ProjectionError>;
}

impl<P> Projector for std::sync::Arc<P>
where
    P: Projector + ?Sized,
{
    fn project(
        &self,
        event: &StoredEvent,
        target_version: u64,
        cancel: &CancellationToken,
    ) -> Result<ProjectionOutcome, ProjectionError> {
        (**self).project(event, target_version, cancel)
    }

    fn apply(
        &self,
        event: &StoredEvent,
        cancel: &CancellationToken,
    ) -> Result<ProjectionOutcome, ProjectionError> {
        (**self).apply(event, cancel)
    }

    fn reset(&self, cancel: &CancellationToken) -> Result<(), ProjectionError> {
        (**self).reset(cancel)
    }
}
