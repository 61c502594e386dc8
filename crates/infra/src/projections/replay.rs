//! Projection replay tooling for rebuilding read models from the event log.
//!
//! A replay pages through `read_all` in global-position order and feeds every
//! event through a [`Projector`] at the event's own stream version. Because
//! projection is idempotent by version, replaying from any checkpoint at or
//! below what the read models already reflect is safe.

use thiserror::Error;

use lineage_core::{CancellationToken, Cancelled, ErrorKind};

use crate::event_store::{EventStore, EventStoreError};
use crate::projections::projector::{ProjectionError, ProjectionOutcome, Projector};
use crate::snapshot::Snapshot;

/// Default number of events fetched per `read_all` page.
pub const DEFAULT_REPLAY_PAGE_SIZE: usize = 500;

/// Error type for projection replay operations.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("invalid replay request: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ReplayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplayError::EventStore(e) => e.kind(),
            ReplayError::Projection(e) => e.kind(),
            ReplayError::InvalidInput(_) => ErrorKind::InvalidInput,
            ReplayError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

/// Where a replay starts and how it pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Replay events strictly after this position. `0` is a full rebuild and
    /// resets the projector first.
    pub from_position: u64,
    pub page_size: usize,
    /// Read and decode every event without touching the read models.
    pub dry_run: bool,
}

impl ReplayOptions {
    pub fn full() -> Self {
        Self {
            from_position: 0,
            page_size: DEFAULT_REPLAY_PAGE_SIZE,
            dry_run: false,
        }
    }

    /// Catch up from a snapshot's checkpoint.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            from_position: snapshot.position,
            ..Self::full()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self::full()
    }
}

/// Summary of a finished replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReplayReport {
    /// Events read from the log.
    pub processed: u64,
    pub applied: u64,
    pub already_applied: u64,
    pub skipped: u64,
    /// Global position of the last event read (the starting position if none).
    pub last_position: u64,
}

/// Rebuild read models by replaying the log through `projector`.
///
/// Cancellation is checked between pages and between events; a cancelled
/// replay leaves the read models reflecting a prefix of the log, which a
/// later replay from the same checkpoint completes.
pub fn replay<S, P>(
    store: &S,
    projector: &P,
    options: ReplayOptions,
    cancel: &CancellationToken,
) -> Result<ReplayReport, ReplayError>
where
    S: EventStore + ?Sized,
    P: Projector + ?Sized,
{
    if options.page_size == 0 {
        return Err(ReplayError::InvalidInput(
            "page size must be at least 1".to_string(),
        ));
    }

    let max_position = store.max_position(cancel)?;
    if options.from_position > max_position {
        return Err(ReplayError::InvalidInput(format!(
            "replay position {} is beyond the end of the log ({max_position})",
            options.from_position
        )));
    }

    if options.from_position == 0 && !options.dry_run {
        projector.reset(cancel)?;
    }

    let mut report = ReplayReport {
        last_position: options.from_position,
        ..ReplayReport::default()
    };

    loop {
        cancel.check()?;
        let page = store.read_all(report.last_position, options.page_size, cancel)?;
        if page.is_empty() {
            break;
        }

        for event in &page {
            cancel.check()?;

            if !options.dry_run {
                match projector.project(event, event.version, cancel)? {
                    ProjectionOutcome::Applied { .. } => report.applied += 1,
                    ProjectionOutcome::AlreadyApplied { .. } => report.already_applied += 1,
                    ProjectionOutcome::Skipped(_) => report.skipped += 1,
                }
            }

            report.processed += 1;
            report.last_position = event.global_position;
        }

        if page.len() < options.page_size {
            break;
        }
    }

    tracing::info!(
        from_position = options.from_position,
        last_position = report.last_position,
        processed = report.processed,
        applied = report.applied,
        already_applied = report.already_applied,
        skipped = report.skipped,
        dry_run = options.dry_run,
        "replay complete"
    );

    Ok(report)
}
