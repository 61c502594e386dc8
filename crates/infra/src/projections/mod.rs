//! Projection implementations (read model builders).
//!
//! Projections consume stored events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event log
//! - **Idempotent**: projecting an event at a version already reflected is a no-op
//! - **Tolerant**: unknown or malformed events are skipped, never fatal

pub mod cursor_store;
pub mod projector;
pub mod records;
pub mod replay;

pub use cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
pub use projector::{ProjectionError, ProjectionOutcome, Projector, SkipReason};
pub use records::RecordProjector;
pub use replay::{replay, ReplayError, ReplayOptions, ReplayReport, DEFAULT_REPLAY_PAGE_SIZE};
