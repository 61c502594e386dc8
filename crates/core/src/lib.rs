//! `lineage-core`: foundation building blocks shared by every layer.
//!
//! This crate contains identifiers, the optimistic-concurrency contract, the
//! error taxonomy and the cancellation token. No storage concerns live here.

pub mod aggregate;
pub mod cancel;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use cancel::{CancellationToken, Cancelled};
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{EventId, SnapshotId, StreamId};
