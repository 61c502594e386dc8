//! Append-only event log boundary.
//!
//! This module defines the storage-facing contract for streams of events and
//! its two backends: an in-memory log and a JSON-lines file log.

pub mod file;
pub mod in_memory;
mod index;
pub mod query;
pub mod r#trait;

pub use file::{FileEventStore, FileEventStoreConfig};
pub use in_memory::InMemoryEventStore;
pub use query::{EventPage, Pagination, TimeRange};
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
