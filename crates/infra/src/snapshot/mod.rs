//! Position-based replay checkpoints.

pub mod file;
pub mod store;

pub use file::FileSnapshotStore;
pub use store::{InMemorySnapshotStore, Snapshot, SnapshotError, SnapshotStore};
