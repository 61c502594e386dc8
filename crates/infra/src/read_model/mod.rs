//! Per-entity-kind read model storage (disposable, rebuildable).

pub mod record;
pub mod store;

pub use record::RecordReadModel;
pub use store::{InMemoryReadModelStore, ReadModelError, ReadModelStore};
