//! Infrastructure layer: event log, read models, projection, snapshots,
//! rollback and the wiring that ties them together.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod rollback;
pub mod services;
pub mod snapshot;

pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{ConfigError, CoreConfig, StorageBackend};
pub use rollback::{RollbackError, RollbackOutcome, RollbackService};
pub use services::CoreServices;
