//! Record schema for the genealogy domain (event-sourced).
//!
//! This crate defines the closed set of entity kinds, their typed field
//! schemas, the record events that change them and the pure fold that rebuilds
//! a record's state from its history. No IO, no storage.

pub mod event;
pub mod field;
pub mod kind;
pub mod state;

pub use event::{DecodeError, DecodedEvent, RecordChange, RecordEvent};
pub use field::{FieldChanges, FieldMap, FieldSpec, FieldType, FieldValue};
pub use kind::{EntityKind, EventAction};
pub use state::RecordState;
