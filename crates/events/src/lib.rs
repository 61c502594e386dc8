//! Event primitives shared by the record schema and the infrastructure.

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;
