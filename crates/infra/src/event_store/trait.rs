use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use lineage_core::{CancellationToken, Cancelled, ErrorKind, EventId, ExpectedVersion, StreamId};
use lineage_events::{Event, EventEnvelope};
use lineage_records::RecordEvent;
use std::sync::Arc;

use super::query::{EventPage, Pagination, TimeRange};

/// An event ready to be appended to a stream (no version or position yet).
///
/// ## Event Lifecycle
///
/// 1. **RecordEvent**: typed change produced by a command handler
/// 2. **UncommittedEvent**: serialized payload + caller-supplied `occurred_at`
/// 3. **StoredEvent**: persisted with its stream version and global position
/// 4. **EventEnvelope**: decoded view handed to the projector
///
/// `occurred_at` is business time chosen by the caller, never the clock at
/// append. That is what makes historical backfill deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream.
///
/// ## Numbering
///
/// - `version` is stream-local, starts at 1 and grows by exactly 1.
/// - `global_position` is log-wide, starts at 1 and grows by exactly 1
///   across every stream, in commit order.
///
/// Once written a stored event is never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub stream_id: StreamId,
    pub stream_type: String,

    pub event_type: String,
    pub event_version: u32,

    /// 1-based position in the stream.
    pub version: u64,
    /// 1-based position in the whole log.
    pub global_position: u64,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Wrap this event's metadata around an already-decoded payload.
    pub fn to_envelope<E>(&self, payload: E) -> EventEnvelope<E> {
        EventEnvelope::new(
            self.event_id,
            self.stream_id.clone(),
            self.stream_type.clone(),
            self.version,
            self.global_position,
            self.occurred_at,
            payload,
        )
    }
}

/// Event store operation error.
///
/// `Concurrency` is the only expected outcome of a version check; everything
/// else is either a caller mistake or an opaque storage failure.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed on '{stream_id}' (expected {expected:?}, actual {actual})")]
    Concurrency {
        stream_id: StreamId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("stream '{stream_id}' has type '{existing}', attempted append with '{attempted}'")]
    StreamTypeMismatch {
        stream_id: StreamId,
        existing: String,
        attempted: String,
    },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("event log is corrupt: {0}")]
    Corrupt(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl EventStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::Concurrency { .. } => ErrorKind::ConcurrencyConflict,
            EventStoreError::StreamTypeMismatch { .. }
            | EventStoreError::InvalidAppend(_)
            | EventStoreError::InvalidQuery(_) => ErrorKind::InvalidInput,
            EventStoreError::Cancelled(_) => ErrorKind::Cancelled,
            EventStoreError::Corrupt(_)
            | EventStoreError::Storage(_)
            | EventStoreError::Io(_)
            | EventStoreError::Serialization(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn poisoned() -> Self {
        EventStoreError::Storage("lock poisoned".to_string())
    }
}

/// Append-only event log.
///
/// ## Design Principles
///
/// - **No storage assumptions**: in-memory and file-backed implementations
///   share this contract
/// - **Optimistic locking**: via `ExpectedVersion`; the read-version / compare /
///   append sequence of one call is a single critical section
/// - **Append-only**: events cannot be modified or deleted
/// - **Shared reads**: readers never block each other, only writers
///
/// Every operation takes the caller's cancellation token and honours it on
/// entry.
pub trait EventStore: Send + Sync {
    /// Append a batch to one stream, all or nothing.
    ///
    /// Implementations must:
    /// - skip the version check for `ExpectedVersion::Any`
    /// - otherwise fail with `Concurrency` unless the stream is at exactly the
    ///   expected version, appending nothing
    /// - assign consecutive versions from `current + 1` and consecutive global
    ///   positions from `max_position + 1`
    fn append(
        &self,
        stream_id: &StreamId,
        stream_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Full ordered history of a stream; empty if the stream does not exist.
    fn read_stream(
        &self,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Events with `global_position > from_position`, ascending, at most `limit`.
    fn read_all(
        &self,
        from_position: u64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// One page of a single stream, in version order.
    fn read_by_stream(
        &self,
        stream_id: &StreamId,
        pagination: Pagination,
        cancel: &CancellationToken,
    ) -> Result<EventPage, EventStoreError>;

    /// One page of the global log within a time range, optionally filtered by
    /// event type, ordered by `(occurred_at, global_position)`.
    fn read_global_by_time(
        &self,
        range: TimeRange,
        event_type: Option<&str>,
        pagination: Pagination,
        cancel: &CancellationToken,
    ) -> Result<EventPage, EventStoreError>;

    /// Current stream version; 0 if the stream does not exist.
    fn stream_version(
        &self,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<u64, EventStoreError>;

    /// Global position of the most recent event; 0 for an empty log.
    fn max_position(&self, cancel: &CancellationToken) -> Result<u64, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        stream_id: &StreamId,
        stream_type: &str,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(stream_id, stream_type, events, expected_version, cancel)
    }

    fn read_stream(
        &self,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).read_stream(stream_id, cancel)
    }

    fn read_all(
        &self,
        from_position: u64,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).read_all(from_position, limit, cancel)
    }

    fn read_by_stream(
        &self,
        stream_id: &StreamId,
        pagination: Pagination,
        cancel: &CancellationToken,
    ) -> Result<EventPage, EventStoreError> {
        (**self).read_by_stream(stream_id, pagination, cancel)
    }

    fn read_global_by_time(
        &self,
        range: TimeRange,
        event_type: Option<&str>,
        pagination: Pagination,
        cancel: &CancellationToken,
    ) -> Result<EventPage, EventStoreError> {
        (**self).read_global_by_time(range, event_type, pagination, cancel)
    }

    fn stream_version(
        &self,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<u64, EventStoreError> {
        (**self).stream_version(stream_id, cancel)
    }

    fn max_position(&self, cancel: &CancellationToken) -> Result<u64, EventStoreError> {
        (**self).max_position(cancel)
    }
}

impl UncommittedEvent {
    pub fn new(
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            event_version: 1,
            occurred_at,
            payload,
        }
    }

    /// Serialize a typed record event, keeping the metadata needed to decode
    /// it later.
    pub fn from_record(
        event_id: EventId,
        occurred_at: DateTime<Utc>,
        event: &RecordEvent,
    ) -> Result<Self, EventStoreError> {
        let payload = event.payload().map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at,
            payload,
        })
    }
}
