use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lineage_core::{EventId, StreamId};

/// Envelope for a committed event, carrying stream and log metadata.
///
/// Notes:
/// - `version` is 1-based and stream-local.
/// - `global_position` is unique and strictly increasing across every stream.
/// - `payload` is whatever the consumer decoded the stored payload into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: EventId,

    stream_id: StreamId,
    stream_type: String,

    version: u64,
    global_position: u64,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: EventId,
        stream_id: StreamId,
        stream_type: impl Into<String>,
        version: u64,
        global_position: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_id,
            stream_type: stream_type.into(),
            version,
            global_position,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn global_position(&self) -> u64 {
        self.global_position
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
