//! Record events: a closed sum type decoded by event-type label.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use lineage_core::{DomainError, DomainResult};
use lineage_events::Event;

use crate::field::FieldChanges;
use crate::kind::{EntityKind, EventAction};

/// What happened to a record. Serialized as the stored payload; the entity
/// kind and action travel in the event-type label instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordChange {
    Created {
        fields: FieldChanges,
    },
    Updated {
        changes: FieldChanges,
        /// Set on compensating events emitted by a rollback.
        rolled_back_to: Option<u64>,
    },
    Deleted {
        reason: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreatedPayload {
    fields: FieldChanges,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdatedPayload {
    changes: FieldChanges,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rolled_back_to: Option<u64>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeletedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl RecordChange {
    pub fn action(&self) -> EventAction {
        match self {
            RecordChange::Created { .. } => EventAction::Created,
            RecordChange::Updated { .. } => EventAction::Updated,
            RecordChange::Deleted { .. } => EventAction::Deleted,
        }
    }

    fn to_payload(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            RecordChange::Created { fields } => serde_json::to_value(CreatedPayload {
                fields: fields.clone(),
            }),
            RecordChange::Updated {
                changes,
                rolled_back_to,
            } => serde_json::to_value(UpdatedPayload {
                changes: changes.clone(),
                rolled_back_to: *rolled_back_to,
            }),
            RecordChange::Deleted { reason } => serde_json::to_value(DeletedPayload {
                reason: reason.clone(),
            }),
        }
    }

    fn from_payload(action: EventAction, payload: &JsonValue) -> Result<Self, serde_json::Error> {
        Ok(match action {
            EventAction::Created => {
                let p: CreatedPayload = serde_json::from_value(payload.clone())?;
                RecordChange::Created { fields: p.fields }
            }
            EventAction::Updated => {
                let p: UpdatedPayload = serde_json::from_value(payload.clone())?;
                RecordChange::Updated {
                    changes: p.changes,
                    rolled_back_to: p.rolled_back_to,
                }
            }
            EventAction::Deleted => {
                let p: DeletedPayload = serde_json::from_value(payload.clone())?;
                RecordChange::Deleted { reason: p.reason }
            }
        })
    }
}

/// A typed record event for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEvent {
    pub kind: EntityKind,
    pub change: RecordChange,
}

impl RecordEvent {
    pub fn created(kind: EntityKind, fields: FieldChanges) -> Self {
        Self {
            kind,
            change: RecordChange::Created { fields },
        }
    }

    pub fn updated(kind: EntityKind, changes: FieldChanges) -> Self {
        Self {
            kind,
            change: RecordChange::Updated {
                changes,
                rolled_back_to: None,
            },
        }
    }

    /// Compensating update restoring the values a record had at `target_version`.
    pub fn rollback(kind: EntityKind, changes: FieldChanges, target_version: u64) -> Self {
        Self {
            kind,
            change: RecordChange::Updated {
                changes,
                rolled_back_to: Some(target_version),
            },
        }
    }

    pub fn deleted(kind: EntityKind, reason: Option<String>) -> Self {
        Self {
            kind,
            change: RecordChange::Deleted { reason },
        }
    }

    /// Boundary validation run before the event is serialized and appended.
    pub fn validate(&self) -> DomainResult<()> {
        match &self.change {
            RecordChange::Created { fields } => fields.validate(self.kind),
            RecordChange::Updated { changes, .. } => {
                if changes.is_empty() {
                    return Err(DomainError::invalid_input(format!(
                        "{} update carries no changes",
                        self.kind
                    )));
                }
                changes.validate(self.kind)
            }
            RecordChange::Deleted { .. } => Ok(()),
        }
    }

    pub fn payload(&self) -> Result<JsonValue, serde_json::Error> {
        self.change.to_payload()
    }
}

impl Event for RecordEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type(self.change.action())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed '{event_type}' payload: {reason}")]
    MalformedPayload { event_type: String, reason: String },
}

/// Result of decoding a stored event by its type label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    Record(RecordEvent),
    /// A label outside the record schema. Not an error: consumers skip it.
    Unknown { event_type: String },
}

impl DecodedEvent {
    /// Decode one stored payload, one decode step per known label.
    pub fn decode(event_type: &str, payload: &JsonValue) -> Result<Self, DecodeError> {
        let Some((kind, action)) = EntityKind::parse_event_type(event_type) else {
            return Ok(DecodedEvent::Unknown {
                event_type: event_type.to_string(),
            });
        };

        let change = RecordChange::from_payload(action, payload).map_err(|e| {
            DecodeError::MalformedPayload {
                event_type: event_type.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(DecodedEvent::Record(RecordEvent { kind, change }))
    }

    pub fn as_record(&self) -> Option<&RecordEvent> {
        match self {
            DecodedEvent::Record(e) => Some(e),
            DecodedEvent::Unknown { .. } => None,
        }
    }
}
