use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lineage_core::StreamId;
use lineage_records::{EntityKind, FieldMap, FieldValue};

/// Queryable current state of one record.
///
/// Stamped with the stream version of the last event applied to it. Derived
/// from the event log and never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReadModel {
    pub entity_id: StreamId,
    pub kind: EntityKind,
    pub fields: FieldMap,
    pub version: u64,
    /// `occurred_at` of the last applied event.
    pub updated_at: DateTime<Utc>,
}

impl RecordReadModel {
    pub fn new(entity_id: StreamId, kind: EntityKind, updated_at: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            kind,
            fields: FieldMap::new(),
            version: 0,
            updated_at,
        }
    }

    /// Value of a schema field, with the type default for unset fields.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        let spec = self.kind.field(name)?;
        Some(match self.fields.get(name) {
            Some(v) => spec.ty.normalize(v.clone()),
            None => spec.ty.default_value(),
        })
    }
}
