//! Pure fold of a record stream into its state at some version.

use lineage_core::{Aggregate, AggregateRoot, StreamId};

use crate::event::{DecodedEvent, RecordChange};
use crate::field::{FieldChanges, FieldMap, FieldValue};
use crate::kind::EntityKind;

/// State of one record after folding its first `version()` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordState {
    id: StreamId,
    kind: EntityKind,
    fields: FieldMap,
    version: u64,
    created: bool,
    deleted: bool,
}

impl RecordState {
    /// Create an empty, not-yet-created record for rehydration.
    pub fn empty(id: StreamId, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            fields: FieldMap::new(),
            version: 0,
            created: false,
            deleted: false,
        }
    }

    /// Fold `history` in order. Events for other kinds count towards the
    /// version but do not touch fields.
    pub fn replay<'a>(
        id: StreamId,
        kind: EntityKind,
        history: impl IntoIterator<Item = &'a DecodedEvent>,
    ) -> Self {
        let mut state = Self::empty(id, kind);
        for event in history {
            state.apply(event);
        }
        state
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Value of a schema field, with the type default for unset fields.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        let spec = self.kind.field(name)?;
        Some(
            self.fields
                .get(name)
                .cloned()
                .map(|v| spec.ty.normalize(v))
                .unwrap_or_else(|| spec.ty.default_value()),
        )
    }

    /// Fields whose value here differs from `current`, carrying this state's
    /// value. Applying the result to `current` restores this state.
    pub fn changes_to_restore(&self, current: &FieldMap) -> FieldChanges {
        self.kind
            .fields()
            .iter()
            .filter_map(|spec| {
                let historical = self
                    .fields
                    .get(spec.name)
                    .cloned()
                    .map(|v| spec.ty.normalize(v))
                    .unwrap_or_else(|| spec.ty.default_value());
                let now = current
                    .get(spec.name)
                    .cloned()
                    .map(|v| spec.ty.normalize(v))
                    .unwrap_or_else(|| spec.ty.default_value());
                (historical != now).then(|| (spec.name.to_string(), historical))
            })
            .collect()
    }

    fn merge(&mut self, changes: &FieldChanges) {
        for (name, value) in changes.iter() {
            let value = match self.kind.field(name) {
                Some(spec) => spec.ty.normalize(value.clone()),
                None => continue,
            };
            self.fields.insert(name.clone(), value);
        }
    }
}

impl AggregateRoot for RecordState {
    type Id = StreamId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for RecordState {
    type Event = DecodedEvent;

    fn apply(&mut self, event: &Self::Event) {
        self.version += 1;

        let Some(record) = event.as_record() else {
            return;
        };
        if record.kind != self.kind {
            return;
        }

        match &record.change {
            RecordChange::Created { fields } => {
                self.fields.clear();
                self.merge(fields);
                self.created = true;
                self.deleted = false;
            }
            RecordChange::Updated { changes, .. } => self.merge(changes),
            RecordChange::Deleted { .. } => self.deleted = true,
        }
    }
}
