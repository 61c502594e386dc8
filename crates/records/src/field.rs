//! Typed field values and validated change sets.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use lineage_core::{DomainError, DomainResult};

use crate::kind::EntityKind;

/// Current or historical field values of one record, keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Declared type of a schema field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Integer,
    Flag,
    Date,
    /// Id of another record.
    Reference,
    /// Ordered ids of other records.
    ReferenceList,
}

impl FieldType {
    /// Value a field reads as when it was never set or was cleared.
    pub fn default_value(self) -> FieldValue {
        match self {
            FieldType::Text => FieldValue::Text(String::new()),
            FieldType::Flag => FieldValue::Flag(false),
            FieldType::ReferenceList => FieldValue::References(Vec::new()),
            FieldType::Integer | FieldType::Date | FieldType::Reference => FieldValue::Null,
        }
    }

    /// `Null` clears any field; otherwise the variant must match the type.
    pub fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (FieldType::Text, FieldValue::Text(_))
                | (FieldType::Integer, FieldValue::Integer(_))
                | (FieldType::Flag, FieldValue::Flag(_))
                | (FieldType::Date, FieldValue::Date(_))
                | (FieldType::Reference, FieldValue::Reference(_))
                | (FieldType::ReferenceList, FieldValue::References(_))
        )
    }

    /// Map `Null` onto the type's default so equal meanings compare equal.
    pub fn normalize(self, value: FieldValue) -> FieldValue {
        match value {
            FieldValue::Null => self.default_value(),
            other => other,
        }
    }
}

/// One entry of an entity kind's schema.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
}

impl FieldSpec {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Flag(bool),
    Date(NaiveDate),
    Reference(String),
    References(Vec<String>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn reference(id: impl Into<String>) -> Self {
        FieldValue::Reference(id.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

/// Ordered `field → value` change set carried by record events.
///
/// Construction is unchecked; [`FieldChanges::validate`] runs against the
/// entity kind's schema before anything reaches the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldChanges(FieldMap);

impl FieldChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> FieldMap {
        self.0
    }

    /// Reject unknown field names and values of the wrong type.
    pub fn validate(&self, kind: EntityKind) -> DomainResult<()> {
        for (name, value) in &self.0 {
            let spec = kind.field(name).ok_or_else(|| {
                DomainError::invalid_input(format!("{kind} has no field '{name}'"))
            })?;
            if !spec.ty.accepts(value) {
                return Err(DomainError::invalid_input(format!(
                    "{kind}.{name} expects {:?}, got {value:?}",
                    spec.ty
                )));
            }
            if let FieldValue::Reference(id) = value {
                if id.trim().is_empty() {
                    return Err(DomainError::invalid_input(format!(
                        "{kind}.{name} reference must not be blank"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, FieldValue)> for FieldChanges {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FieldChanges {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_core::ErrorKind;

    #[test]
    fn null_normalizes_to_type_default() {
        assert_eq!(FieldType::Text.normalize(FieldValue::Null), FieldValue::text(""));
        assert_eq!(FieldType::Flag.normalize(FieldValue::Null), FieldValue::Flag(false));
        assert_eq!(FieldType::Date.normalize(FieldValue::Null), FieldValue::Null);
        assert_eq!(
            FieldType::Integer.normalize(FieldValue::Integer(3)),
            FieldValue::Integer(3)
        );
    }

    #[test]
    fn validate_accepts_schema_fields() {
        let changes = FieldChanges::new()
            .with("name", "John")
            .with("living", true)
            .with("birth_date", NaiveDate::from_ymd_opt(1901, 2, 3).unwrap())
            .with("death_date", FieldValue::Null);
        assert!(changes.validate(EntityKind::Person).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_field() {
        let changes = FieldChanges::new().with("favourite_colour", "blue");
        let err = changes.validate(EntityKind::Person).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn validate_rejects_wrong_type() {
        let changes = FieldChanges::new().with("confidence", "high");
        assert!(changes.validate(EntityKind::Citation).is_err());
    }

    #[test]
    fn validate_rejects_blank_reference() {
        let changes = FieldChanges::new().with("source_id", FieldValue::reference(" "));
        assert!(changes.validate(EntityKind::Citation).is_err());
    }

    #[test]
    fn values_serialize_tagged() {
        let json = serde_json::to_value(FieldValue::text("a")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "value": "a"}));
        let back: FieldValue = serde_json::from_value(serde_json::json!({"type": "null"})).unwrap();
        assert_eq!(back, FieldValue::Null);
    }
}
