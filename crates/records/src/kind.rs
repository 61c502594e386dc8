//! Entity kinds and their field schemas.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use lineage_core::DomainError;

use crate::field::{FieldSpec, FieldType};

/// Closed set of record kinds the core can project and roll back.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Family,
    Source,
    Citation,
    Media,
    Repository,
    Note,
}

/// What a record event does to its record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventAction {
    Created,
    Updated,
    Deleted,
}

impl EventAction {
    pub const ALL: [EventAction; 3] = [EventAction::Created, EventAction::Updated, EventAction::Deleted];

    fn index(self) -> usize {
        match self {
            EventAction::Created => 0,
            EventAction::Updated => 1,
            EventAction::Deleted => 2,
        }
    }
}

// Indexed by `EntityKind::index()` then `EventAction::index()`.
const EVENT_TYPES: [[&str; 3]; 7] = [
    ["person.created", "person.updated", "person.deleted"],
    ["family.created", "family.updated", "family.deleted"],
    ["source.created", "source.updated", "source.deleted"],
    ["citation.created", "citation.updated", "citation.deleted"],
    ["media.created", "media.updated", "media.deleted"],
    ["repository.created", "repository.updated", "repository.deleted"],
    ["note.created", "note.updated", "note.deleted"],
];

const PERSON_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldType::Text),
    FieldSpec::new("gender", FieldType::Text),
    FieldSpec::new("birth_date", FieldType::Date),
    FieldSpec::new("birth_place", FieldType::Text),
    FieldSpec::new("death_date", FieldType::Date),
    FieldSpec::new("death_place", FieldType::Text),
    FieldSpec::new("living", FieldType::Flag),
    FieldSpec::new("notes", FieldType::Text),
];

const FAMILY_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("partner1_id", FieldType::Reference),
    FieldSpec::new("partner2_id", FieldType::Reference),
    FieldSpec::new("relationship_type", FieldType::Text),
    FieldSpec::new("children", FieldType::ReferenceList),
    FieldSpec::new("union_date", FieldType::Date),
    FieldSpec::new("notes", FieldType::Text),
];

const SOURCE_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("title", FieldType::Text),
    FieldSpec::new("author", FieldType::Text),
    FieldSpec::new("publisher", FieldType::Text),
    FieldSpec::new("publication_date", FieldType::Date),
    FieldSpec::new("repository_id", FieldType::Reference),
    FieldSpec::new("notes", FieldType::Text),
];

const CITATION_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("source_id", FieldType::Reference),
    FieldSpec::new("page", FieldType::Text),
    FieldSpec::new("confidence", FieldType::Integer),
    FieldSpec::new("notes", FieldType::Text),
];

const MEDIA_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("title", FieldType::Text),
    FieldSpec::new("file_name", FieldType::Text),
    FieldSpec::new("mime_type", FieldType::Text),
    FieldSpec::new("file_size", FieldType::Integer),
    FieldSpec::new("notes", FieldType::Text),
];

const REPOSITORY_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldType::Text),
    FieldSpec::new("address", FieldType::Text),
    FieldSpec::new("url", FieldType::Text),
    FieldSpec::new("notes", FieldType::Text),
];

const NOTE_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("text", FieldType::Text),
    FieldSpec::new("subject_id", FieldType::Reference),
];

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Person,
        EntityKind::Family,
        EntityKind::Source,
        EntityKind::Citation,
        EntityKind::Media,
        EntityKind::Repository,
        EntityKind::Note,
    ];

    fn index(self) -> usize {
        match self {
            EntityKind::Person => 0,
            EntityKind::Family => 1,
            EntityKind::Source => 2,
            EntityKind::Citation => 3,
            EntityKind::Media => 4,
            EntityKind::Repository => 5,
            EntityKind::Note => 6,
        }
    }

    /// Stream-type label for streams of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Family => "family",
            EntityKind::Source => "source",
            EntityKind::Citation => "citation",
            EntityKind::Media => "media",
            EntityKind::Repository => "repository",
            EntityKind::Note => "note",
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            EntityKind::Person => PERSON_FIELDS,
            EntityKind::Family => FAMILY_FIELDS,
            EntityKind::Source => SOURCE_FIELDS,
            EntityKind::Citation => CITATION_FIELDS,
            EntityKind::Media => MEDIA_FIELDS,
            EntityKind::Repository => REPOSITORY_FIELDS,
            EntityKind::Note => NOTE_FIELDS,
        }
    }

    pub fn field(self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    pub fn event_type(self, action: EventAction) -> &'static str {
        EVENT_TYPES[self.index()][action.index()]
    }

    /// Inverse of [`EntityKind::event_type`]; `None` for labels outside the schema.
    pub fn parse_event_type(label: &str) -> Option<(EntityKind, EventAction)> {
        EntityKind::ALL.iter().find_map(|&kind| {
            EventAction::ALL
                .iter()
                .find(|&&action| kind.event_type(action) == label)
                .map(|&action| (kind, action))
        })
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| DomainError::invalid_input(format!("unsupported entity kind '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_parse() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
            for action in EventAction::ALL {
                let label = kind.event_type(action);
                assert!(label.starts_with(kind.as_str()));
                assert_eq!(EntityKind::parse_event_type(label), Some((kind, action)));
            }
        }
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert!("dog".parse::<EntityKind>().is_err());
        assert_eq!(EntityKind::parse_event_type("person.merged"), None);
    }

    #[test]
    fn kind_parse_is_case_insensitive() {
        assert_eq!("Person".parse::<EntityKind>().unwrap(), EntityKind::Person);
    }

    #[test]
    fn schemas_have_unique_field_names() {
        for kind in EntityKind::ALL {
            let mut names: Vec<_> = kind.fields().iter().map(|f| f.name).collect();
            let total = names.len();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), total, "{kind} declares a field twice");
        }
    }
}
