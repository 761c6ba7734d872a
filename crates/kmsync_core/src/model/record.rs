//! Entity record domain model.
//!
//! # Responsibility
//! - Define the metadata row shared by every content-bearing entity family.
//! - Provide the shallow merge used to lay session state over registry reads.
//!
//! # Invariants
//! - `id` is unique within one `EntityKind`, never across kinds.
//! - `updated_at` is Unix epoch milliseconds.
//! - A record never carries its content payload, only `content_ref`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Entity families that own content-store payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Literature or paper review with a synthesis body.
    Review,
    /// Free-form note.
    Note,
    /// Research project that groups notes and library items.
    ResearchProject,
    /// Imported library item (paper, book, web clip).
    LibraryItem,
}

impl EntityKind {
    /// All kinds, in declaration order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Review,
        EntityKind::Note,
        EntityKind::ResearchProject,
        EntityKind::LibraryItem,
    ];

    /// Stable string id used in storage and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Note => "note",
            Self::ResearchProject => "research_project",
            Self::LibraryItem => "library_item",
        }
    }

    /// Parses a stable string id.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "review" => Some(Self::Review),
            "note" => Some(Self::Note),
            "research_project" => Some(Self::ResearchProject),
            "library_item" => Some(Self::LibraryItem),
            _ => None,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one record across all entity families.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub kind: EntityKind,
    pub id: String,
}

impl RecordKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Metadata row for one entity, as held by the registry and by views.
///
/// Scalar metadata lives in `fields` so every entity family shares one shape;
/// denormalized reference lists are plain JSON arrays inside `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub id: String,
    /// Unix epoch milliseconds of the last local or remote write.
    pub updated_at: i64,
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Opaque reference into the content store, `None` until first save.
    #[serde(default)]
    pub content_ref: Option<String>,
    /// Where `content_ref` resolves, when the store needs a hint.
    #[serde(default)]
    pub location_hint: Option<String>,
}

impl EntityRecord {
    /// Creates an empty record with a generated id.
    pub fn new(kind: EntityKind) -> Self {
        Self::with_id(kind, Uuid::new_v4().to_string())
    }

    /// Creates an empty record with a caller-provided id.
    pub fn with_id(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            updated_at: now_epoch_ms(),
            fields: Map::new(),
            content_ref: None,
            location_hint: None,
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.kind, self.id.clone())
    }

    /// Looks up a field by name. `id` and `updated_at` resolve to the
    /// record's own columns so filters and sorts can address them.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "updated_at" => Some(Value::from(self.updated_at)),
            "content_ref" => self.content_ref.clone().map(Value::String),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Lays `self` over `base`: fields present here win, fields only present
    /// on `base` survive.
    ///
    /// `content_ref`/`location_hint` follow the same rule (`None` means absent).
    pub fn merged_over(&self, base: &EntityRecord) -> EntityRecord {
        let mut fields = base.fields.clone();
        for (name, value) in &self.fields {
            fields.insert(name.clone(), value.clone());
        }

        EntityRecord {
            kind: self.kind,
            id: self.id.clone(),
            updated_at: self.updated_at,
            fields,
            content_ref: self
                .content_ref
                .clone()
                .or_else(|| base.content_ref.clone()),
            location_hint: self
                .location_hint
                .clone()
                .or_else(|| base.location_hint.clone()),
        }
    }
}

/// Current wall clock in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
