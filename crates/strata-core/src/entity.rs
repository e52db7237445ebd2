//! Entity model.
//!
//! An entity is an opaque record identified by a uuid, carrying a content
//! hash for idempotent-write detection and a logical `created` timestamp
//! (unix milliseconds) used for conflict resolution.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::hash::ContentHasher;

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The record contract every backend stores.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short family name, used for table names and remote routes.
    const FAMILY: &'static str;

    fn uuid(&self) -> &str;

    /// Content hash. Two entities with the same hash carry the same content.
    fn hash(&self) -> &str;

    /// Logical write time in unix milliseconds.
    fn created(&self) -> i64;

    fn is_valid(&self) -> bool {
        !self.uuid().is_empty()
    }
}

/// Entities that hang off a parent key (side-table families).
pub trait ChildEntity: Entity {
    fn parent_uuid(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// A node in the object tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntity {
    pub uuid: String,
    pub name: String,
    pub content_type: String,
    pub parent_uuid: Option<String>,
    pub definition_uuid: Option<String>,
    pub source_uuid: Option<String>,
    pub created: i64,
    hash: String,
}

impl ObjectEntity {
    pub const DEFAULT_CONTENT_TYPE: &'static str = "directory";

    pub fn new(uuid: impl Into<String>, name: impl Into<String>, created: i64) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            content_type: Self::DEFAULT_CONTENT_TYPE.to_owned(),
            parent_uuid: None,
            definition_uuid: None,
            source_uuid: None,
            created,
            hash: String::new(),
        }
        .seal()
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self.seal()
    }

    #[must_use]
    pub fn with_parent(mut self, parent_uuid: impl Into<String>) -> Self {
        self.parent_uuid = Some(parent_uuid.into());
        self.seal()
    }

    #[must_use]
    pub fn with_definition(mut self, definition_uuid: impl Into<String>) -> Self {
        self.definition_uuid = Some(definition_uuid.into());
        self.seal()
    }

    #[must_use]
    pub fn with_source(mut self, source_uuid: impl Into<String>) -> Self {
        self.source_uuid = Some(source_uuid.into());
        self.seal()
    }

    /// Same content, different logical write time. The hash is unchanged.
    #[must_use]
    pub fn with_created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    /// Rebuild from stored columns, trusting the persisted hash.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        uuid: String,
        name: String,
        content_type: String,
        parent_uuid: Option<String>,
        definition_uuid: Option<String>,
        source_uuid: Option<String>,
        created: i64,
        hash: String,
    ) -> Self {
        Self {
            uuid,
            name,
            content_type,
            parent_uuid,
            definition_uuid,
            source_uuid,
            created,
            hash,
        }
    }

    // `created` is deliberately not part of the content hash.
    fn seal(mut self) -> Self {
        self.hash = ContentHasher::new()
            .field(&self.uuid)
            .field(&self.name)
            .field(&self.content_type)
            .optional(self.parent_uuid.as_deref())
            .optional(self.definition_uuid.as_deref())
            .optional(self.source_uuid.as_deref())
            .finish();
        self
    }
}

impl Entity for ObjectEntity {
    const FAMILY: &'static str = "objects";

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn created(&self) -> i64 {
        self.created
    }
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

/// Localized text attached to a parent definition.
///
/// The uuid is derived from `(parent, language)` so each parent carries at
/// most one description per language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionEntity {
    pub uuid: String,
    pub parent_uuid: String,
    pub language_code: String,
    pub text: String,
    pub created: i64,
    hash: String,
}

impl DescriptionEntity {
    pub fn new(
        parent_uuid: impl Into<String>,
        language_code: impl Into<String>,
        text: impl Into<String>,
        created: i64,
    ) -> Self {
        let parent_uuid = parent_uuid.into();
        let language_code = language_code.into();
        let text = text.into();
        let uuid = ContentHasher::new()
            .field(&parent_uuid)
            .field(&language_code)
            .finish();
        let hash = ContentHasher::new().field(&uuid).field(&text).finish();
        Self {
            uuid,
            parent_uuid,
            language_code,
            text,
            created,
            hash,
        }
    }
}

impl Entity for DescriptionEntity {
    const FAMILY: &'static str = "descriptions";

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn created(&self) -> i64 {
        self.created
    }
}

impl ChildEntity for DescriptionEntity {
    fn parent_uuid(&self) -> &str {
        &self.parent_uuid
    }
}
