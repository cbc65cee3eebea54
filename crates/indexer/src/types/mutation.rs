//! Mutation records.
//!
//! A [`MutationRecord`] is one write destined for the cluster. The operation
//! and its payload live together in [`Mutation`], so a delete cannot carry a
//! body and an index or update cannot be built without one.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IndexerError, MappingError};

/// Bytes charged per mutation for its action and metadata line.
pub const ACTION_OVERHEAD_BYTES: usize = 50;

/// Server-side conflict retries used by update constructors.
pub const DEFAULT_RETRY_ON_CONFLICT: u32 = 3;

/// A serialized JSON document.
///
/// The contents are checked to be valid JSON on construction and are sent to
/// the cluster verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentBody(String);

impl DocumentBody {
    /// Creates a body from a JSON value.
    pub fn from_value(value: &Value) -> Self {
        Self(value.to_string())
    }

    /// Serializes any value into a body.
    pub fn from_serializable<T: Serialize + ?Sized>(document: &T) -> Result<Self, MappingError> {
        Ok(Self(serde_json::to_string(document)?))
    }

    /// Wraps an already-serialized JSON document after validating it.
    pub fn parse(json: impl Into<String>) -> Result<Self, MappingError> {
        let json = json.into();
        serde_json::from_str::<serde::de::IgnoredAny>(&json)?;
        Ok(Self(json))
    }

    /// Returns the serialized document.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the serialized length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the body back into a JSON value.
    pub fn to_value(&self) -> Result<Value, MappingError> {
        Ok(serde_json::from_str(&self.0)?)
    }
}

impl From<Value> for DocumentBody {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

/// A stored script reference, passed to the cluster as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Script source.
    pub source: String,

    /// Script language; the cluster default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// Parameters bound into the script.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl Script {
    /// Creates a script in the cluster's default language.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            lang: None,
            params: Map::new(),
        }
    }

    /// Creates a painless script.
    pub fn painless(source: impl Into<String>) -> Self {
        Self::new(source).with_lang("painless")
    }

    /// Sets the script language.
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Binds a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replaces all parameters.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Returns the script in the cluster's JSON form.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn approximate_size(&self) -> usize {
        serde_json::to_string(self).map_or(self.source.len(), |s| s.len())
    }
}

/// The body of an update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateBody {
    /// Partial document merged into the stored one.
    Doc(DocumentBody),
    /// Script run against the stored document.
    Script(Script),
}

/// The operation a record performs, with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Store a full document.
    Index {
        /// Full document.
        body: DocumentBody,
        /// Fail with a conflict when the id already exists instead of
        /// overwriting.
        creation_only: bool,
    },

    /// Modify a stored document.
    Update {
        /// Partial document or script.
        body: UpdateBody,
        /// Insert the partial document when the id does not exist yet.
        upsert_on_missing: bool,
        /// Conflict retries performed by the cluster.
        retry_on_conflict: u32,
    },

    /// Remove a document.
    Delete,
}

/// The kind of a mutation, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OperationKind {
    Index,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Index => write!(f, "index"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// One document write.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    /// Target index.
    pub index: String,

    /// Document id. `None` lets the cluster assign one (index only).
    pub id: Option<String>,

    /// What to do.
    pub mutation: Mutation,
}

impl MutationRecord {
    /// Indexes a document, overwriting any existing one with the same id.
    pub fn index_doc(index: impl Into<String>, id: Option<String>, body: DocumentBody) -> Self {
        Self {
            index: index.into(),
            id,
            mutation: Mutation::Index {
                body,
                creation_only: false,
            },
        }
    }

    /// Indexes a document only if the id does not exist yet.
    pub fn create_doc(index: impl Into<String>, id: Option<String>, body: DocumentBody) -> Self {
        Self {
            index: index.into(),
            id,
            mutation: Mutation::Index {
                body,
                creation_only: true,
            },
        }
    }

    /// Merges a partial document into a stored one.
    pub fn update_doc(
        index: impl Into<String>,
        id: impl Into<String>,
        body: DocumentBody,
        upsert_on_missing: bool,
    ) -> Self {
        Self {
            index: index.into(),
            id: Some(id.into()),
            mutation: Mutation::Update {
                body: UpdateBody::Doc(body),
                upsert_on_missing,
                retry_on_conflict: DEFAULT_RETRY_ON_CONFLICT,
            },
        }
    }

    /// Runs a script against a stored document.
    pub fn update_script(index: impl Into<String>, id: impl Into<String>, script: Script) -> Self {
        Self {
            index: index.into(),
            id: Some(id.into()),
            mutation: Mutation::Update {
                body: UpdateBody::Script(script),
                upsert_on_missing: false,
                retry_on_conflict: DEFAULT_RETRY_ON_CONFLICT,
            },
        }
    }

    /// Deletes a document.
    pub fn delete(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id: Some(id.into()),
            mutation: Mutation::Delete,
        }
    }

    /// Overrides the server-side conflict retries of an update.
    ///
    /// Has no effect on index and delete records.
    pub fn with_retry_on_conflict(mut self, retries: u32) -> Self {
        if let Mutation::Update {
            retry_on_conflict, ..
        } = &mut self.mutation
        {
            *retry_on_conflict = retries;
        }
        self
    }

    /// Returns the operation kind.
    pub fn operation(&self) -> OperationKind {
        match self.mutation {
            Mutation::Index { .. } => OperationKind::Index,
            Mutation::Update { .. } => OperationKind::Update,
            Mutation::Delete => OperationKind::Delete,
        }
    }

    /// Returns true for an index record that must not overwrite.
    pub fn is_creation_only(&self) -> bool {
        matches!(
            self.mutation,
            Mutation::Index {
                creation_only: true,
                ..
            }
        )
    }

    /// Estimated request size: payload bytes plus the action line.
    pub fn approximate_size(&self) -> usize {
        let payload = match &self.mutation {
            Mutation::Index { body, .. } => body.len(),
            Mutation::Update {
                body: UpdateBody::Doc(body),
                ..
            } => body.len(),
            Mutation::Update {
                body: UpdateBody::Script(script),
                ..
            } => script.approximate_size(),
            Mutation::Delete => 0,
        };
        payload + ACTION_OVERHEAD_BYTES
    }

    /// Checks that the record can be sent.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.index.is_empty() {
            return Err(IndexerError::InvalidRequest {
                message: format!("{} record has an empty index name", self.operation()),
            });
        }

        if self.id.is_none() && self.operation() != OperationKind::Index {
            return Err(IndexerError::InvalidRequest {
                message: format!(
                    "{} record for index '{}' requires a document id",
                    self.operation(),
                    self.index
                ),
            });
        }

        Ok(())
    }
}
