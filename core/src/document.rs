// src/document.rs
//! The document type and the handful of pure functions the engine needs
//! over it: dotted-path lookup/assignment, deep clone (`Clone`), structural
//! equality (`PartialEq`), and structural validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::{DbError, Result};
use crate::id::generate_id;

/// Opaque document identifier. Always the 16-character form spec'd for
/// this engine - there is no int/ObjectId union here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

/// A tree-structured record. Every document handed to a caller, and every
/// document committed to an index, is a deep copy - `Clone` on `Value` is
/// already a deep copy, so ordinary `.clone()` gives I5 for free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl Document {
    pub fn new(id: DocumentId, fields: HashMap<String, Value>) -> Self {
        Document { id, fields }
    }

    /// Prepare a caller-supplied document for insertion: assign a fresh
    /// `_id` if absent, otherwise keep the caller's.
    ///
    /// Open question in spec.md §9 ("prepareDocumentForInsertion always
    /// overwrites _id") resolved here: a caller-supplied `_id` is kept.
    /// See DESIGN.md.
    pub fn prepare_for_insert(mut value: Value) -> Result<Document> {
        let obj = value.as_object_mut().ok_or_else(|| {
            DbError::InvalidDocument("document must be a JSON object".to_string())
        })?;

        let id = match obj.remove("_id") {
            Some(Value::String(s)) if !s.is_empty() => DocumentId(s),
            Some(other) => {
                return Err(DbError::InvalidDocument(format!(
                    "_id must be a non-empty string, got {other}"
                )))
            }
            None => DocumentId(generate_id()),
        };

        let fields: HashMap<String, Value> = obj.into_iter().map(|(k, v)| (k, v.clone())).collect();
        let doc = Document::new(id, fields);
        validate(&doc)?;
        Ok(doc)
    }

    /// Dotted-path lookup: `"address.city"` reaches into nested objects,
    /// `"items.0"` indexes arrays.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        if path == "_id" {
            return None; // _id is resolved separately by callers that need it
        }
        if !path.contains('.') {
            return self.fields.get(path);
        }
        let mut parts = path.split('.');
        let mut value = self.fields.get(parts.next().unwrap())?;
        for part in parts {
            value = get_one(value, part)?;
        }
        Some(value)
    }

    pub fn get_id_value(&self) -> Value {
        Value::String(self.id.0.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Render this document as a single JSON object, `_id` included, the
    /// shape callers of `find`/`findOne` actually see.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("_id".to_string(), Value::String(self.id.0.clone()));
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

fn get_one<'a>(value: &'a Value, part: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(part),
        Value::Array(arr) => part.parse::<usize>().ok().and_then(|i| arr.get(i)),
        _ => None,
    }
}

/// Structural validation: reject reserved top-level keys. Mongo-style
/// engines reject `$`-prefixed and `.`-containing top-level field names
/// because they collide with operator/path syntax.
pub fn validate(doc: &Document) -> Result<()> {
    for key in doc.fields.keys() {
        if key.starts_with('$') {
            return Err(DbError::InvalidDocument(format!(
                "field names cannot start with '$': {key}"
            )));
        }
        if key.contains('.') {
            return Err(DbError::InvalidDocument(format!(
                "field names cannot contain '.': {key}"
            )));
        }
    }
    Ok(())
}
