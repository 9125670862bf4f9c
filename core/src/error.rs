// src/error.rs
//! Error kinds surfaced through the collection facade.
//!
//! Cross-index atomicity (see `index_set.rs`) is enforced locally via
//! rollback before any error reaches here; everything else propagates
//! straight through the executor's completion channel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// `ensureIndex` called without a field name.
    #[error("missing field name")]
    MissingField,

    /// An insert or update would create a duplicate key in a unique index.
    #[error("unique constraint violated on index '{index}' for key {key}")]
    UniqueViolation { index: String, key: String },

    /// Structural validation failed (e.g. a reserved `$`-prefixed top-level key).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// `$skip`/`$limit`/`$sort` failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Propagated unchanged from the persistence collaborator.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}
