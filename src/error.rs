//! Error taxonomy for the album store.

use crate::db::fields::FieldType;

/// Every failure a store operation can surface.
///
/// Operations either fully succeed or return one of these; partial
/// application is never visible to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("an album named '{0}' already exists")]
    DuplicateAlbumName(String),

    #[error("album '{0}' not found")]
    AlbumNotFound(String),

    #[error("field '{field}' not found in album '{album}'")]
    FieldNotFound { album: String, field: String },

    #[error("field '{field}' already exists in album '{album}'")]
    DuplicateFieldName { album: String, field: String },

    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("field type {0} is reserved and cannot be used for user fields")]
    ReservedFieldType(FieldType),

    #[error("value for field '{field}' does not fit the album schema: {reason}")]
    SchemaMismatch { field: String, reason: String },

    #[error("item {id} not found in album '{album}'")]
    ItemNotFound { album: String, id: i64 },

    #[error("album '{0}' does not support pictures")]
    PicturesDisabled(String),

    #[error("operator '{operator}' is not supported for field '{field}' of type {field_type}")]
    UnsupportedOperator {
        operator: &'static str,
        field: String,
        field_type: FieldType,
    },

    #[error("query for album '{0}' was built against an older schema")]
    StaleQuery(String),

    #[error("raw query rejected: {0}")]
    RawQueryRejected(String),

    #[error("store is corrupt: {0}")]
    CorruptStore(String),

    #[error("migration '{migration}' violated an invariant: {detail}")]
    InvariantViolated { migration: String, detail: String },

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn field_not_found(album: &str, field: &str) -> Self {
        StoreError::FieldNotFound {
            album: album.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn mismatch(field: &str, expected: FieldType, reason: impl Into<String>) -> Self {
        StoreError::SchemaMismatch {
            field: field.to_string(),
            reason: format!("expected {}, {}", expected, reason.into()),
        }
    }

    pub(crate) fn unknown_field(album: &str, field: &str) -> Self {
        StoreError::SchemaMismatch {
            field: field.to_string(),
            reason: format!("album '{}' has no such field", album),
        }
    }
}
