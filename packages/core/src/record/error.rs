//! Record Error Types

use crate::schema::SchemaError;
use thiserror::Error;

/// Errors raised while building a record from an entity or decoding one back
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Failed to encode entity: {0}")]
    Encode(String),

    #[error("Failed to decode record into '{type_name}': {reason}")]
    Decode { type_name: String, reason: String },

    #[error("Expected a JSON object, found {found}")]
    NotAnObject { found: String },

    #[error("Cannot convert field '{field}' to {expected}: {reason}")]
    Coercion {
        field: String,
        expected: String,
        reason: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl RecordError {
    pub fn coercion(
        field: impl Into<String>,
        expected: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Coercion {
            field: field.into(),
            expected: expected.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        RecordError::Encode(err.to_string())
    }
}
