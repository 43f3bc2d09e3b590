//! Schema Error Types

use thiserror::Error;

/// Errors raised while building or validating a [`TableModel`](super::TableModel)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The entity's value does not serialize to an object (e.g. `None`, a scalar)
    #[error("Cannot build a table model from '{type_name}': value is not a struct")]
    NotAStruct { type_name: String },

    /// A field tag does not follow the tag grammar
    #[error("Invalid tag '{tag}' on field '{field}': {reason}")]
    InvalidTag {
        field: String,
        tag: String,
        reason: String,
    },

    /// A declared field is absent from the entity's serialized form
    #[error("Field '{field}' is declared but not serialized by '{type_name}'")]
    UndeclaredField { type_name: String, field: String },

    /// Primary key or index refers to a field the model does not define
    #[error("{context} on table '{table}' refers to unknown field '{field}'")]
    UnknownField {
        table: String,
        field: String,
        context: String,
    },

    #[error("Duplicate field '{field}' on table '{table}'")]
    DuplicateField { table: String, field: String },

    #[error("Table '{table}' has no primary key")]
    MissingPrimaryKey { table: String },

    #[error("Invalid table name '{table}'")]
    InvalidTableName { table: String },
}

impl SchemaError {
    pub fn invalid_tag(
        field: impl Into<String>,
        tag: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTag {
            field: field.into(),
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_field(
        table: impl Into<String>,
        field: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::UnknownField {
            table: table.into(),
            field: field.into(),
            context: context.into(),
        }
    }
}
