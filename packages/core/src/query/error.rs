//! IR Compilation Error Types
//!
//! Shared by the query and aggregation compilers. A compilation error always
//! aborts the whole tree; no partial SQL or payload is ever returned.

use thiserror::Error;

/// Errors raised while validating or compiling a query/aggregation tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Field name is empty or not a safe identifier/path
    #[error("Invalid field identifier '{field}'")]
    InvalidField { field: String },

    /// `min_should_match` must be a positive integer no larger than `should.len()`
    #[error("minimum_should_match {value} must be between 1 and {should} (number of should clauses)")]
    InvalidMinShouldMatch { value: usize, should: usize },

    /// Two sibling aggregations share a name
    #[error("Duplicate aggregation name '{name}' at the same level")]
    DuplicateAggregationName { name: String },

    /// A field-bearing aggregation has no field
    #[error("Aggregation '{name}' requires a field")]
    MissingField { name: String },

    /// Aggregation is structurally invalid (bad name, order key, size, sources)
    #[error("Invalid aggregation '{name}': {reason}")]
    InvalidAggregation { name: String, reason: String },

    /// The target engine has no way to express this node
    #[error("{feature} is not supported by {dialect}")]
    Unsupported { feature: String, dialect: String },
}

impl CompileError {
    pub fn invalid_field(field: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
        }
    }

    pub fn unsupported(feature: impl Into<String>, dialect: impl ToString) -> Self {
        Self::Unsupported {
            feature: feature.into(),
            dialect: dialect.to_string(),
        }
    }

    pub fn invalid_aggregation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAggregation {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a field reference used by any compiler
///
/// Accepts identifiers and dotted paths (`address.city`); rejects anything that
/// could break out of a SQL identifier or a document field path.
pub(crate) fn validate_field(field: &str) -> Result<(), CompileError> {
    let valid = !field.is_empty()
        && field.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if valid {
        Ok(())
    } else {
        Err(CompileError::invalid_field(field))
    }
}
