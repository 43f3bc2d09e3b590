//! Database Error Types
//!
//! Every [`Database`](super::Database) operation fails with a [`DatabaseError`].
//! Not-found and conflict outcomes are distinct variants so callers can branch
//! on them without matching message text; driver and transport failures are
//! wrapped with the operation and table they occurred in.

use crate::query::CompileError;
use crate::record::RecordError;
use crate::schema::SchemaError;
use thiserror::Error;

/// Boxed driver/transport error
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Lookup found nothing
    #[error("record not found")]
    NotFound,

    /// Primary-key collision on a create without a conflict modifier
    #[error("Primary key conflict on table '{table}'")]
    Conflict { table: String },

    /// Target table/collection does not exist
    #[error("Table '{table}' does not exist")]
    TableNotFound { table: String },

    /// Batch key and payload lists differ in length
    #[error("Batch length mismatch: {keys} keys for {records} records")]
    LengthMismatch { keys: usize, records: usize },

    #[error("ignore-conflict and update-on-conflict cannot be combined")]
    ConflictingCreateOptions,

    #[error("nested transactions not supported")]
    NestedTransaction,

    /// Primary-key map does not match the table's primary key
    #[error("Invalid key for table '{table}': {reason}")]
    InvalidKey { table: String, reason: String },

    /// Operation needs a migrated model (primary key) the backend does not know
    #[error("No table model registered for '{table}'; migrate it first")]
    UnknownTable { table: String },

    /// Document-store batch stopped at the first failing item
    #[error("Batch on table '{table}' stopped after {applied} applied items: {source}")]
    PartialBatch {
        table: String,
        applied: usize,
        #[source]
        source: Box<DatabaseError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Driver or transport failure
    #[error("{operation} on '{table}' failed: {source}")]
    Backend {
        operation: &'static str,
        table: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl DatabaseError {
    /// Wrap a driver/transport error with operation and table context
    pub fn backend(
        operation: &'static str,
        table: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Backend {
            operation,
            table: table.into(),
            source: source.into(),
        }
    }

    pub fn conflict(table: impl Into<String>) -> Self {
        Self::Conflict {
            table: table.into(),
        }
    }

    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    pub fn invalid_key(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict { .. })
    }
}
