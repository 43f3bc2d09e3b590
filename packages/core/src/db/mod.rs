//! Database Layer
//!
//! One [`Database`] contract with two backends:
//!
//! - [`RowStore`] - SQL through a generic driver seam ([`sql::SqlDriver`]), with
//!   libsql as the bundled driver
//! - [`DocumentStore`] - JSON documents through a transport seam
//!   ([`document::DocumentTransport`]), over HTTP or in memory
//!
//! Both compile the same query and aggregation IR and return the same
//! [`Record`](crate::Record)s, results and errors.

mod catalog;
mod database;
pub mod document;
mod error;
pub mod sql;

pub use database::{with_tx, CreateOption, Database, KeyMap, QueryOptions, Transaction};
pub use document::DocumentStore;
pub use error::{BoxError, DatabaseError};
pub use sql::RowStore;

use crate::config::DatabaseConfig;
use std::sync::Arc;

/// Build the configured backend
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Database>, DatabaseError> {
    config.validate().map_err(DatabaseError::configuration)?;
    let db: Arc<dyn Database> = match config {
        DatabaseConfig::RowStore(row) => Arc::new(RowStore::from_config(row).await?),
        DatabaseConfig::DocumentStore(document) => Arc::new(DocumentStore::from_config(document)?),
    };
    tracing::debug!("Connected {} backend", db.backend_name());
    Ok(db)
}
