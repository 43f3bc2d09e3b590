//! Unistore Core
//!
//! Storage-agnostic persistence: one query and aggregation IR, compiled for a
//! SQL row store or a JSON document store behind the same [`Database`]
//! contract.
//!
//! # Architecture
//!
//! - **Query IR**: [`QueryNode`] trees compile to SQL fragments, document
//!   filters and pipeline `$match` stages
//! - **Aggregation IR**: metric and bucket [`Aggregation`]s compile to grouped
//!   SQL or one faceted pipeline; both feed the same result assembly
//! - **Table Model**: [`Entity`] declarations become cached [`TableModel`]s
//! - **Backends**: [`RowStore`] (libsql, SQL dialects) and [`DocumentStore`]
//!   (HTTP or in-memory transport)
//! - **Repository**: typed CRUD over one entity's table
//!
//! # Modules
//!
//! - [`query`] - filter IR and its compilers
//! - [`aggregation`] - aggregation IR, compilers and results
//! - [`schema`] - entity declaration and table models
//! - [`record`] - records and the record builder
//! - [`db`] - database contract, errors and backends
//! - [`repository`] - entity repositories
//! - [`config`] - backend configuration

pub mod aggregation;
pub mod config;
pub mod context;
pub mod db;
pub mod dialect;
pub mod query;
pub mod record;
pub mod repository;
pub mod schema;
mod value;

// Re-export commonly used types
pub use aggregation::{
    Aggregation, AggregationResult, AggregationValue, Bucket, BucketOrder, CompositeAggregation,
    CompositeSource, DateHistogramAggregation, MetricAggregation, MetricKind, SortDirection,
    SqlAggregation, TermsAggregation,
};
pub use config::{DatabaseConfig, DocumentStoreConfig, RowStoreConfig};
pub use context::{CallContext, CancelHandle};
pub use db::{
    connect, with_tx, CreateOption, Database, DatabaseError, DocumentStore, KeyMap, QueryOptions,
    RowStore, Transaction,
};
pub use dialect::{DateUnit, Dialect};
pub use query::{BoolQuery, CompileError, QueryNode, RangeQuery, SqlFragment};
pub use record::{Record, RecordBuilder, RecordError};
pub use repository::{EntityStore, Key, Repository, TxRepository};
pub use schema::{
    Entity, FieldDefinition, FieldKind, FieldSpec, IndexDefinition, SchemaError, SemanticType,
    TableModel, TableModelBuilder,
};
