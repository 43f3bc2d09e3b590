//! Database Contract
//!
//! One CRUD, batch, query, aggregation and transaction contract implemented by
//! every backend. Callers hold an `Arc<dyn Database>` and never see backend
//! payloads.
//!
//! # Examples
//!
//! ```rust,no_run
//! use serde_json::json;
//! use unistore_core::db::{with_tx, Database, QueryOptions};
//! use unistore_core::{CallContext, QueryNode, RecordBuilder};
//!
//! # async fn example(db: &dyn Database) -> Result<(), unistore_core::DatabaseError> {
//! let ctx = CallContext::background();
//!
//! let paid = db
//!     .find(
//!         &ctx,
//!         "orders",
//!         &QueryNode::term("status", json!("paid")),
//!         &QueryOptions::new().order_by("amount").desc().limit(20),
//!     )
//!     .await?;
//!
//! let tx_ctx = ctx.clone();
//! with_tx(db, &ctx, move |tx| {
//!     Box::pin(async move {
//!         let record = RecordBuilder::new()
//!             .from_value(json!({"id": "o-1", "status": "open", "amount": 10}))?;
//!         tx.create(&tx_ctx, "orders", record, &[]).await
//!     })
//! })
//! .await?;
//! # let _ = paid;
//! # Ok(())
//! # }
//! ```

use super::DatabaseError;
use crate::aggregation::{Aggregation, AggregationResult};
use crate::context::CallContext;
use crate::query::{validate_field, QueryNode};
use crate::record::{Record, RecordBuilder};
use crate::schema::TableModel;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

/// Primary-key map: primary-key column -> value
pub type KeyMap = Map<String, Value>;

/// Conflict-resolution modifier for `create`/`batch_create`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOption {
    /// Leave the existing row/document untouched on primary-key collision
    IgnoreConflict,
    /// Overwrite the existing row/document on primary-key collision
    UpdateOnConflict,
}

/// Resolved conflict behaviour of one create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictMode {
    Fail,
    Ignore,
    Overwrite,
}

impl ConflictMode {
    pub(crate) fn from_options(options: &[CreateOption]) -> Result<Self> {
        let ignore = options.contains(&CreateOption::IgnoreConflict);
        let update = options.contains(&CreateOption::UpdateOnConflict);
        match (ignore, update) {
            (true, true) => Err(DatabaseError::ConflictingCreateOptions),
            (true, false) => Ok(ConflictMode::Ignore),
            (false, true) => Ok(ConflictMode::Overwrite),
            (false, false) => Ok(ConflictMode::Fail),
        }
    }
}

/// Ordering and paging for `find`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub order_by: Option<String>,
    #[serde(default)]
    pub order_desc: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn desc(mut self) -> Self {
        self.order_desc = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(field) = &self.order_by {
            validate_field(field)?;
        }
        Ok(())
    }
}

/// Storage backend contract
///
/// Implementations are safe to share between tasks. Every operation checks the
/// [`CallContext`] before touching the backend and races each backend call
/// against its deadline and cancellation.
#[async_trait]
pub trait Database: Send + Sync {
    /// Short backend name for logs (`"sqlite"`, `"document"`, ...)
    fn backend_name(&self) -> &'static str;

    /// Create the table/collection and its indexes if absent
    async fn migrate(&self, ctx: &CallContext, model: &TableModel) -> Result<()>;

    /// Insert one record, resolving primary-key collisions per `options`
    async fn create(
        &self,
        ctx: &CallContext,
        table: &str,
        record: Record,
        options: &[CreateOption],
    ) -> Result<()>;

    /// Fetch by primary key; `NotFound` when absent
    async fn get(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<Record>;

    /// Overwrite the given fields of the record at `key`; `NotFound` when absent
    async fn update(
        &self,
        ctx: &CallContext,
        table: &str,
        key: &KeyMap,
        record: Record,
    ) -> Result<()>;

    /// Delete by primary key; `NotFound` when absent
    async fn delete(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<()>;

    async fn find(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        options: &QueryOptions,
    ) -> Result<Vec<Record>>;

    /// Run `aggregations` over the records matching `query`
    async fn aggregate(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult>;

    async fn batch_create(
        &self,
        ctx: &CallContext,
        table: &str,
        records: Vec<Record>,
        options: &[CreateOption],
    ) -> Result<()>;

    /// Update `records[i]` at `keys[i]`; fails with `LengthMismatch` before any
    /// backend call when the lists differ in length
    async fn batch_update(
        &self,
        ctx: &CallContext,
        table: &str,
        keys: &[KeyMap],
        records: Vec<Record>,
    ) -> Result<()>;

    async fn batch_delete(&self, ctx: &CallContext, table: &str, keys: &[KeyMap]) -> Result<()>;

    /// Drop the table/collection; succeeds when it does not exist
    async fn drop_table(&self, ctx: &CallContext, table: &str) -> Result<()>;

    /// Start a unit of work. Fails with `NestedTransaction` on a transaction.
    async fn begin_tx(&self, ctx: &CallContext) -> Result<Box<dyn Transaction>>;

    fn get_builder(&self) -> RecordBuilder {
        RecordBuilder::new()
    }

    async fn close(&self) -> Result<()>;
}

/// Unit of work returned by [`Database::begin_tx`]
///
/// Owned by the caller that began it; not for concurrent use. Row-store
/// transactions are native transactions. Document-store transactions queue
/// writes and flush them in order on commit without atomicity or isolation.
#[async_trait]
pub trait Transaction: Database {
    /// Identifier used in logs
    fn id(&self) -> &str;

    /// This transaction as a plain [`Database`] handle
    fn as_database(&self) -> &dyn Database;

    async fn commit(self: Box<Self>, ctx: &CallContext) -> Result<()>;

    async fn rollback(self: Box<Self>, ctx: &CallContext) -> Result<()>;
}

/// Run `f` in a transaction: commit on `Ok`, roll back on `Err`
///
/// The future returned by `f` borrows only the transaction, so anything else it
/// uses has to be moved in.
pub async fn with_tx<T, F>(db: &dyn Database, ctx: &CallContext, f: F) -> Result<T>
where
    F: for<'t> FnOnce(&'t dyn Transaction) -> BoxFuture<'t, Result<T>>,
{
    let tx = db.begin_tx(ctx).await?;
    let outcome = f(tx.as_ref()).await;

    match outcome {
        Ok(value) => {
            tx.commit(ctx).await?;
            Ok(value)
        }
        Err(err) => {
            let id = tx.id().to_string();
            if let Err(rollback_err) = tx.rollback(ctx).await {
                tracing::warn!("Rollback of transaction {} failed: {}", id, rollback_err);
            }
            Err(err)
        }
    }
}

/// Fail with `LengthMismatch` unless every key has a record
pub(crate) fn check_batch_lengths(keys: &[KeyMap], records: &[Record]) -> Result<()> {
    if keys.len() != records.len() {
        return Err(DatabaseError::LengthMismatch {
            keys: keys.len(),
            records: records.len(),
        });
    }
    Ok(())
}

/// Key columns in primary-key order when the model is known, else map order
pub(crate) fn key_columns(
    table: &str,
    model: Option<&TableModel>,
    key: &KeyMap,
) -> Result<Vec<(String, Value)>> {
    if key.is_empty() {
        return Err(DatabaseError::invalid_key(table, "empty key"));
    }
    for column in key.keys() {
        validate_field(column)?;
    }

    match model.filter(|m| m.has_primary_key()) {
        Some(model) => {
            if key.len() != model.primary_key.len() {
                return Err(DatabaseError::invalid_key(
                    table,
                    format!("expected fields {:?}", model.primary_key),
                ));
            }
            model
                .primary_key
                .iter()
                .map(|column| {
                    key.get(column)
                        .map(|value| (column.clone(), value.clone()))
                        .ok_or_else(|| {
                            DatabaseError::invalid_key(table, format!("missing '{column}'"))
                        })
                })
                .collect()
        }
        None => Ok(key
            .iter()
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()),
    }
}
