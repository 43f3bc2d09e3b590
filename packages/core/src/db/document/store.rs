//! Document Store
//!
//! [`Database`] over a [`DocumentTransport`]. Documents carry the primary key in
//! `_id` (the bare value for single-column keys, an object of the key fields
//! otherwise), so creates need the table to be migrated first.
//!
//! Batches are ordered and best-effort: they stop at the first failing item and
//! report how many items were applied through `PartialBatch`.

use super::http::HttpTransport;
use super::memory::MemoryTransport;
use super::ops::DocumentOps;
use super::transport::DocumentTransport;
use super::tx::DocumentTransaction;
use crate::aggregation::{Aggregation, AggregationResult};
use crate::config::DocumentStoreConfig;
use crate::context::CallContext;
use crate::db::catalog::Catalog;
use crate::db::database::{
    check_batch_lengths, ConflictMode, CreateOption, Database, KeyMap, QueryOptions, Result,
    Transaction,
};
use crate::db::DatabaseError;
use crate::query::{validate_field, QueryNode};
use crate::record::Record;
use crate::schema::TableModel;
use async_trait::async_trait;
use std::sync::Arc;

/// Document-store backend
pub struct DocumentStore {
    transport: Arc<dyn DocumentTransport>,
    catalog: Arc<Catalog>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

impl DocumentStore {
    pub fn new(transport: Arc<dyn DocumentTransport>) -> Self {
        Self {
            transport,
            catalog: Arc::new(Catalog::new()),
        }
    }

    /// Document store kept in process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTransport::new()))
    }

    /// Document store reached over HTTP
    pub fn from_config(config: &DocumentStoreConfig) -> Result<Self> {
        let transport = HttpTransport::new(config).map_err(|e| {
            DatabaseError::configuration(format!("cannot build document transport: {e}"))
        })?;
        tracing::debug!("Document store at {}", config.base_url);
        Ok(Self::new(Arc::new(transport)))
    }

    fn ops(&self) -> DocumentOps<'_> {
        DocumentOps {
            transport: self.transport.as_ref(),
            catalog: &self.catalog,
        }
    }
}

#[async_trait]
impl Database for DocumentStore {
    fn backend_name(&self) -> &'static str {
        "document"
    }

    async fn migrate(&self, ctx: &CallContext, model: &TableModel) -> Result<()> {
        self.ops().migrate(ctx, model).await
    }

    async fn create(
        &self,
        ctx: &CallContext,
        table: &str,
        record: Record,
        options: &[CreateOption],
    ) -> Result<()> {
        let mode = ConflictMode::from_options(options)?;
        let ops = self.ops();
        let write = ops.create_write(table, record, mode)?;
        ops.apply(ctx, write).await
    }

    async fn get(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<Record> {
        self.ops().get(ctx, table, key).await
    }

    async fn update(
        &self,
        ctx: &CallContext,
        table: &str,
        key: &KeyMap,
        record: Record,
    ) -> Result<()> {
        let ops = self.ops();
        let write = ops.update_write(table, key, record)?;
        ops.apply(ctx, write).await
    }

    async fn delete(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<()> {
        let ops = self.ops();
        let write = ops.delete_write(table, key)?;
        ops.apply(ctx, write).await
    }

    async fn find(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.ops().find(ctx, table, query, options).await
    }

    async fn aggregate(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult> {
        self.ops().aggregate(ctx, table, query, aggregations).await
    }

    async fn batch_create(
        &self,
        ctx: &CallContext,
        table: &str,
        records: Vec<Record>,
        options: &[CreateOption],
    ) -> Result<()> {
        let mode = ConflictMode::from_options(options)?;
        validate_field(table)?;
        if records.is_empty() {
            return Ok(());
        }

        let ops = self.ops();
        let writes = records
            .into_iter()
            .map(|record| ops.create_write(table, record, mode))
            .collect::<Result<Vec<_>>>()?;

        match mode {
            ConflictMode::Fail => ops.insert_many(ctx, table, writes).await,
            ConflictMode::Ignore | ConflictMode::Overwrite => ops.apply_all(ctx, writes).await,
        }
    }

    async fn batch_update(
        &self,
        ctx: &CallContext,
        table: &str,
        keys: &[KeyMap],
        records: Vec<Record>,
    ) -> Result<()> {
        check_batch_lengths(keys, &records)?;
        let ops = self.ops();
        let writes = keys
            .iter()
            .zip(records)
            .map(|(key, record)| ops.update_write(table, key, record))
            .collect::<Result<Vec<_>>>()?;
        ops.apply_all(ctx, writes).await
    }

    async fn batch_delete(&self, ctx: &CallContext, table: &str, keys: &[KeyMap]) -> Result<()> {
        let ops = self.ops();
        let writes = keys
            .iter()
            .map(|key| ops.delete_write(table, key))
            .collect::<Result<Vec<_>>>()?;
        ops.apply_all(ctx, writes).await
    }

    async fn drop_table(&self, ctx: &CallContext, table: &str) -> Result<()> {
        self.ops().drop_table(ctx, table).await
    }

    async fn begin_tx(&self, ctx: &CallContext) -> Result<Box<dyn Transaction>> {
        ctx.check()?;
        let tx = DocumentTransaction::new(self.transport.clone(), self.catalog.clone());
        tracing::debug!("Began transaction {}", tx.id());
        Ok(Box::new(tx))
    }

    async fn close(&self) -> Result<()> {
        self.transport
            .close()
            .await
            .map_err(|e| DatabaseError::backend("close", "", e))
    }
}
