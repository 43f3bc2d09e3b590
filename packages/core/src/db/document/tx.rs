//! Queued document-store transaction

use super::ops::{DocumentOps, PendingWrite};
use super::transport::DocumentTransport;
use crate::aggregation::{Aggregation, AggregationResult};
use crate::context::CallContext;
use crate::db::catalog::Catalog;
use crate::db::database::{
    check_batch_lengths, ConflictMode, CreateOption, Database, KeyMap, QueryOptions, Result,
    Transaction,
};
use crate::db::DatabaseError;
use crate::query::QueryNode;
use crate::record::Record;
use crate::schema::TableModel;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Unit of work over a document store
///
/// Writes are validated when issued and queued; `commit` sends them in order
/// and stops at the first failure, reporting the applied prefix through
/// `PartialBatch`. Nothing is isolated: reads see the store as it is, not the
/// queued writes. `migrate` and `drop_table` run immediately.
pub struct DocumentTransaction {
    id: String,
    transport: Arc<dyn DocumentTransport>,
    catalog: Arc<Catalog>,
    pending: Mutex<Vec<PendingWrite>>,
    finished: bool,
}

impl DocumentTransaction {
    pub(crate) fn new(transport: Arc<dyn DocumentTransport>, catalog: Arc<Catalog>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            transport,
            catalog,
            pending: Mutex::new(Vec::new()),
            finished: false,
        }
    }

    fn ops(&self) -> DocumentOps<'_> {
        DocumentOps {
            transport: self.transport.as_ref(),
            catalog: &self.catalog,
        }
    }

    fn enqueue(&self, ctx: &CallContext, writes: Vec<PendingWrite>) -> Result<()> {
        ctx.check()?;
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.extend(writes);
        Ok(())
    }

    fn take_pending(&self) -> Vec<PendingWrite> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending)
    }

    /// Number of writes waiting for commit
    pub fn pending_writes(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for DocumentTransaction {
    fn drop(&mut self) {
        if !self.finished {
            let pending = self.pending_writes();
            tracing::warn!(
                "Transaction {} dropped without commit or rollback; {} queued writes discarded",
                self.id,
                pending
            );
        }
    }
}

#[async_trait]
impl Database for DocumentTransaction {
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
        let write = self.ops().create_write(table, record, mode)?;
        self.enqueue(ctx, vec![write])
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
        let write = self.ops().update_write(table, key, record)?;
        self.enqueue(ctx, vec![write])
    }

    async fn delete(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<()> {
        let write = self.ops().delete_write(table, key)?;
        self.enqueue(ctx, vec![write])
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
        let ops = self.ops();
        let writes = records
            .into_iter()
            .map(|record| ops.create_write(table, record, mode))
            .collect::<Result<Vec<_>>>()?;
        self.enqueue(ctx, writes)
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
        self.enqueue(ctx, writes)
    }

    async fn batch_delete(&self, ctx: &CallContext, table: &str, keys: &[KeyMap]) -> Result<()> {
        let ops = self.ops();
        let writes = keys
            .iter()
            .map(|key| ops.delete_write(table, key))
            .collect::<Result<Vec<_>>>()?;
        self.enqueue(ctx, writes)
    }

    async fn drop_table(&self, ctx: &CallContext, table: &str) -> Result<()> {
        self.ops().drop_table(ctx, table).await
    }

    async fn begin_tx(&self, _ctx: &CallContext) -> Result<Box<dyn Transaction>> {
        Err(DatabaseError::NestedTransaction)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Transaction for DocumentTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_database(&self) -> &dyn Database {
        self
    }

    async fn commit(mut self: Box<Self>, ctx: &CallContext) -> Result<()> {
        self.finished = true;
        let writes = self.take_pending();
        let count = writes.len();
        self.ops().apply_all(ctx, writes).await?;
        tracing::debug!("Committed transaction {} ({} writes)", self.id, count);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>, _ctx: &CallContext) -> Result<()> {
        self.finished = true;
        let discarded = self.take_pending().len();
        tracing::debug!(
            "Rolled back transaction {} ({} queued writes discarded)",
            self.id,
            discarded
        );
        Ok(())
    }
}
