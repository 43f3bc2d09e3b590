//! Native row-store transaction

use super::driver::SqlConnection;
use super::ops::SqlOps;
use crate::aggregation::{Aggregation, AggregationResult};
use crate::context::CallContext;
use crate::db::catalog::Catalog;
use crate::db::database::{
    check_batch_lengths, ConflictMode, CreateOption, Database, KeyMap, QueryOptions, Result,
    Transaction,
};
use crate::db::DatabaseError;
use crate::dialect::Dialect;
use crate::query::QueryNode;
use crate::record::Record;
use crate::schema::TableModel;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// One native transaction on a dedicated connection
///
/// DDL (`migrate`, `drop_table`) commits implicitly on dialects without
/// transactional DDL; rolling back afterwards does not undo it.
pub struct RowTransaction {
    id: String,
    conn: Box<dyn SqlConnection>,
    dialect: Dialect,
    catalog: Arc<Catalog>,
    finished: bool,
}

impl RowTransaction {
    pub(crate) fn new(conn: Box<dyn SqlConnection>, dialect: Dialect, catalog: Arc<Catalog>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conn,
            dialect,
            catalog,
            finished: false,
        }
    }

    fn ops(&self) -> SqlOps<'_> {
        SqlOps {
            conn: self.conn.as_ref(),
            dialect: self.dialect,
            catalog: &self.catalog,
            in_tx: true,
        }
    }
}

impl Drop for RowTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "Transaction {} dropped without commit or rollback; the connection discards it",
                self.id
            );
        }
    }
}

#[async_trait]
impl Database for RowTransaction {
    fn backend_name(&self) -> &'static str {
        self.dialect.as_str()
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
        self.ops().create(ctx, table, record, mode).await
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
        self.ops().update(ctx, table, key, record).await
    }

    async fn delete(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<()> {
        self.ops().delete(ctx, table, key).await
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
        self.ops().batch_create(ctx, table, records, mode).await
    }

    async fn batch_update(
        &self,
        ctx: &CallContext,
        table: &str,
        keys: &[KeyMap],
        records: Vec<Record>,
    ) -> Result<()> {
        check_batch_lengths(keys, &records)?;
        self.ops().batch_update(ctx, table, keys, records).await
    }

    async fn batch_delete(&self, ctx: &CallContext, table: &str, keys: &[KeyMap]) -> Result<()> {
        self.ops().batch_delete(ctx, table, keys).await
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
impl Transaction for RowTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_database(&self) -> &dyn Database {
        self
    }

    async fn commit(mut self: Box<Self>, ctx: &CallContext) -> Result<()> {
        self.finished = true;
        self.ops().commit(ctx).await?;
        tracing::debug!("Committed transaction {}", self.id);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>, ctx: &CallContext) -> Result<()> {
        self.finished = true;
        self.ops().rollback(ctx).await?;
        tracing::debug!("Rolled back transaction {}", self.id);
        Ok(())
    }
}
