//! Row Store
//!
//! [`Database`] over a [`SqlDriver`]. Each call opens its own connection;
//! batches outside a transaction run inside an implicit native transaction and
//! are atomic.

use super::driver::{LibsqlDriver, SqlConnection, SqlDriver};
use super::ops::SqlOps;
use super::tx::RowTransaction;
use crate::aggregation::{Aggregation, AggregationResult};
use crate::config::RowStoreConfig;
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
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Row-store backend
pub struct RowStore {
    driver: Arc<dyn SqlDriver>,
    dialect: Dialect,
    catalog: Arc<Catalog>,
}

impl std::fmt::Debug for RowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStore")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl RowStore {
    /// Wrap a driver; its dialect is read once here
    pub fn new(driver: Arc<dyn SqlDriver>) -> Self {
        let dialect = driver.dialect();
        tracing::debug!("Row store using {} dialect", dialect);
        Self {
            driver,
            dialect,
            catalog: Arc::new(Catalog::new()),
        }
    }

    /// Row store over a local libsql database file
    pub async fn open_local(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let driver = LibsqlDriver::open_local(path)
            .await
            .map_err(|e| DatabaseError::backend("open", path.display().to_string(), e))?;
        Ok(Self::new(Arc::new(driver)))
    }

    pub async fn from_config(config: &RowStoreConfig) -> Result<Self> {
        config.validate().map_err(DatabaseError::configuration)?;
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

        let driver = match (&config.path, &config.url) {
            (Some(path), _) => LibsqlDriver::open_local(path)
                .await
                .map_err(|e| DatabaseError::backend("open", path.display().to_string(), e))?,
            (None, Some(url)) => {
                LibsqlDriver::open_remote(url.clone(), config.auth_token.clone().unwrap_or_default())
                    .await
                    .map_err(|e| DatabaseError::backend("open", url.clone(), e))?
            }
            (None, None) => {
                return Err(DatabaseError::configuration(
                    "row store needs a path or a url",
                ))
            }
        };

        Ok(Self::new(Arc::new(driver.with_busy_timeout(busy_timeout))))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self, ctx: &CallContext) -> Result<Box<dyn SqlConnection>> {
        ctx.run(async {
            self.driver
                .connect()
                .await
                .map_err(|e| DatabaseError::backend("connect", "", e))
        })
        .await
    }

    fn ops<'a>(&'a self, conn: &'a dyn SqlConnection, in_tx: bool) -> SqlOps<'a> {
        SqlOps {
            conn,
            dialect: self.dialect,
            catalog: &self.catalog,
            in_tx,
        }
    }
}

#[async_trait]
impl Database for RowStore {
    fn backend_name(&self) -> &'static str {
        self.dialect.as_str()
    }

    async fn migrate(&self, ctx: &CallContext, model: &TableModel) -> Result<()> {
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), false).migrate(ctx, model).await
    }

    async fn create(
        &self,
        ctx: &CallContext,
        table: &str,
        record: Record,
        options: &[CreateOption],
    ) -> Result<()> {
        let mode = ConflictMode::from_options(options)?;
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), false)
            .create(ctx, table, record, mode)
            .await
    }

    async fn get(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<Record> {
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), false).get(ctx, table, key).await
    }

    async fn update(
        &self,
        ctx: &CallContext,
        table: &str,
        key: &KeyMap,
        record: Record,
    ) -> Result<()> {
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), false)
            .update(ctx, table, key, record)
            .await
    }

    async fn delete(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<()> {
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), false).delete(ctx, table, key).await
    }

    async fn find(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), false)
            .find(ctx, table, query, options)
            .await
    }

    async fn aggregate(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult> {
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), false)
            .aggregate(ctx, table, query, aggregations)
            .await
    }

    async fn batch_create(
        &self,
        ctx: &CallContext,
        table: &str,
        records: Vec<Record>,
        options: &[CreateOption],
    ) -> Result<()> {
        let mode = ConflictMode::from_options(options)?;
        if records.is_empty() {
            return Ok(());
        }

        let conn = self.connect(ctx).await?;
        let ops = self.ops(conn.as_ref(), true);
        ops.begin(ctx).await?;
        let outcome = ops.batch_create(ctx, table, records, mode).await;
        ops.finish(ctx, table, outcome).await
    }

    async fn batch_update(
        &self,
        ctx: &CallContext,
        table: &str,
        keys: &[KeyMap],
        records: Vec<Record>,
    ) -> Result<()> {
        check_batch_lengths(keys, &records)?;
        if keys.is_empty() {
            return Ok(());
        }

        let conn = self.connect(ctx).await?;
        let ops = self.ops(conn.as_ref(), true);
        ops.begin(ctx).await?;
        let outcome = ops.batch_update(ctx, table, keys, records).await;
        ops.finish(ctx, table, outcome).await
    }

    async fn batch_delete(&self, ctx: &CallContext, table: &str, keys: &[KeyMap]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let conn = self.connect(ctx).await?;
        let ops = self.ops(conn.as_ref(), true);
        ops.begin(ctx).await?;
        let outcome = ops.batch_delete(ctx, table, keys).await;
        ops.finish(ctx, table, outcome).await
    }

    async fn drop_table(&self, ctx: &CallContext, table: &str) -> Result<()> {
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), false).drop_table(ctx, table).await
    }

    async fn begin_tx(&self, ctx: &CallContext) -> Result<Box<dyn Transaction>> {
        let conn = self.connect(ctx).await?;
        self.ops(conn.as_ref(), true).begin(ctx).await?;

        let tx = RowTransaction::new(conn, self.dialect, self.catalog.clone());
        tracing::debug!("Began transaction {}", tx.id());
        Ok(Box::new(tx))
    }

    async fn close(&self) -> Result<()> {
        self.driver
            .close()
            .await
            .map_err(|e| DatabaseError::backend("close", "", e))
    }
}
