//! Row-store operations over one connection
//!
//! Shared by [`RowStore`](super::RowStore), which opens a connection per call,
//! and [`RowTransaction`](super::RowTransaction), which holds one connection for
//! the lifetime of a native transaction.

use super::ddl::{
    create_index_sql, create_table_sql, drop_table_sql, insert_sql, key_predicate,
    primary_key_lookup_sql,
};
use super::driver::SqlConnection;
use crate::aggregation::{assemble, compile_sql, Aggregation, AggregationResult};
use crate::context::CallContext;
use crate::db::catalog::Catalog;
use crate::db::database::{check_batch_lengths, key_columns, ConflictMode, KeyMap, QueryOptions};
use crate::db::{BoxError, DatabaseError};
use crate::dialect::Dialect;
use crate::query::{validate_field, QueryNode, SqlFragment};
use crate::record::Record;
use crate::schema::TableModel;
use serde_json::{Map, Value};
use std::collections::HashMap;

type Result<T> = std::result::Result<T, DatabaseError>;

pub(crate) struct SqlOps<'a> {
    pub(crate) conn: &'a dyn SqlConnection,
    pub(crate) dialect: Dialect,
    pub(crate) catalog: &'a Catalog,
    pub(crate) in_tx: bool,
}

impl SqlOps<'_> {
    /// Map a driver error onto the public taxonomy
    fn classify(&self, operation: &'static str, table: &str, err: BoxError) -> DatabaseError {
        let message = err.to_string();
        if self.dialect.is_unique_violation(&message) {
            DatabaseError::conflict(table)
        } else if self.dialect.is_missing_table(&message) {
            DatabaseError::table_not_found(table)
        } else {
            DatabaseError::backend(operation, table, err)
        }
    }

    /// Run a statement without classifying its error
    async fn execute_raw(
        &self,
        ctx: &CallContext,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<std::result::Result<u64, BoxError>> {
        let sql = self.dialect.rebind(sql);
        tracing::debug!("Executing: {}", sql);
        ctx.run(async { Ok(self.conn.execute(&sql, params).await) })
            .await
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        table: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<u64> {
        self.execute_raw(ctx, sql, params)
            .await?
            .map_err(|e| self.classify(operation, table, e))
    }

    async fn query(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        table: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Record>> {
        let sql = self.dialect.rebind(sql);
        tracing::debug!("Querying: {}", sql);
        ctx.run(async {
            self.conn
                .query(&sql, params)
                .await
                .map_err(|e| self.classify(operation, table, e))
        })
        .await
    }

    pub(crate) async fn begin(&self, ctx: &CallContext) -> Result<()> {
        self.execute(ctx, "begin", "", self.dialect.begin_transaction(), Vec::new())
            .await
            .map(|_| ())
    }

    pub(crate) async fn commit(&self, ctx: &CallContext) -> Result<()> {
        if let Err(e) = self.execute(ctx, "commit", "", "COMMIT", Vec::new()).await {
            let _rollback = self.conn.execute("ROLLBACK", Vec::new()).await;
            return Err(e);
        }
        Ok(())
    }

    pub(crate) async fn rollback(&self, ctx: &CallContext) -> Result<()> {
        self.execute(ctx, "rollback", "", "ROLLBACK", Vec::new())
            .await
            .map(|_| ())
    }

    /// Commit after a successful batch, roll back after a failed one
    pub(crate) async fn finish(&self, ctx: &CallContext, table: &str, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => self.commit(ctx).await,
            Err(err) => {
                // Roll back even when the context has expired
                if let Err(e) = self.conn.execute("ROLLBACK", Vec::new()).await {
                    tracing::warn!("Failed to roll back batch on '{}': {}", table, e);
                }
                Err(err)
            }
        }
    }

    fn warn_ddl_in_tx(&self, statement: &str, table: &str) {
        if self.in_tx && !self.dialect.ddl_is_transactional() {
            tracing::warn!(
                "{} on '{}' inside a transaction commits implicitly on {}; rollback will not undo it",
                statement,
                table,
                self.dialect
            );
        }
    }

    /// Primary key from the catalog, else from the live schema
    async fn primary_key(&self, ctx: &CallContext, table: &str) -> Result<Vec<String>> {
        if let Some(primary_key) = self.catalog.primary_key(table) {
            return Ok(primary_key);
        }

        let rows = self
            .query(
                ctx,
                "primary key lookup",
                table,
                primary_key_lookup_sql(self.dialect),
                vec![Value::String(table.to_string())],
            )
            .await?;

        let primary_key: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();

        if primary_key.is_empty() {
            return Err(DatabaseError::unknown_table(table));
        }
        Ok(primary_key)
    }

    fn key_columns(&self, table: &str, key: &KeyMap) -> Result<Vec<(String, Value)>> {
        let model = self.catalog.get(table);
        key_columns(table, model.as_deref(), key)
    }

    pub(crate) async fn migrate(&self, ctx: &CallContext, model: &TableModel) -> Result<()> {
        model.validate()?;
        let table = model.table.as_str();
        self.warn_ddl_in_tx("CREATE TABLE", table);

        self.execute(ctx, "migrate", table, &create_table_sql(self.dialect, model), Vec::new())
            .await?;

        for index in &model.indexes {
            let sql = create_index_sql(self.dialect, table, index);
            match self.execute_raw(ctx, &sql, Vec::new()).await? {
                Ok(_) => {}
                Err(e)
                    if !self.dialect.supports_index_if_not_exists()
                        && self.dialect.is_duplicate_index_error(&e.to_string()) =>
                {
                    tracing::debug!("Index {} already exists on '{}'", index.name, table);
                }
                Err(e) => return Err(self.classify("migrate", table, e)),
            }
        }

        self.catalog.register(model);
        tracing::debug!("Migrated table '{}'", table);
        Ok(())
    }

    async fn insert(
        &self,
        ctx: &CallContext,
        table: &str,
        record: Record,
        mode: ConflictMode,
        primary_key: &[String],
    ) -> Result<()> {
        if record.is_empty() {
            return Err(DatabaseError::backend("create", table, "record has no fields"));
        }

        let fields = record.into_map();
        let columns: Vec<&str> = fields.keys().map(String::as_str).collect();
        for column in &columns {
            validate_field(column)?;
        }

        let sql = insert_sql(self.dialect, table, &columns, primary_key, mode);
        let params: Vec<Value> = fields.values().cloned().collect();
        self.execute(ctx, "create", table, &sql, params).await?;
        Ok(())
    }

    async fn conflict_target(
        &self,
        ctx: &CallContext,
        table: &str,
        mode: ConflictMode,
    ) -> Result<Vec<String>> {
        match mode {
            ConflictMode::Fail => Ok(Vec::new()),
            ConflictMode::Ignore | ConflictMode::Overwrite => self.primary_key(ctx, table).await,
        }
    }

    pub(crate) async fn create(
        &self,
        ctx: &CallContext,
        table: &str,
        record: Record,
        mode: ConflictMode,
    ) -> Result<()> {
        validate_field(table)?;
        let primary_key = self.conflict_target(ctx, table, mode).await?;
        self.insert(ctx, table, record, mode, &primary_key).await
    }

    pub(crate) async fn get(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<Record> {
        validate_field(table)?;
        let columns = self.key_columns(table, key)?;

        let sql = format!(
            "SELECT * FROM {table} WHERE {}{}",
            key_predicate(&columns),
            self.dialect.limit_offset(Some(1), None)
        );
        let params = columns.into_iter().map(|(_, value)| value).collect();

        self.query(ctx, "get", table, &sql, params)
            .await?
            .into_iter()
            .next()
            .ok_or(DatabaseError::NotFound)
    }

    pub(crate) async fn update(
        &self,
        ctx: &CallContext,
        table: &str,
        key: &KeyMap,
        record: Record,
    ) -> Result<()> {
        validate_field(table)?;
        let columns = self.key_columns(table, key)?;

        let assignments: Vec<(String, Value)> = record
            .into_map()
            .into_iter()
            .filter(|(name, _)| !columns.iter().any(|(key, _)| key == name))
            .collect();
        if assignments.is_empty() {
            return self.get(ctx, table, key).await.map(|_| ());
        }
        for (name, _) in &assignments {
            validate_field(name)?;
        }

        let set_clause = assignments
            .iter()
            .map(|(name, _)| format!("{name} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} SET {set_clause} WHERE {}",
            key_predicate(&columns)
        );
        let params = assignments
            .into_iter()
            .map(|(_, value)| value)
            .chain(columns.into_iter().map(|(_, value)| value))
            .collect();

        let affected = self.execute(ctx, "update", table, &sql, params).await?;
        if affected == 0 {
            // MySQL reports changed rows, so an unchanged match also reads as zero
            if self.dialect == Dialect::MySql {
                return self.get(ctx, table, key).await.map(|_| ());
            }
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    pub(crate) async fn delete(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<()> {
        validate_field(table)?;
        let columns = self.key_columns(table, key)?;

        let sql = format!("DELETE FROM {table} WHERE {}", key_predicate(&columns));
        let params = columns.into_iter().map(|(_, value)| value).collect();

        match self.execute(ctx, "delete", table, &sql, params).await? {
            0 => Err(DatabaseError::NotFound),
            _ => Ok(()),
        }
    }

    pub(crate) async fn find(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        validate_field(table)?;
        options.validate()?;
        let filter = query.to_sql(self.dialect)?;

        let mut sql = format!("SELECT * FROM {table}");
        push_where(&mut sql, &filter);
        if let Some(field) = &options.order_by {
            let direction = if options.order_desc { "DESC" } else { "ASC" };
            sql.push_str(&format!(" ORDER BY {field} {direction}"));
        }
        sql.push_str(&self.dialect.limit_offset(options.limit, options.offset));

        self.query(ctx, "find", table, &sql, filter.params).await
    }

    pub(crate) async fn aggregate(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult> {
        let filter = query.to_sql(self.dialect)?;
        let compiled = compile_sql(aggregations, table, &filter, self.dialect)?;

        let metrics: Option<Map<String, Value>> = match compiled.metrics {
            Some(fragment) => self
                .query(ctx, "aggregate", table, &fragment.sql, fragment.params)
                .await?
                .into_iter()
                .next()
                .map(Record::into_map),
            None => None,
        };

        let mut levels = HashMap::with_capacity(compiled.levels.len());
        for (path, fragment) in compiled.levels {
            let rows = self
                .query(ctx, "aggregate", table, &fragment.sql, fragment.params)
                .await?;
            levels.insert(path, rows.into_iter().map(Record::into_map).collect());
        }

        Ok(assemble(aggregations, metrics.as_ref(), &levels)?)
    }

    pub(crate) async fn batch_create(
        &self,
        ctx: &CallContext,
        table: &str,
        records: Vec<Record>,
        mode: ConflictMode,
    ) -> Result<()> {
        validate_field(table)?;
        let primary_key = self.conflict_target(ctx, table, mode).await?;
        for record in records {
            self.insert(ctx, table, record, mode, &primary_key).await?;
        }
        Ok(())
    }

    pub(crate) async fn batch_update(
        &self,
        ctx: &CallContext,
        table: &str,
        keys: &[KeyMap],
        records: Vec<Record>,
    ) -> Result<()> {
        check_batch_lengths(keys, &records)?;
        for (key, record) in keys.iter().zip(records) {
            self.update(ctx, table, key, record).await?;
        }
        Ok(())
    }

    pub(crate) async fn batch_delete(&self, ctx: &CallContext, table: &str, keys: &[KeyMap]) -> Result<()> {
        for key in keys {
            self.delete(ctx, table, key).await?;
        }
        Ok(())
    }

    pub(crate) async fn drop_table(&self, ctx: &CallContext, table: &str) -> Result<()> {
        validate_field(table)?;
        self.warn_ddl_in_tx("DROP TABLE", table);
        self.execute(ctx, "drop table", table, &drop_table_sql(table), Vec::new())
            .await?;
        self.catalog.remove(table);
        tracing::debug!("Dropped table '{}'", table);
        Ok(())
    }
}

fn push_where(sql: &mut String, filter: &SqlFragment) {
    if !filter.is_always_true() {
        sql.push_str(" WHERE ");
        sql.push_str(&filter.sql);
    }
}
