//! Repository
//!
//! Typed access to one entity's table. The [`TableModel`] is built once per
//! entity type; primary-key maps come either from a caller-supplied [`Key`] or
//! from the entity's own primary-key fields.
//!
//! Operations live on [`EntityStore`], implemented both by [`Repository`] and by
//! the transaction-scoped [`TxRepository`] handed out by
//! [`Repository::with_tx`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//! use std::sync::Arc;
//! use unistore_core::{
//!     CallContext, DocumentStore, Entity, EntityStore, FieldKind, FieldSpec, QueryNode,
//!     Repository,
//! };
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Order {
//!     id: String,
//!     status: String,
//! }
//!
//! impl Entity for Order {
//!     const FIELDS: &'static [FieldSpec] = &[
//!         FieldSpec::new("id", FieldKind::String, "id,primary"),
//!         FieldSpec::new("status", FieldKind::String, "status,index"),
//!     ];
//! }
//!
//! # async fn example() -> Result<(), unistore_core::DatabaseError> {
//! let ctx = CallContext::background();
//! let orders = Repository::<Order>::new(Arc::new(DocumentStore::in_memory()))?;
//! orders.migrate(&ctx).await?;
//!
//! let order = Order { id: "o-1".into(), status: "open".into() };
//! orders.create(&ctx, &order, &[]).await?;
//!
//! let open = orders.count(&ctx, &QueryNode::term("status", json!("open"))).await?;
//! assert_eq!(open, 1);
//! # Ok(())
//! # }
//! ```

use crate::aggregation::{Aggregation, AggregationResult};
use crate::context::CallContext;
use crate::db::{with_tx, CreateOption, Database, DatabaseError, KeyMap, QueryOptions, Transaction};
use crate::query::QueryNode;
use crate::record::Record;
use crate::schema::{Entity, TableModel};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

type Result<T> = std::result::Result<T, DatabaseError>;

/// Caller-supplied primary key
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// Value of a single-column primary key
    Single(Value),
    /// Primary-key column -> value, for composite keys
    Composite(KeyMap),
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Key::Single(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Single(Value::String(value.to_string()))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Single(Value::String(value))
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Single(Value::from(value))
    }
}

impl From<KeyMap> for Key {
    fn from(map: KeyMap) -> Self {
        Key::Composite(map)
    }
}

/// Resolve a caller key against the model's primary key
pub(crate) fn key_map(model: &TableModel, key: Key) -> Result<KeyMap> {
    let primary_key = model.require_primary_key()?;
    match key {
        Key::Single(value) => match primary_key {
            [column] => {
                let mut map = KeyMap::new();
                map.insert(column.clone(), value);
                Ok(map)
            }
            _ => Err(DatabaseError::invalid_key(
                &model.table,
                format!("composite primary key {primary_key:?} needs a key map"),
            )),
        },
        Key::Composite(map) => {
            if map.len() != primary_key.len() || !primary_key.iter().all(|c| map.contains_key(c)) {
                return Err(DatabaseError::invalid_key(
                    &model.table,
                    format!("expected fields {primary_key:?}"),
                ));
            }
            Ok(map)
        }
    }
}

/// Primary-key map read from an entity's record
pub(crate) fn record_key(model: &TableModel, record: &Record) -> Result<KeyMap> {
    let primary_key = model.require_primary_key()?;
    let mut map = KeyMap::new();
    for column in primary_key {
        let value = record
            .get(column)
            .filter(|v| !v.is_null())
            .ok_or_else(|| DatabaseError::invalid_key(&model.table, format!("'{column}' is empty")))?;
        map.insert(column.clone(), value.clone());
    }
    Ok(map)
}

/// Entity-typed operations over one table
///
/// `count` and `exists` fetch matching records and check the length; use
/// [`aggregate`](EntityStore::aggregate) with a count metric on large tables.
#[async_trait]
pub trait EntityStore<T: Entity>: Send + Sync {
    fn database(&self) -> &dyn Database;

    fn model(&self) -> &TableModel;

    fn table(&self) -> &str {
        &self.model().table
    }

    async fn migrate(&self, ctx: &CallContext) -> Result<()> {
        self.database().migrate(ctx, self.model()).await
    }

    async fn create(&self, ctx: &CallContext, entity: &T, options: &[CreateOption]) -> Result<()> {
        let record = self.database().get_builder().from_entity(entity)?;
        self.database().create(ctx, self.table(), record, options).await
    }

    async fn get<K>(&self, ctx: &CallContext, key: K) -> Result<T>
    where
        K: Into<Key> + Send,
    {
        let key = key_map(self.model(), key.into())?;
        self.get_by_key(ctx, &key).await
    }

    async fn get_by_key(&self, ctx: &CallContext, key: &KeyMap) -> Result<T> {
        let record = self.database().get(ctx, self.table(), key).await?;
        Ok(record.scan()?)
    }

    /// Write every field of `entity` to the record with its primary key
    async fn update(&self, ctx: &CallContext, entity: &T) -> Result<()> {
        let record = self.database().get_builder().from_entity(entity)?;
        let key = record_key(self.model(), &record)?;
        self.database().update(ctx, self.table(), &key, record).await
    }

    async fn delete(&self, ctx: &CallContext, entity: &T) -> Result<()> {
        let record = self.database().get_builder().from_entity(entity)?;
        let key = record_key(self.model(), &record)?;
        self.database().delete(ctx, self.table(), &key).await
    }

    async fn delete_by_key<K>(&self, ctx: &CallContext, key: K) -> Result<()>
    where
        K: Into<Key> + Send,
    {
        let key = key_map(self.model(), key.into())?;
        self.database().delete(ctx, self.table(), &key).await
    }

    async fn find(
        &self,
        ctx: &CallContext,
        query: &QueryNode,
        options: &QueryOptions,
    ) -> Result<Vec<T>> {
        let records = self.database().find(ctx, self.table(), query, options).await?;
        records
            .iter()
            .map(|record| record.scan().map_err(DatabaseError::from))
            .collect()
    }

    async fn find_one(&self, ctx: &CallContext, query: &QueryNode) -> Result<Option<T>> {
        let options = QueryOptions::new().limit(1);
        Ok(self.find(ctx, query, &options).await?.into_iter().next())
    }

    async fn count(&self, ctx: &CallContext, query: &QueryNode) -> Result<usize> {
        let records = self
            .database()
            .find(ctx, self.table(), query, &QueryOptions::new())
            .await?;
        Ok(records.len())
    }

    async fn exists(&self, ctx: &CallContext, query: &QueryNode) -> Result<bool> {
        let options = QueryOptions::new().limit(1);
        let records = self.database().find(ctx, self.table(), query, &options).await?;
        Ok(!records.is_empty())
    }

    async fn aggregate(
        &self,
        ctx: &CallContext,
        query: &QueryNode,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult> {
        self.database()
            .aggregate(ctx, self.table(), query, aggregations)
            .await
    }

    async fn batch_create(
        &self,
        ctx: &CallContext,
        entities: &[T],
        options: &[CreateOption],
    ) -> Result<()> {
        let builder = self.database().get_builder();
        let records = entities
            .iter()
            .map(|entity| builder.from_entity(entity).map_err(DatabaseError::from))
            .collect::<Result<Vec<_>>>()?;
        self.database()
            .batch_create(ctx, self.table(), records, options)
            .await
    }

    async fn batch_update(&self, ctx: &CallContext, entities: &[T]) -> Result<()> {
        let builder = self.database().get_builder();
        let mut keys = Vec::with_capacity(entities.len());
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            let record = builder.from_entity(entity)?;
            keys.push(record_key(self.model(), &record)?);
            records.push(record);
        }
        self.database()
            .batch_update(ctx, self.table(), &keys, records)
            .await
    }

    async fn batch_delete(&self, ctx: &CallContext, entities: &[T]) -> Result<()> {
        let builder = self.database().get_builder();
        let keys = entities
            .iter()
            .map(|entity| {
                let record = builder.from_entity(entity)?;
                record_key(self.model(), &record)
            })
            .collect::<Result<Vec<_>>>()?;
        self.database().batch_delete(ctx, self.table(), &keys).await
    }

    async fn drop_table(&self, ctx: &CallContext) -> Result<()> {
        self.database().drop_table(ctx, self.table()).await
    }
}

/// Entity repository over a shared database handle
pub struct Repository<T: Entity> {
    db: Arc<dyn Database>,
    model: Arc<TableModel>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            model: self.model.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &self.model.table)
            .field("backend", &self.db.backend_name())
            .finish()
    }
}

impl<T: Entity> Repository<T> {
    /// Repository for `T`; fails when `T` cannot be described as a table
    pub fn new(db: Arc<dyn Database>) -> Result<Self> {
        let model = TableModel::of::<T>()?;
        Ok(Self {
            db,
            model,
            _entity: PhantomData,
        })
    }

    /// Run `f` against a transaction-scoped repository
    ///
    /// Commits when `f` succeeds and rolls back when it fails. Like
    /// [`with_tx`](crate::db::with_tx), the future may only borrow the scoped
    /// repository.
    pub async fn with_tx<R, F>(&self, ctx: &CallContext, f: F) -> Result<R>
    where
        F: for<'t> FnOnce(TxRepository<'t, T>) -> BoxFuture<'t, Result<R>>,
    {
        let model = self.model.clone();
        with_tx(self.db.as_ref(), ctx, move |tx| {
            f(TxRepository {
                tx,
                model,
                _entity: PhantomData,
            })
        })
        .await
    }
}

impl<T: Entity> EntityStore<T> for Repository<T> {
    fn database(&self) -> &dyn Database {
        self.db.as_ref()
    }

    fn model(&self) -> &TableModel {
        &self.model
    }
}

/// Repository bound to one open transaction
pub struct TxRepository<'t, T: Entity> {
    tx: &'t dyn Transaction,
    model: Arc<TableModel>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> TxRepository<'_, T> {
    pub fn transaction_id(&self) -> &str {
        self.tx.id()
    }
}

impl<T: Entity> EntityStore<T> for TxRepository<'_, T> {
    fn database(&self) -> &dyn Database {
        self.tx.as_database()
    }

    fn model(&self) -> &TableModel {
        &self.model
    }
}
