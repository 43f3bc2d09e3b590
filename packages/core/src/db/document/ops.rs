//! Document-store operations over one transport
//!
//! Writes are built into [`PendingWrite`]s first and applied second, so batch
//! items are validated before anything reaches the store and transactions can
//! queue them until commit.

use super::transport::{Document, DocumentRequest, DocumentResponse, DocumentTransport, TransportError};
use crate::aggregation::{assemble, compile_pipeline, Aggregation, AggregationResult, METRICS_FACET};
use crate::context::CallContext;
use crate::db::catalog::Catalog;
use crate::db::database::{key_columns, ConflictMode, KeyMap, QueryOptions};
use crate::db::DatabaseError;
use crate::query::{validate_field, QueryNode};
use crate::record::Record;
use crate::schema::TableModel;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

type Result<T> = std::result::Result<T, DatabaseError>;

const ID: &str = "_id";

/// What a write must report for it to count as applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    Nothing,
    /// `NotFound` when no document matched
    Matched,
    /// `NotFound` when no document was deleted
    Deleted,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    pub(crate) table: String,
    pub(crate) operation: &'static str,
    pub(crate) request: DocumentRequest,
    pub(crate) expect: Expect,
}

/// Map a transport fault onto the public taxonomy
fn classify(operation: &'static str, table: &str, err: TransportError) -> DatabaseError {
    match err {
        TransportError::DuplicateKey(_) => DatabaseError::conflict(table),
        TransportError::NamespaceNotFound(_) => DatabaseError::table_not_found(table),
        TransportError::BulkFailure { applied, source } => {
            let cause = classify(operation, table, *source);
            if applied == 0 {
                cause
            } else {
                DatabaseError::PartialBatch {
                    table: table.to_string(),
                    applied,
                    source: Box::new(cause),
                }
            }
        }
        other => DatabaseError::backend(operation, table, other),
    }
}

/// Record view of a stored document
fn to_record(mut doc: Document) -> Record {
    doc.remove(ID);
    Record::from(doc)
}

/// `_id` from ordered key columns: the bare value for one column, else an object
fn id_from_columns(columns: Vec<(String, Value)>) -> Value {
    if columns.len() == 1 {
        columns.into_iter().map(|(_, value)| value).next().unwrap_or(Value::Null)
    } else {
        Value::Object(columns.into_iter().collect())
    }
}

/// Flatten a grouped row's `_id` object into the row itself
fn flatten_group_row(row: &Value) -> Option<Map<String, Value>> {
    let mut row = row.as_object()?.clone();
    if let Some(Value::Object(keys)) = row.remove(ID) {
        row.extend(keys);
    }
    Some(row)
}

pub(crate) struct DocumentOps<'a> {
    pub(crate) transport: &'a dyn DocumentTransport,
    pub(crate) catalog: &'a Catalog,
}

impl DocumentOps<'_> {
    async fn send(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        table: &str,
        request: DocumentRequest,
    ) -> Result<DocumentResponse> {
        tracing::debug!("Sending {} on '{}'", request.action(), table);
        ctx.run(async {
            self.transport
                .send(request)
                .await
                .map_err(|e| classify(operation, table, e))
        })
        .await
    }

    fn document_id(&self, table: &str, key: &KeyMap) -> Result<Value> {
        let model = self.catalog.get(table);
        let columns = key_columns(table, model.as_deref(), key)?;
        Ok(id_from_columns(columns))
    }

    /// `_id` of a record about to be written; needs the migrated model
    fn record_id(&self, table: &str, record: &Record) -> Result<Value> {
        let primary_key = self
            .catalog
            .primary_key(table)
            .ok_or_else(|| DatabaseError::unknown_table(table))?;

        let mut columns = Vec::with_capacity(primary_key.len());
        for column in primary_key {
            match record.get(&column) {
                Some(value) if !value.is_null() => {
                    let value = value.clone();
                    columns.push((column, value));
                }
                _ => {
                    return Err(DatabaseError::invalid_key(
                        table,
                        format!("record has no value for '{column}'"),
                    ))
                }
            }
        }
        Ok(id_from_columns(columns))
    }

    fn fields_of(record: Record) -> Result<Document> {
        let mut fields = record.into_map();
        fields.remove(ID);
        for name in fields.keys() {
            validate_field(name)?;
        }
        Ok(fields)
    }

    pub(crate) async fn migrate(&self, ctx: &CallContext, model: &TableModel) -> Result<()> {
        model.validate()?;
        let request = DocumentRequest::CreateCollection {
            collection: model.table.clone(),
            indexes: model.indexes.clone(),
        };
        self.send(ctx, "migrate", &model.table, request).await?;
        self.catalog.register(model);
        tracing::debug!("Migrated collection '{}'", model.table);
        Ok(())
    }

    pub(crate) fn create_write(
        &self,
        table: &str,
        record: Record,
        mode: ConflictMode,
    ) -> Result<PendingWrite> {
        validate_field(table)?;
        let id = self.record_id(table, &record)?;
        let fields = Self::fields_of(record)?;
        if fields.is_empty() {
            return Err(DatabaseError::backend("create", table, "record has no fields"));
        }

        let request = match mode {
            ConflictMode::Fail => {
                let mut document = Document::new();
                document.insert(ID.to_string(), id);
                document.extend(fields);
                DocumentRequest::InsertOne {
                    collection: table.to_string(),
                    document,
                }
            }
            ConflictMode::Ignore => DocumentRequest::UpdateOne {
                collection: table.to_string(),
                filter: json!({ ID: id }),
                update: json!({ "$setOnInsert": fields }),
                upsert: true,
            },
            ConflictMode::Overwrite => DocumentRequest::ReplaceOne {
                collection: table.to_string(),
                filter: json!({ ID: id }),
                replacement: fields,
                upsert: true,
            },
        };

        Ok(PendingWrite {
            table: table.to_string(),
            operation: "create",
            request,
            expect: Expect::Nothing,
        })
    }

    pub(crate) fn update_write(&self, table: &str, key: &KeyMap, record: Record) -> Result<PendingWrite> {
        validate_field(table)?;
        let model = self.catalog.get(table);
        let columns = key_columns(table, model.as_deref(), key)?;

        let mut set = Self::fields_of(record)?;
        for (column, _) in &columns {
            set.remove(column);
        }
        // Nothing to change still has to report whether the key exists
        if set.is_empty() {
            set.extend(columns.iter().cloned());
        }

        Ok(PendingWrite {
            table: table.to_string(),
            operation: "update",
            request: DocumentRequest::UpdateOne {
                collection: table.to_string(),
                filter: json!({ ID: id_from_columns(columns) }),
                update: json!({ "$set": set }),
                upsert: false,
            },
            expect: Expect::Matched,
        })
    }

    pub(crate) fn delete_write(&self, table: &str, key: &KeyMap) -> Result<PendingWrite> {
        validate_field(table)?;
        let id = self.document_id(table, key)?;
        Ok(PendingWrite {
            table: table.to_string(),
            operation: "delete",
            request: DocumentRequest::DeleteOne {
                collection: table.to_string(),
                filter: json!({ ID: id }),
            },
            expect: Expect::Deleted,
        })
    }

    pub(crate) async fn apply(&self, ctx: &CallContext, write: PendingWrite) -> Result<()> {
        let response = self
            .send(ctx, write.operation, &write.table, write.request)
            .await?;
        match write.expect {
            Expect::Matched if response.matched_count == 0 => Err(DatabaseError::NotFound),
            Expect::Deleted if response.deleted_count == 0 => Err(DatabaseError::NotFound),
            _ => Ok(()),
        }
    }

    /// Apply writes in order, stopping at the first failure
    pub(crate) async fn apply_all(&self, ctx: &CallContext, writes: Vec<PendingWrite>) -> Result<()> {
        for (applied, write) in writes.into_iter().enumerate() {
            let table = write.table.clone();
            if let Err(err) = self.apply(ctx, write).await {
                if applied == 0 {
                    return Err(err);
                }
                tracing::warn!("Writes on '{}' stopped after {} items: {}", table, applied, err);
                return Err(DatabaseError::PartialBatch {
                    table,
                    applied,
                    source: Box::new(err),
                });
            }
        }
        Ok(())
    }

    /// One ordered bulk insert for conflict-failing batch creates
    pub(crate) async fn insert_many(&self, ctx: &CallContext, table: &str, writes: Vec<PendingWrite>) -> Result<()> {
        let documents: Vec<Document> = writes
            .into_iter()
            .filter_map(|write| match write.request {
                DocumentRequest::InsertOne { document, .. } => Some(document),
                _ => None,
            })
            .collect();
        if documents.is_empty() {
            return Ok(());
        }

        let request = DocumentRequest::InsertMany {
            collection: table.to_string(),
            documents,
        };
        if let Err(err) = self.send(ctx, "batch create", table, request).await {
            if let DatabaseError::PartialBatch { applied, .. } = &err {
                tracing::warn!("Batch create on '{}' stopped after {} documents", table, applied);
            }
            return Err(err);
        }
        Ok(())
    }

    pub(crate) async fn get(&self, ctx: &CallContext, table: &str, key: &KeyMap) -> Result<Record> {
        validate_field(table)?;
        let id = self.document_id(table, key)?;
        let request = DocumentRequest::Find {
            collection: table.to_string(),
            filter: json!({ ID: id }),
            sort: None,
            skip: None,
            limit: Some(1),
        };

        let response = self.send(ctx, "get", table, request).await?;
        response
            .documents
            .into_iter()
            .next()
            .map(to_record)
            .ok_or(DatabaseError::NotFound)
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
        let filter = query.to_document_query()?;

        let sort = options.order_by.as_ref().map(|field| {
            let direction = if options.order_desc { -1 } else { 1 };
            let mut sort = Document::new();
            sort.insert(field.clone(), json!(direction));
            sort
        });

        let request = DocumentRequest::Find {
            collection: table.to_string(),
            filter,
            sort,
            skip: options.offset,
            limit: options.limit,
        };
        let response = self.send(ctx, "find", table, request).await?;
        Ok(response.documents.into_iter().map(to_record).collect())
    }

    pub(crate) async fn aggregate(
        &self,
        ctx: &CallContext,
        table: &str,
        query: &QueryNode,
        aggregations: &[Aggregation],
    ) -> Result<AggregationResult> {
        validate_field(table)?;
        let pipeline = compile_pipeline(query, aggregations)?;
        if aggregations.is_empty() {
            return Ok(assemble(aggregations, None, &HashMap::new())?);
        }

        let request = DocumentRequest::Aggregate {
            collection: table.to_string(),
            pipeline,
        };
        let response = self.send(ctx, "aggregate", table, request).await?;
        let facets = response.documents.into_iter().next().unwrap_or_default();

        let mut metrics = None;
        let mut levels = HashMap::with_capacity(facets.len());
        for (path, rows) in facets {
            let rows: Vec<Map<String, Value>> = match rows {
                Value::Array(rows) => rows.iter().filter_map(flatten_group_row).collect(),
                _ => continue,
            };
            if path == METRICS_FACET {
                metrics = rows.into_iter().next();
            } else {
                levels.insert(path, rows);
            }
        }

        Ok(assemble(aggregations, metrics.as_ref(), &levels)?)
    }

    pub(crate) async fn drop_table(&self, ctx: &CallContext, table: &str) -> Result<()> {
        validate_field(table)?;
        let request = DocumentRequest::DropCollection {
            collection: table.to_string(),
        };
        self.send(ctx, "drop table", table, request).await?;
        self.catalog.remove(table);
        tracing::debug!("Dropped collection '{}'", table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, SemanticType};

    #[test]
    fn test_document_ids() {
        assert_eq!(
            id_from_columns(vec![("id".to_string(), json!("o-1"))]),
            json!("o-1")
        );
        assert_eq!(
            id_from_columns(vec![
                ("tenant".to_string(), json!("t1")),
                ("user".to_string(), json!("u1")),
            ]),
            json!({"tenant": "t1", "user": "u1"})
        );
    }

    #[test]
    fn test_group_rows_are_flattened() {
        let row = flatten_group_row(&json!({"_id": {"__k0_0": "paid"}, "__doc_count": 2})).unwrap();
        assert_eq!(Value::Object(row), json!({"__doc_count": 2, "__k0_0": "paid"}));

        let metrics = flatten_group_row(&json!({"_id": null, "total": 5})).unwrap();
        assert_eq!(Value::Object(metrics), json!({"total": 5}));
    }

    #[test]
    fn test_bulk_failure_classification() {
        let partial = classify(
            "batch create",
            "orders",
            TransportError::BulkFailure {
                applied: 2,
                source: Box::new(TransportError::DuplicateKey("_id".to_string())),
            },
        );
        assert!(matches!(
            partial,
            DatabaseError::PartialBatch { applied: 2, ref source, .. } if source.is_conflict()
        ));

        let first = classify(
            "batch create",
            "orders",
            TransportError::BulkFailure {
                applied: 0,
                source: Box::new(TransportError::DuplicateKey("_id".to_string())),
            },
        );
        assert!(first.is_conflict());
    }

    #[test]
    fn test_writes_need_migrated_model() {
        let catalog = Catalog::new();
        let transport = crate::db::document::MemoryTransport::new();
        let ops = DocumentOps {
            transport: &transport,
            catalog: &catalog,
        };
        let record = Record::from_iter([("id".to_string(), json!("o-1"))]);
        assert!(matches!(
            ops.create_write("orders", record.clone(), ConflictMode::Fail),
            Err(DatabaseError::UnknownTable { .. })
        ));

        catalog.register(
            &TableModel::builder("orders")
                .field(FieldDefinition::new("id", SemanticType::String))
                .field(FieldDefinition::new("status", SemanticType::String))
                .primary_key(["id"])
                .build()
                .unwrap(),
        );
        let write = ops.create_write("orders", record, ConflictMode::Ignore).unwrap();
        assert_eq!(
            write.request,
            DocumentRequest::UpdateOne {
                collection: "orders".to_string(),
                filter: json!({"_id": "o-1"}),
                update: json!({"$setOnInsert": {"id": "o-1"}}),
                upsert: true,
            }
        );
    }
}
