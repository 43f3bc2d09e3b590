//! In-process document transport
//!
//! Keeps collections in memory and evaluates requests with the same operator
//! set the HTTP store understands. Used by tests and for embedding a document
//! store without a server.

use super::eval::{lookup, matches_filter, run_pipeline, sort_documents};
use super::transport::{
    Document, DocumentRequest, DocumentResponse, DocumentTransport, TransportError,
};
use crate::value::values_equal;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    /// Field lists of unique indexes, by index name
    unique: Vec<(String, Vec<String>)>,
}

impl Collection {
    fn position(&self, filter: &Value) -> Result<Option<usize>, TransportError> {
        for (index, doc) in self.documents.iter().enumerate() {
            if matches_filter(doc, filter)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Reject `doc` if it collides with any other document on `_id` or a unique index
    fn check_unique(&self, doc: &Document, skip: Option<usize>) -> Result<(), TransportError> {
        let id = doc
            .get("_id")
            .ok_or_else(|| TransportError::Malformed("document has no _id".to_string()))?;

        for (index, existing) in self.documents.iter().enumerate() {
            if Some(index) == skip {
                continue;
            }
            if existing.get("_id").is_some_and(|other| values_equal(other, id)) {
                return Err(TransportError::DuplicateKey(format!("_id {id}")));
            }
            for (name, fields) in &self.unique {
                let collides = fields.iter().all(|field| {
                    let ours = lookup(doc, field).unwrap_or(&Value::Null);
                    let theirs = lookup(existing, field).unwrap_or(&Value::Null);
                    values_equal(ours, theirs)
                });
                if collides {
                    return Err(TransportError::DuplicateKey(format!("index {name}")));
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, doc: Document) -> Result<Value, TransportError> {
        self.check_unique(&doc, None)?;
        let id = doc.get("_id").cloned().unwrap_or(Value::Null);
        self.documents.push(doc);
        Ok(id)
    }

    /// Replace the document at `index`, keeping the old one on collision
    fn store(&mut self, index: usize, doc: Document) -> Result<bool, TransportError> {
        self.check_unique(&doc, Some(index))?;
        let changed = self.documents[index] != doc;
        self.documents[index] = doc;
        Ok(changed)
    }
}

/// Top-level equality fields of a filter, seeded into upserted documents
fn equality_fields(filter: &Value) -> Document {
    filter
        .as_object()
        .map(|clauses| {
            clauses
                .iter()
                .filter(|(key, value)| {
                    !key.starts_with('$')
                        && !value
                            .as_object()
                            .is_some_and(|v| v.keys().any(|k| k.starts_with('$')))
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn operator_fields<'a>(update: &'a Value, operator: &str) -> Result<Option<&'a Document>, TransportError> {
    let operators = update
        .as_object()
        .ok_or_else(|| TransportError::Malformed("update must be an object".to_string()))?;
    if let Some(unknown) = operators
        .keys()
        .find(|k| !matches!(k.as_str(), "$set" | "$setOnInsert"))
    {
        return Err(TransportError::Malformed(format!(
            "unsupported update operator {unknown}"
        )));
    }
    match operators.get(operator) {
        None => Ok(None),
        Some(Value::Object(fields)) => Ok(Some(fields)),
        Some(_) => Err(TransportError::Malformed(format!("{operator} expects an object"))),
    }
}

/// Document store held in memory
///
/// Clones share the same collections.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    collections: Arc<Mutex<HashMap<String, Collection>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `collection`; `None` when it does not exist
    pub fn len(&self, collection: &str) -> Option<usize> {
        let collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        collections.get(collection).map(|c| c.documents.len())
    }

    fn handle(&self, request: DocumentRequest) -> Result<DocumentResponse, TransportError> {
        let mut collections = self.collections.lock().unwrap_or_else(|e| e.into_inner());
        let mut response = DocumentResponse::default();

        match request {
            DocumentRequest::CreateCollection {
                collection,
                indexes,
            } => {
                let entry = collections.entry(collection).or_default();
                for index in indexes.into_iter().filter(|index| index.unique) {
                    if !entry.unique.iter().any(|(name, _)| *name == index.name) {
                        entry.unique.push((index.name, index.fields));
                    }
                }
            }
            DocumentRequest::DropCollection { collection } => {
                collections.remove(&collection);
            }
            DocumentRequest::InsertOne {
                collection,
                document,
            } => {
                let target = existing(&mut collections, &collection)?;
                response.inserted_ids.push(target.insert(document)?);
            }
            DocumentRequest::InsertMany {
                collection,
                documents,
            } => {
                let target = existing(&mut collections, &collection)?;
                for (applied, document) in documents.into_iter().enumerate() {
                    match target.insert(document) {
                        Ok(id) => response.inserted_ids.push(id),
                        Err(err) => {
                            return Err(TransportError::BulkFailure {
                                applied,
                                source: Box::new(err),
                            })
                        }
                    }
                }
            }
            DocumentRequest::UpdateOne {
                collection,
                filter,
                update,
                upsert,
            } => {
                let target = existing(&mut collections, &collection)?;
                let set = operator_fields(&update, "$set")?;
                match target.position(&filter)? {
                    Some(index) => {
                        let mut doc = target.documents[index].clone();
                        for (field, value) in set.into_iter().flatten() {
                            doc.insert(field.clone(), value.clone());
                        }
                        response.matched_count = 1;
                        if target.store(index, doc)? {
                            response.modified_count = 1;
                        }
                    }
                    None if upsert => {
                        let mut doc = equality_fields(&filter);
                        let on_insert = operator_fields(&update, "$setOnInsert")?;
                        for (field, value) in on_insert.into_iter().flatten().chain(set.into_iter().flatten()) {
                            doc.insert(field.clone(), value.clone());
                        }
                        response.upserted_id = Some(target.insert(doc)?);
                    }
                    None => {}
                }
            }
            DocumentRequest::ReplaceOne {
                collection,
                filter,
                replacement,
                upsert,
            } => {
                let target = existing(&mut collections, &collection)?;
                match target.position(&filter)? {
                    Some(index) => {
                        let mut doc = Document::new();
                        if let Some(id) = target.documents[index].get("_id") {
                            doc.insert("_id".to_string(), id.clone());
                        }
                        doc.extend(replacement.into_iter().filter(|(k, _)| k != "_id"));
                        response.matched_count = 1;
                        if target.store(index, doc)? {
                            response.modified_count = 1;
                        }
                    }
                    None if upsert => {
                        let mut doc = equality_fields(&filter);
                        doc.extend(replacement);
                        response.upserted_id = Some(target.insert(doc)?);
                    }
                    None => {}
                }
            }
            DocumentRequest::DeleteOne { collection, filter } => {
                let target = existing(&mut collections, &collection)?;
                if let Some(index) = target.position(&filter)? {
                    target.documents.remove(index);
                    response.deleted_count = 1;
                }
            }
            DocumentRequest::Find {
                collection,
                filter,
                sort,
                skip,
                limit,
            } => {
                let Some(source) = collections.get(&collection) else {
                    return Ok(response);
                };
                let mut found = Vec::new();
                for doc in &source.documents {
                    if matches_filter(doc, &filter)? {
                        found.push(doc.clone());
                    }
                }
                if let Some(sort) = &sort {
                    sort_documents(&mut found, sort);
                }
                response.documents = found
                    .into_iter()
                    .skip(skip.unwrap_or(0))
                    .take(limit.unwrap_or(usize::MAX))
                    .collect();
            }
            DocumentRequest::Aggregate {
                collection,
                pipeline,
            } => {
                let documents = collections
                    .get(&collection)
                    .map(|c| c.documents.clone())
                    .unwrap_or_default();
                response.documents = run_pipeline(documents, &pipeline)?;
            }
        }

        Ok(response)
    }
}

fn existing<'a>(
    collections: &'a mut HashMap<String, Collection>,
    name: &str,
) -> Result<&'a mut Collection, TransportError> {
    collections
        .get_mut(name)
        .ok_or_else(|| TransportError::NamespaceNotFound(name.to_string()))
}

#[async_trait]
impl DocumentTransport for MemoryTransport {
    async fn send(&self, request: DocumentRequest) -> Result<DocumentResponse, TransportError> {
        tracing::trace!("{} on '{}'", request.action(), request.collection());
        self.handle(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexDefinition;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn orders() -> MemoryTransport {
        let transport = MemoryTransport::new();
        transport
            .send(DocumentRequest::CreateCollection {
                collection: "orders".to_string(),
                indexes: vec![IndexDefinition::new("uniq_ref", &["reference"], true)],
            })
            .await
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn test_insert_enforces_unique_keys() {
        let transport = orders().await;
        let insert = |document: Value| DocumentRequest::InsertOne {
            collection: "orders".to_string(),
            document: doc(document),
        };

        transport.send(insert(json!({"_id": 1, "reference": "A"}))).await.unwrap();
        assert!(matches!(
            transport.send(insert(json!({"_id": 1, "reference": "B"}))).await,
            Err(TransportError::DuplicateKey(_))
        ));
        assert!(matches!(
            transport.send(insert(json!({"_id": 2, "reference": "A"}))).await,
            Err(TransportError::DuplicateKey(_))
        ));
        assert_eq!(transport.len("orders"), Some(1));
    }

    #[tokio::test]
    async fn test_insert_many_reports_applied_prefix() {
        let transport = orders().await;
        let result = transport
            .send(DocumentRequest::InsertMany {
                collection: "orders".to_string(),
                documents: vec![
                    doc(json!({"_id": 1, "reference": "A"})),
                    doc(json!({"_id": 2, "reference": "B"})),
                    doc(json!({"_id": 1, "reference": "C"})),
                    doc(json!({"_id": 4, "reference": "D"})),
                ],
            })
            .await;

        match result {
            Err(TransportError::BulkFailure { applied, .. }) => assert_eq!(applied, 2),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(transport.len("orders"), Some(2));
    }

    #[tokio::test]
    async fn test_upserts() {
        let transport = orders().await;

        let ignore = |reference: &str| DocumentRequest::UpdateOne {
            collection: "orders".to_string(),
            filter: json!({"_id": 7}),
            update: json!({"$setOnInsert": {"reference": reference}}),
            upsert: true,
        };
        transport.send(ignore("first")).await.unwrap();
        let second = transport.send(ignore("second")).await.unwrap();
        assert_eq!(second.matched_count, 1);
        assert_eq!(second.modified_count, 0);

        transport
            .send(DocumentRequest::ReplaceOne {
                collection: "orders".to_string(),
                filter: json!({"_id": 7}),
                replacement: doc(json!({"reference": "third"})),
                upsert: true,
            })
            .await
            .unwrap();

        let found = transport
            .send(DocumentRequest::Find {
                collection: "orders".to_string(),
                filter: json!({"_id": 7}),
                sort: None,
                skip: None,
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(found.documents, vec![doc(json!({"_id": 7, "reference": "third"}))]);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let transport = MemoryTransport::new();
        assert!(matches!(
            transport
                .send(DocumentRequest::DeleteOne {
                    collection: "ghost".to_string(),
                    filter: json!({"_id": 1}),
                })
                .await,
            Err(TransportError::NamespaceNotFound(_))
        ));

        let found = transport
            .send(DocumentRequest::Find {
                collection: "ghost".to_string(),
                filter: json!({}),
                sort: None,
                skip: None,
                limit: None,
            })
            .await
            .unwrap();
        assert!(found.documents.is_empty());

        transport
            .send(DocumentRequest::DropCollection {
                collection: "ghost".to_string(),
            })
            .await
            .unwrap();
    }
}
