//! Document-store transport seam
//!
//! The document backend compiles everything into typed [`DocumentRequest`]s.
//! A [`DocumentTransport`] carries them to the store: over HTTP
//! ([`HttpTransport`](super::HttpTransport)) or in process
//! ([`MemoryTransport`](super::MemoryTransport)).

use crate::schema::IndexDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub type Document = Map<String, Value>;

/// One request to the document store
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentRequest {
    /// Create the collection and its indexes if absent
    CreateCollection {
        collection: String,
        indexes: Vec<IndexDefinition>,
    },
    /// Drop the collection; succeeds when it does not exist
    DropCollection { collection: String },
    InsertOne {
        collection: String,
        document: Document,
    },
    /// Ordered insert that stops at the first failing document
    InsertMany {
        collection: String,
        documents: Vec<Document>,
    },
    /// Apply `$set`/`$setOnInsert` to the first match
    UpdateOne {
        collection: String,
        filter: Value,
        update: Value,
        upsert: bool,
    },
    ReplaceOne {
        collection: String,
        filter: Value,
        replacement: Document,
        upsert: bool,
    },
    DeleteOne { collection: String, filter: Value },
    Find {
        collection: String,
        filter: Value,
        sort: Option<Document>,
        skip: Option<usize>,
        limit: Option<usize>,
    },
    Aggregate {
        collection: String,
        pipeline: Vec<Value>,
    },
}

impl DocumentRequest {
    pub fn collection(&self) -> &str {
        match self {
            DocumentRequest::CreateCollection { collection, .. }
            | DocumentRequest::DropCollection { collection }
            | DocumentRequest::InsertOne { collection, .. }
            | DocumentRequest::InsertMany { collection, .. }
            | DocumentRequest::UpdateOne { collection, .. }
            | DocumentRequest::ReplaceOne { collection, .. }
            | DocumentRequest::DeleteOne { collection, .. }
            | DocumentRequest::Find { collection, .. }
            | DocumentRequest::Aggregate { collection, .. } => collection,
        }
    }

    /// Action name in the HTTP protocol
    pub fn action(&self) -> &'static str {
        match self {
            DocumentRequest::CreateCollection { .. } => "createCollection",
            DocumentRequest::DropCollection { .. } => "dropCollection",
            DocumentRequest::InsertOne { .. } => "insertOne",
            DocumentRequest::InsertMany { .. } => "insertMany",
            DocumentRequest::UpdateOne { .. } => "updateOne",
            DocumentRequest::ReplaceOne { .. } => "replaceOne",
            DocumentRequest::DeleteOne { .. } => "deleteOne",
            DocumentRequest::Find { .. } => "find",
            DocumentRequest::Aggregate { .. } => "aggregate",
        }
    }

    /// Action-specific body fields
    pub fn body(&self) -> Document {
        let body = match self {
            DocumentRequest::CreateCollection { indexes, .. } => {
                let indexes: Vec<Value> = indexes
                    .iter()
                    .map(|index| {
                        let keys: Document = index
                            .fields
                            .iter()
                            .map(|field| (field.clone(), json!(1)))
                            .collect();
                        json!({ "name": index.name, "keys": keys, "unique": index.unique })
                    })
                    .collect();
                json!({ "indexes": indexes })
            }
            DocumentRequest::DropCollection { .. } => json!({}),
            DocumentRequest::InsertOne { document, .. } => json!({ "document": document }),
            DocumentRequest::InsertMany { documents, .. } => {
                json!({ "documents": documents, "ordered": true })
            }
            DocumentRequest::UpdateOne {
                filter,
                update,
                upsert,
                ..
            } => json!({ "filter": filter, "update": update, "upsert": upsert }),
            DocumentRequest::ReplaceOne {
                filter,
                replacement,
                upsert,
                ..
            } => json!({ "filter": filter, "replacement": replacement, "upsert": upsert }),
            DocumentRequest::DeleteOne { filter, .. } => json!({ "filter": filter }),
            DocumentRequest::Find {
                filter,
                sort,
                skip,
                limit,
                ..
            } => {
                let mut body = json!({ "filter": filter });
                if let Some(sort) = sort {
                    body["sort"] = Value::Object(sort.clone());
                }
                if let Some(skip) = skip {
                    body["skip"] = json!(skip);
                }
                if let Some(limit) = limit {
                    body["limit"] = json!(limit);
                }
                body
            }
            DocumentRequest::Aggregate { pipeline, .. } => json!({ "pipeline": pipeline }),
        };
        match body {
            Value::Object(map) => map,
            _ => Document::new(),
        }
    }
}

/// Result of one request; counters not reported by an action stay zero
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentResponse {
    pub inserted_ids: Vec<Value>,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_id: Option<Value>,
    pub documents: Vec<Document>,
}

/// Typed faults reported by a transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// Write collided with an existing `_id` or unique index entry
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("collection '{0}' does not exist")]
    NamespaceNotFound(String),

    /// Ordered bulk write stopped after `applied` documents
    #[error("bulk write stopped after {applied} documents: {source}")]
    BulkFailure {
        applied: usize,
        #[source]
        source: Box<TransportError>,
    },

    /// Store rejected the request for any other reason
    #[error("request failed ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request or response that does not fit the protocol
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Carries requests to a document store
#[async_trait]
pub trait DocumentTransport: Send + Sync {
    async fn send(&self, request: DocumentRequest) -> Result<DocumentResponse, TransportError>;

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_body_omits_unset_paging() {
        let request = DocumentRequest::Find {
            collection: "orders".to_string(),
            filter: json!({"status": {"$eq": "paid"}}),
            sort: None,
            skip: None,
            limit: Some(5),
        };
        assert_eq!(request.action(), "find");
        assert_eq!(request.collection(), "orders");
        assert_eq!(
            Value::Object(request.body()),
            json!({"filter": {"status": {"$eq": "paid"}}, "limit": 5})
        );
    }

    #[test]
    fn test_create_collection_body_lists_index_keys() {
        let request = DocumentRequest::CreateCollection {
            collection: "orders".to_string(),
            indexes: vec![IndexDefinition::new("uniq_orders_ref", &["tenant", "reference"], true)],
        };
        assert_eq!(
            Value::Object(request.body()),
            json!({"indexes": [{
                "name": "uniq_orders_ref",
                "keys": {"tenant": 1, "reference": 1},
                "unique": true
            }]})
        );
    }

    #[test]
    fn test_response_defaults_missing_counters() {
        let response: DocumentResponse =
            serde_json::from_value(json!({"matchedCount": 1, "modifiedCount": 1})).unwrap();
        assert_eq!(response.matched_count, 1);
        assert_eq!(response.deleted_count, 0);
        assert!(response.documents.is_empty());
    }
}
