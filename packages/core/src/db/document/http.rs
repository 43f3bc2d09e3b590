//! JSON-over-HTTP document transport
//!
//! Every request is `POST {base_url}/action/{action}` with a JSON body holding
//! `dataSource`, `database`, `collection` and the action's fields. Failures come
//! back as `{error, errorCode, nApplied?}` with a non-2xx status.

use super::transport::{DocumentRequest, DocumentResponse, DocumentTransport, TransportError};
use crate::config::DocumentStoreConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    n_applied: Option<usize>,
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    database: String,
    data_source: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &DocumentStoreConfig) -> Result<Self, TransportError> {
        config.validate().map_err(TransportError::Malformed)?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            data_source: config.data_source.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/action/{}", self.base_url, action)
    }

    fn payload(&self, request: &DocumentRequest) -> Value {
        let mut body = request.body();
        body.insert("dataSource".to_string(), Value::String(self.data_source.clone()));
        body.insert("database".to_string(), Value::String(self.database.clone()));
        body.insert(
            "collection".to_string(),
            Value::String(request.collection().to_string()),
        );
        Value::Object(body)
    }
}

/// Map an error body onto a typed fault
fn fault(status: u16, body: &str) -> TransportError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let Some(parsed) = parsed else {
        return TransportError::Rejected {
            code: status.to_string(),
            message: body.to_string(),
        };
    };

    let cause = match parsed.error_code.as_str() {
        "DuplicateKey" => TransportError::DuplicateKey(parsed.error),
        "NamespaceNotFound" => TransportError::NamespaceNotFound(parsed.error),
        _ => TransportError::Rejected {
            code: if parsed.error_code.is_empty() {
                status.to_string()
            } else {
                parsed.error_code
            },
            message: parsed.error,
        },
    };

    match parsed.n_applied {
        Some(applied) => TransportError::BulkFailure {
            applied,
            source: Box::new(cause),
        },
        None => cause,
    }
}

#[async_trait]
impl DocumentTransport for HttpTransport {
    async fn send(&self, request: DocumentRequest) -> Result<DocumentResponse, TransportError> {
        let url = self.endpoint(request.action());
        tracing::debug!("POST {} ({})", url, request.collection());

        let mut builder = self.client.post(&url).json(&self.payload(&request));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(fault(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(DocumentResponse::default());
        }
        serde_json::from_str(&body).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}
