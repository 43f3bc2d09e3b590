//! Backend configuration
//!
//! Plain serde structs; loading them from files or the environment is the
//! caller's job. Pass a [`DatabaseConfig`] to [`crate::db::connect`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default `PRAGMA busy_timeout` for local row stores (milliseconds)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Default request timeout for the document store (milliseconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Which backend to build, with its settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DatabaseConfig {
    RowStore(RowStoreConfig),
    DocumentStore(DocumentStoreConfig),
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            DatabaseConfig::RowStore(config) => config.validate(),
            DatabaseConfig::DocumentStore(config) => config.validate(),
        }
    }
}

/// Row store over libsql: a local database file or a remote URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RowStoreConfig {
    /// Local database file; parent directories are created
    pub path: Option<PathBuf>,
    /// Remote libsql URL
    pub url: Option<String>,
    pub auth_token: Option<String>,
    /// Lock wait for local files (default: 5000)
    pub busy_timeout_ms: u64,
}

impl Default for RowStoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            url: None,
            auth_token: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl RowStoreConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn remote(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            auth_token: Some(auth_token.into()),
            ..Self::default()
        }
    }

    /// Exactly one of `path` and `url` must be set
    pub fn validate(&self) -> Result<(), String> {
        match (&self.path, &self.url) {
            (Some(_), Some(_)) => Err("set either path or url, not both".to_string()),
            (None, None) => Err("row store needs a path or a url".to_string()),
            (Some(path), None) if path.as_os_str().is_empty() => {
                Err("path must not be empty".to_string())
            }
            (None, Some(url)) if url.trim().is_empty() => Err("url must not be empty".to_string()),
            _ => Ok(()),
        }
    }
}

/// Document store reached over JSON/HTTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentStoreConfig {
    /// Endpoint root; requests go to `{base_url}/action/{action}`
    pub base_url: String,
    pub database: String,
    /// Cluster/data-source name sent with every request
    pub data_source: String,
    /// Sent as the `api-key` header when set
    pub api_key: Option<String>,
    /// Per-request timeout (default: 30000)
    pub timeout_ms: u64,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            database: String::new(),
            data_source: String::new(),
            api_key: None,
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl DocumentStoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!("base_url must be an http(s) URL, got '{}'", self.base_url));
        }
        if self.database.trim().is_empty() {
            return Err("database must not be empty".to_string());
        }
        if self.data_source.trim().is_empty() {
            return Err("data_source must not be empty".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}
