//! Generic SQL Driver Seam
//!
//! The row store talks to its engine through [`SqlDriver`] and
//! [`SqlConnection`]. Statements arrive fully rendered for the driver's
//! [`Dialect`]; parameters are JSON values converted by the driver.
//!
//! [`LibsqlDriver`] is the bundled implementation (SQLite-compatible, local
//! file or remote libsql server).

use crate::db::BoxError;
use crate::dialect::Dialect;
use crate::record::Record;
use async_trait::async_trait;
use libsql::{Builder, Connection};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Factory for connections to one SQL engine
#[async_trait]
pub trait SqlDriver: Send + Sync {
    /// Dialect statements must be rendered in
    fn dialect(&self) -> Dialect;

    /// Open a connection; each connection is used by one caller at a time
    async fn connect(&self) -> Result<Box<dyn SqlConnection>, BoxError>;

    /// Release driver resources
    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// One open connection
#[async_trait]
pub trait SqlConnection: Send + Sync {
    /// Run a statement, returning the affected row count
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64, BoxError>;

    /// Run a query, returning one record per row keyed by column name
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Record>, BoxError>;
}

enum LibsqlTarget {
    Local(PathBuf),
    Remote { url: String },
}

/// libsql-backed driver
pub struct LibsqlDriver {
    db: libsql::Database,
    target: LibsqlTarget,
    busy_timeout: Duration,
}

impl std::fmt::Debug for LibsqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match &self.target {
            LibsqlTarget::Local(path) => path.display().to_string(),
            LibsqlTarget::Remote { url } => url.clone(),
        };
        f.debug_struct("LibsqlDriver")
            .field("target", &target)
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}

impl LibsqlDriver {
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

    /// Open (creating if needed) a local database file
    pub async fn open_local(path: impl AsRef<Path>) -> Result<Self, BoxError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&path).build().await?;
        tracing::debug!("Opened libsql database at {}", path.display());

        Ok(Self {
            db,
            target: LibsqlTarget::Local(path),
            busy_timeout: Self::DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Connect to a remote libsql server
    pub async fn open_remote(
        url: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Result<Self, BoxError> {
        let url = url.into();
        let db = Builder::new_remote(url.clone(), auth_token.into())
            .build()
            .await?;
        tracing::debug!("Opened remote libsql database at {}", url);

        Ok(Self {
            db,
            target: LibsqlTarget::Remote { url },
            busy_timeout: Self::DEFAULT_BUSY_TIMEOUT,
        })
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), BoxError> {
        let mut stmt = conn
            .prepare(pragma)
            .await
            .map_err(|e| format!("Failed to execute '{}': {}", pragma, e))?;
        let _ = stmt
            .query(())
            .await
            .map_err(|e| format!("Failed to execute '{}': {}", pragma, e))?;
        Ok(())
    }
}

#[async_trait]
impl SqlDriver for LibsqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn connect(&self) -> Result<Box<dyn SqlConnection>, BoxError> {
        let conn = self.db.connect()?;

        // Remote connections are configured server side
        if let LibsqlTarget::Local(_) = self.target {
            let pragma = format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis());
            self.execute_pragma(&conn, &pragma).await?;
        }

        Ok(Box::new(LibsqlConnection { conn }))
    }
}

struct LibsqlConnection {
    conn: Connection,
}

#[async_trait]
impl SqlConnection for LibsqlConnection {
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64, BoxError> {
        let params = libsql::params::Params::Positional(to_libsql_values(params));
        Ok(self.conn.execute(sql, params).await?)
    }

    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Record>, BoxError> {
        let params = libsql::params::Params::Positional(to_libsql_values(params));
        let mut rows = self.conn.query(sql, params).await?;

        let columns: Vec<String> = (0..rows.column_count())
            .map(|i| rows.column_name(i).unwrap_or_default().to_string())
            .collect();

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut fields = Map::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                let value = row.get_value(i as i32)?;
                fields.insert(name.clone(), from_libsql_value(value));
            }
            records.push(Record::from(fields));
        }
        Ok(records)
    }
}

fn to_libsql_values(params: Vec<Value>) -> Vec<libsql::Value> {
    params.into_iter().map(to_libsql_value).collect()
}

fn to_libsql_value(value: Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => libsql::Value::Integer(i),
            None => libsql::Value::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => libsql::Value::Text(s),
        // JSON columns are TEXT on SQLite
        other @ (Value::Array(_) | Value::Object(_)) => libsql::Value::Text(other.to_string()),
    }
}

fn from_libsql_value(value: libsql::Value) -> Value {
    match value {
        libsql::Value::Null => Value::Null,
        libsql::Value::Integer(i) => Value::from(i),
        libsql::Value::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        libsql::Value::Text(s) => Value::String(s),
        libsql::Value::Blob(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_value_conversion() {
        assert!(matches!(to_libsql_value(json!(true)), libsql::Value::Integer(1)));
        assert!(matches!(to_libsql_value(json!(7)), libsql::Value::Integer(7)));
        assert!(matches!(to_libsql_value(json!(2.5)), libsql::Value::Real(f) if f == 2.5));
        assert!(matches!(
            to_libsql_value(json!({"a": 1})),
            libsql::Value::Text(s) if s == "{\"a\":1}"
        ));
        assert_eq!(from_libsql_value(libsql::Value::Real(f64::NAN)), Value::Null);
        assert_eq!(from_libsql_value(libsql::Value::Blob(vec![1, 2])), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_local_round_trip() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let driver = LibsqlDriver::open_local(dir.path().join("nested/test.db"))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let conn = driver.connect().await.map_err(|e| anyhow::anyhow!(e))?;

        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL)", vec![])
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let inserted = conn
            .execute(
                "INSERT INTO t (id, name, score) VALUES (?, ?, ?)",
                vec![json!(1), json!("alpha"), json!(1.5)],
            )
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        assert_eq!(inserted, 1);

        let rows = conn
            .query("SELECT id, name, score FROM t WHERE id = ?", vec![json!(1)])
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&json!("alpha")));
        assert_eq!(rows[0].get("score"), Some(&json!(1.5)));
        Ok(())
    }
}
