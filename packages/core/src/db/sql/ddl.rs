//! Statement rendering for the row store
//!
//! Table models become `CREATE TABLE`/`CREATE INDEX` statements in the
//! driver's dialect. Inserts carry the conflict behaviour of the create call.
//! Every identifier reaching this module has been validated by the schema or
//! query layer.

use crate::db::database::ConflictMode;
use crate::dialect::{escape_literal, Dialect};
use crate::schema::{FieldDefinition, IndexDefinition, SemanticType, TableModel};
use serde_json::Value;

/// Column type for a field
pub(crate) fn column_type(dialect: Dialect, field: &FieldDefinition) -> String {
    match (field.semantic_type, field.size) {
        (SemanticType::String, Some(size)) => format!("VARCHAR({size})"),
        (SemanticType::String, None) => match dialect {
            Dialect::MySql => "VARCHAR(255)".to_string(),
            Dialect::Sqlite | Dialect::Postgres => "TEXT".to_string(),
        },
        (SemanticType::Int, _) => match dialect {
            Dialect::Sqlite => "INTEGER".to_string(),
            Dialect::Postgres | Dialect::MySql => "BIGINT".to_string(),
        },
        (SemanticType::Float, _) => match dialect {
            Dialect::Sqlite => "REAL".to_string(),
            Dialect::Postgres => "DOUBLE PRECISION".to_string(),
            Dialect::MySql => "DOUBLE".to_string(),
        },
        (SemanticType::Bool, _) => match dialect {
            Dialect::MySql => "TINYINT(1)".to_string(),
            Dialect::Sqlite | Dialect::Postgres => "BOOLEAN".to_string(),
        },
        (SemanticType::Date, _) => match dialect {
            Dialect::Sqlite => "DATETIME".to_string(),
            Dialect::Postgres => "TIMESTAMPTZ".to_string(),
            Dialect::MySql => "DATETIME(6)".to_string(),
        },
        (SemanticType::Json, _) => match dialect {
            Dialect::Sqlite => "TEXT".to_string(),
            Dialect::Postgres => "JSONB".to_string(),
            Dialect::MySql => "JSON".to_string(),
        },
    }
}

fn default_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", escape_literal(s)),
        other => format!("'{}'", escape_literal(&other.to_string())),
    }
}

pub(crate) fn create_table_sql(dialect: Dialect, model: &TableModel) -> String {
    let mut columns: Vec<String> = model
        .fields
        .iter()
        .map(|field| {
            let mut column = format!("{} {}", field.name, column_type(dialect, field));
            if field.required {
                column.push_str(" NOT NULL");
            }
            if let Some(default) = &field.default {
                column.push_str(" DEFAULT ");
                column.push_str(&default_literal(default));
            }
            column
        })
        .collect();

    if model.has_primary_key() {
        columns.push(format!("PRIMARY KEY ({})", model.primary_key.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        model.table,
        columns.join(", ")
    )
}

/// `CREATE INDEX`; without `IF NOT EXISTS` where the dialect lacks it
pub(crate) fn create_index_sql(dialect: Dialect, table: &str, index: &IndexDefinition) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let if_not_exists = if dialect.supports_index_if_not_exists() {
        "IF NOT EXISTS "
    } else {
        ""
    };
    format!(
        "CREATE {unique}INDEX {if_not_exists}{} ON {table} ({})",
        index.name,
        index.fields.join(", ")
    )
}

pub(crate) fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {table}")
}

/// Single-row insert honouring `mode`
///
/// `primary_key` is required for `Ignore` and `Overwrite` on dialects that name
/// the conflict target.
pub(crate) fn insert_sql(
    dialect: Dialect,
    table: &str,
    columns: &[&str],
    primary_key: &[String],
    mode: ConflictMode,
) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let column_list = columns.join(", ");
    let updatable: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| !primary_key.iter().any(|pk| pk == c))
        .collect();

    match (dialect, mode) {
        (_, ConflictMode::Fail) => {
            format!("INSERT INTO {table} ({column_list}) VALUES ({placeholders})")
        }
        (Dialect::MySql, ConflictMode::Ignore) => {
            format!("INSERT IGNORE INTO {table} ({column_list}) VALUES ({placeholders})")
        }
        (Dialect::MySql, ConflictMode::Overwrite) => {
            let assignments = if updatable.is_empty() {
                primary_key
                    .iter()
                    .map(|c| format!("{c} = {c}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                updatable
                    .iter()
                    .map(|c| format!("{c} = VALUES({c})"))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!(
                "INSERT INTO {table} ({column_list}) VALUES ({placeholders}) \
                 ON DUPLICATE KEY UPDATE {assignments}"
            )
        }
        (Dialect::Sqlite | Dialect::Postgres, ConflictMode::Ignore) => format!(
            "INSERT INTO {table} ({column_list}) VALUES ({placeholders}) \
             ON CONFLICT ({}) DO NOTHING",
            primary_key.join(", ")
        ),
        (Dialect::Sqlite | Dialect::Postgres, ConflictMode::Overwrite) => {
            let action = if updatable.is_empty() {
                "DO NOTHING".to_string()
            } else {
                let assignments = updatable
                    .iter()
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("DO UPDATE SET {assignments}")
            };
            format!(
                "INSERT INTO {table} ({column_list}) VALUES ({placeholders}) \
                 ON CONFLICT ({}) {action}",
                primary_key.join(", ")
            )
        }
    }
}

/// `k1 = ? AND k2 = ?` over key columns
pub(crate) fn key_predicate(columns: &[(String, Value)]) -> String {
    columns
        .iter()
        .map(|(column, _)| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Query listing the primary-key columns of a table as `name`, in key order
pub(crate) fn primary_key_lookup_sql(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite => "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
        Dialect::Postgres => {
            "SELECT kcu.column_name AS name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             WHERE tc.table_name = ? AND tc.constraint_type = 'PRIMARY KEY' \
             ORDER BY kcu.ordinal_position"
        }
        Dialect::MySql => {
            "SELECT column_name AS name \
             FROM information_schema.key_column_usage \
             WHERE table_schema = DATABASE() AND table_name = ? AND constraint_name = 'PRIMARY' \
             ORDER BY ordinal_position"
        }
    }
}
