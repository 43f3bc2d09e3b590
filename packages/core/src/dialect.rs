//! SQL Dialects
//!
//! Compiled SQL fragments always use `?` placeholders. The row-store backend
//! resolves its [`Dialect`] once at construction and renders final statements
//! through it: `$n` numbering, index DDL, upserts, regex and date truncation all
//! vary per engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL dialect of the engine behind a row-store driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite / libsql: `?` placeholders, transactional DDL
    #[default]
    Sqlite,
    /// PostgreSQL: `$n` placeholders, transactional DDL
    Postgres,
    /// MySQL: `?` placeholders, DDL auto-commits, no `CREATE INDEX IF NOT EXISTS`
    MySql,
}

/// Truncation granularity for date histograms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateUnit {
    Hour,
    Day,
    Month,
    Year,
}

impl DateUnit {
    /// strftime-style key format shared by the SQL and pipeline compilers, so
    /// both backends produce identical bucket keys
    pub fn key_format(self) -> &'static str {
        match self {
            DateUnit::Hour => "%Y-%m-%d %H:00",
            DateUnit::Day => "%Y-%m-%d",
            DateUnit::Month => "%Y-%m",
            DateUnit::Year => "%Y",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    /// Whether placeholders are numbered (`$1, $2, ...`)
    pub fn numbered_placeholders(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    pub fn supports_index_if_not_exists(self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Whether DDL participates in an enclosing transaction
    ///
    /// On MySQL every DDL statement commits implicitly; a rollback issued after
    /// it cannot undo it.
    pub fn ddl_is_transactional(self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Statement opening a native transaction
    pub fn begin_transaction(self) -> &'static str {
        match self {
            Dialect::Sqlite => "BEGIN TRANSACTION",
            Dialect::Postgres => "BEGIN",
            Dialect::MySql => "START TRANSACTION",
        }
    }

    /// Rewrite `?` placeholders into the dialect's style
    ///
    /// Quoted literals (`'...'`) and quoted identifiers (`"..."`, `` `...` ``)
    /// are copied verbatim.
    pub fn rebind(self, sql: &str) -> String {
        if !self.numbered_placeholders() {
            return sql.to_string();
        }

        let mut out = String::with_capacity(sql.len() + 8);
        let mut quote: Option<char> = None;
        let mut n = 0usize;

        for c in sql.chars() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                    out.push(c);
                }
                None => match c {
                    '\'' | '"' | '`' => {
                        quote = Some(c);
                        out.push(c);
                    }
                    '?' => {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    }
                    _ => out.push(c),
                },
            }
        }
        out
    }

    /// Trailing clause naming the LIKE escape character
    ///
    /// MySQL already treats backslash as the escape character, and `'\'` is not
    /// a valid literal there.
    pub fn like_escape_clause(self) -> &'static str {
        match self {
            Dialect::MySql => "",
            Dialect::Sqlite | Dialect::Postgres => " ESCAPE '\\'",
        }
    }

    /// Predicate testing `field` against a regex bound as one parameter
    ///
    /// `None` on SQLite: libsql ships no `regexp()` function, so `REGEXP` fails
    /// at execution time.
    pub fn regex_predicate(self, field: &str) -> Option<String> {
        match self {
            Dialect::Postgres => Some(format!("{field} ~ ?")),
            Dialect::MySql => Some(format!("{field} REGEXP ?")),
            Dialect::Sqlite => None,
        }
    }

    /// Expression truncating `field` to `unit`, rendered as a text key
    ///
    /// `format` replaces the default key format where the engine can apply it.
    /// `time_zone` is honoured on PostgreSQL only; SQLite and MySQL bucket in the
    /// stored offset.
    pub fn date_bucket(
        self,
        field: &str,
        unit: DateUnit,
        format: Option<&str>,
        time_zone: Option<&str>,
    ) -> String {
        let fmt = format.unwrap_or(unit.key_format());
        match self {
            Dialect::Sqlite => format!("strftime('{}', {field})", escape_literal(fmt)),
            Dialect::MySql => {
                let mysql_fmt = fmt.replace("%M", "%i");
                format!("DATE_FORMAT({field}, '{}')", escape_literal(&mysql_fmt))
            }
            Dialect::Postgres => {
                let source = match time_zone {
                    Some(tz) => format!("({field} AT TIME ZONE '{}')", escape_literal(tz)),
                    None => field.to_string(),
                };
                format!(
                    "to_char({source}, '{}')",
                    escape_literal(&strftime_to_postgres(fmt))
                )
            }
        }
    }

    /// `LIMIT`/`OFFSET` tail (with leading space), empty when neither is set
    pub fn limit_offset(self, limit: Option<usize>, offset: Option<usize>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (None, Some(offset)) => match self {
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {offset}"),
                Dialect::MySql => format!(" LIMIT 18446744073709551615 OFFSET {offset}"),
                Dialect::Postgres => format!(" OFFSET {offset}"),
            },
        }
    }

    /// Whether an error message reports a duplicate index on creation
    pub(crate) fn is_duplicate_index_error(self, message: &str) -> bool {
        let message = message.to_lowercase();
        message.contains("already exists") || message.contains("duplicate key name")
    }

    /// Whether an error message reports a unique/primary key violation
    pub(crate) fn is_unique_violation(self, message: &str) -> bool {
        let message = message.to_lowercase();
        match self {
            Dialect::Sqlite => {
                message.contains("unique constraint failed")
                    || message.contains("primary key must be unique")
            }
            Dialect::Postgres => message.contains("duplicate key value violates unique"),
            Dialect::MySql => message.contains("duplicate entry"),
        }
    }

    /// Whether an error message reports a missing table
    pub(crate) fn is_missing_table(self, message: &str) -> bool {
        let message = message.to_lowercase();
        message.contains("no such table")
            || (message.contains("relation") && message.contains("does not exist"))
            || (message.contains("table") && message.contains("doesn't exist"))
    }
}

/// Escape a string for use inside a single-quoted SQL literal
pub(crate) fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn strftime_to_postgres(fmt: &str) -> String {
    fmt.replace("%Y", "YYYY")
        .replace("%m", "MM")
        .replace("%d", "DD")
        .replace("%H", "HH24")
        .replace("%M", "MI")
        .replace("%S", "SS")
}
