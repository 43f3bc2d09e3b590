//! Query IR
//!
//! A backend-agnostic filter tree. Callers build a [`QueryNode`] per query; the
//! active backend compiles it once and discards it.
//!
//! Each node compiles to three targets:
//!
//! - [`QueryNode::to_sql`] - SQL fragment plus ordered parameters (row store)
//! - [`QueryNode::to_document_query`] - query-operator filter (document store `find`)
//! - [`QueryNode::to_pipeline_stage`] - `$match` stage in expression form (document
//!   store aggregation pipelines)
//!
//! Compilation never mutates the tree and never has side effects.
//!
//! # Examples
//!
//! ```rust
//! use serde_json::json;
//! use unistore_core::{BoolQuery, Dialect, QueryNode};
//!
//! let query: QueryNode = BoolQuery::new()
//!     .must(QueryNode::term("status", json!("paid")))
//!     .must(QueryNode::range("amount").gte(json!(100)).into())
//!     .into();
//!
//! let fragment = query.to_sql(Dialect::Sqlite).unwrap();
//! assert_eq!(fragment.sql, "(status = ? AND amount >= ?)");
//! assert_eq!(fragment.params, vec![json!("paid"), json!(100)]);
//! ```

mod document;
mod error;
mod pattern;
mod pipeline;
mod sql;

pub use error::CompileError;
pub use sql::SqlFragment;

pub(crate) use error::validate_field;
pub(crate) use pattern::{contains_like, glob_to_like, glob_to_regex};
pub(crate) use pipeline::field_present_expr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter expression tree
///
/// A closed set of node kinds; every compiler matches exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryNode {
    /// Exact equality. A `null` value matches null or missing fields.
    Term { field: String, value: Value },
    /// Case-insensitive substring match
    Match { field: String, value: String },
    /// Bounded comparison; absent bounds are omitted
    Range(RangeQuery),
    /// Field is present and not null
    Exists { field: String },
    /// Glob match (`*` any run, `?` one character)
    Wildcard { field: String, pattern: String },
    /// Regular-expression match
    Regexp { field: String, pattern: String },
    /// Boolean combination
    Bool(BoolQuery),
}

/// Range bounds for a single field
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeQuery {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
}

/// Boolean combinator
///
/// `must` and `filter` are AND-ed, `must_not` entries are negated and AND-ed,
/// and `should` entries are OR-ed unless `min_should_match` asks for more than
/// one of them. An empty node matches everything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoolQuery {
    #[serde(default)]
    pub must: Vec<QueryNode>,
    #[serde(default)]
    pub should: Vec<QueryNode>,
    #[serde(default)]
    pub must_not: Vec<QueryNode>,
    #[serde(default)]
    pub filter: Vec<QueryNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_should_match: Option<usize>,
}

impl QueryNode {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn text_match(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Match {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Start a range on `field`; chain bounds and convert with `.into()`
    pub fn range(field: impl Into<String>) -> RangeQuery {
        RangeQuery {
            field: field.into(),
            ..Default::default()
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Wildcard {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    pub fn regexp(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Regexp {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Matches every row/document (an empty `Bool`)
    pub fn match_all() -> Self {
        Self::Bool(BoolQuery::default())
    }

    /// Check the whole tree's invariants without compiling it
    pub fn validate(&self) -> Result<(), CompileError> {
        match self {
            QueryNode::Term { field, .. }
            | QueryNode::Match { field, .. }
            | QueryNode::Exists { field }
            | QueryNode::Wildcard { field, .. }
            | QueryNode::Regexp { field, .. } => validate_field(field),
            QueryNode::Range(range) => validate_field(&range.field),
            QueryNode::Bool(node) => node.validate(),
        }
    }
}

impl RangeQuery {
    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    /// Bounds that are set, in `gt, gte, lt, lte` order, with their SQL operator
    pub(crate) fn bounds(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        [
            (">", self.gt.as_ref()),
            (">=", self.gte.as_ref()),
            ("<", self.lt.as_ref()),
            ("<=", self.lte.as_ref()),
        ]
        .into_iter()
        .filter_map(|(op, value)| value.map(|v| (op, v)))
    }
}

impl From<RangeQuery> for QueryNode {
    fn from(range: RangeQuery) -> Self {
        QueryNode::Range(range)
    }
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: QueryNode) -> Self {
        self.must.push(query);
        self
    }

    pub fn should(mut self, query: QueryNode) -> Self {
        self.should.push(query);
        self
    }

    pub fn must_not(mut self, query: QueryNode) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn filter(mut self, query: QueryNode) -> Self {
        self.filter.push(query);
        self
    }

    pub fn min_should_match(mut self, n: usize) -> Self {
        self.min_should_match = Some(n);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
            && self.should.is_empty()
            && self.must_not.is_empty()
            && self.filter.is_empty()
    }

    /// Threshold the `should` list must reach, or `None` for plain OR semantics
    pub(crate) fn should_threshold(&self) -> Option<usize> {
        self.min_should_match.filter(|n| *n != 1)
    }

    pub fn validate(&self) -> Result<(), CompileError> {
        if let Some(value) = self.min_should_match {
            if value == 0 || value > self.should.len() {
                return Err(CompileError::InvalidMinShouldMatch {
                    value,
                    should: self.should.len(),
                });
            }
        }

        self.must
            .iter()
            .chain(&self.should)
            .chain(&self.must_not)
            .chain(&self.filter)
            .try_for_each(QueryNode::validate)
    }
}

impl From<BoolQuery> for QueryNode {
    fn from(query: BoolQuery) -> Self {
        QueryNode::Bool(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_min_should_match_bounds() {
        let three = BoolQuery::new()
            .should(QueryNode::term("a", 1))
            .should(QueryNode::term("b", 2))
            .should(QueryNode::term("c", 3));

        assert!(three.clone().min_should_match(2).validate().is_ok());
        assert!(three.clone().min_should_match(3).validate().is_ok());
        assert_eq!(
            three.clone().min_should_match(4).validate(),
            Err(CompileError::InvalidMinShouldMatch {
                value: 4,
                should: 3
            })
        );
        assert!(three.min_should_match(0).validate().is_err());
        assert!(BoolQuery::new().min_should_match(1).validate().is_err());
    }

    #[test]
    fn test_validate_recurses_into_children() {
        let query: QueryNode = BoolQuery::new()
            .must(QueryNode::term("ok", 1))
            .must_not(QueryNode::exists("bad field"))
            .into();
        assert_eq!(
            query.validate(),
            Err(CompileError::invalid_field("bad field"))
        );
    }

    #[test]
    fn test_serde_shape() {
        let query: QueryNode = BoolQuery::new()
            .filter(QueryNode::range("amount").gt(10).into())
            .into();
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["type"], "bool");
        assert_eq!(value["filter"][0]["type"], "range");
        assert_eq!(value["filter"][0]["gt"], json!(10));

        let back: QueryNode = serde_json::from_value(value).unwrap();
        assert_eq!(back, query);
    }
}
