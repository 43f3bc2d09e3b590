//! Query IR -> SQL
//!
//! Fragments use `?` placeholders; `params` holds one value per placeholder in
//! the order they appear in `sql`. Final statements are rebound through the
//! backend's [`Dialect`].

use super::{contains_like, glob_to_like, validate_field, BoolQuery, CompileError, QueryNode};
use crate::dialect::Dialect;
use serde_json::Value;

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

const ALWAYS_TRUE: &str = "1=1";

impl SqlFragment {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// A predicate that holds for every row
    pub fn always_true() -> Self {
        Self::new(ALWAYS_TRUE, Vec::new())
    }

    pub fn is_always_true(&self) -> bool {
        self.sql == ALWAYS_TRUE
    }

    /// Join fragments with `separator`, concatenating params in order
    ///
    /// A single fragment is returned unchanged; several are parenthesised.
    fn join(mut parts: Vec<SqlFragment>, separator: &str) -> SqlFragment {
        if parts.len() == 1 {
            return parts.remove(0);
        }
        let mut params = Vec::new();
        let mut sql = Vec::with_capacity(parts.len());
        for part in parts {
            sql.push(part.sql);
            params.extend(part.params);
        }
        SqlFragment::new(format!("({})", sql.join(separator)), params)
    }
}

impl QueryNode {
    /// Compile to a SQL predicate
    pub fn to_sql(&self, dialect: Dialect) -> Result<SqlFragment, CompileError> {
        match self {
            QueryNode::Term { field, value } => {
                validate_field(field)?;
                if value.is_null() {
                    Ok(SqlFragment::new(format!("{field} IS NULL"), Vec::new()))
                } else {
                    Ok(SqlFragment::new(
                        format!("{field} = ?"),
                        vec![value.clone()],
                    ))
                }
            }
            QueryNode::Match { field, value } => {
                validate_field(field)?;
                Ok(SqlFragment::new(
                    format!("LOWER({field}) LIKE ?{}", dialect.like_escape_clause()),
                    vec![Value::String(contains_like(value))],
                ))
            }
            QueryNode::Range(range) => {
                validate_field(&range.field)?;
                let parts: Vec<SqlFragment> = range
                    .bounds()
                    .map(|(op, value)| {
                        SqlFragment::new(format!("{} {op} ?", range.field), vec![value.clone()])
                    })
                    .collect();
                if parts.is_empty() {
                    Ok(SqlFragment::always_true())
                } else {
                    Ok(SqlFragment::join(parts, " AND "))
                }
            }
            QueryNode::Exists { field } => {
                validate_field(field)?;
                Ok(SqlFragment::new(format!("{field} IS NOT NULL"), Vec::new()))
            }
            QueryNode::Wildcard { field, pattern } => {
                validate_field(field)?;
                Ok(SqlFragment::new(
                    format!("{field} LIKE ?{}", dialect.like_escape_clause()),
                    vec![Value::String(glob_to_like(pattern))],
                ))
            }
            QueryNode::Regexp { field, pattern } => {
                validate_field(field)?;
                let predicate = dialect
                    .regex_predicate(field)
                    .ok_or_else(|| CompileError::unsupported("regexp query", dialect))?;
                Ok(SqlFragment::new(predicate, vec![Value::String(pattern.clone())]))
            }
            QueryNode::Bool(node) => bool_to_sql(node, dialect),
        }
    }
}

fn bool_to_sql(node: &BoolQuery, dialect: Dialect) -> Result<SqlFragment, CompileError> {
    node.validate()?;

    let mut conjuncts = Vec::new();

    for child in node.must.iter().chain(&node.filter) {
        conjuncts.push(child.to_sql(dialect)?);
    }

    // A child that is unknown on NULL columns counts as false, so the negation
    // keeps those rows
    for child in &node.must_not {
        let compiled = child.to_sql(dialect)?;
        conjuncts.push(SqlFragment::new(
            format!("NOT COALESCE({}, FALSE)", compiled.sql),
            compiled.params,
        ));
    }

    if !node.should.is_empty() {
        let should = node
            .should
            .iter()
            .map(|child| child.to_sql(dialect))
            .collect::<Result<Vec<_>, _>>()?;

        match node.should_threshold() {
            None => conjuncts.push(SqlFragment::join(should, " OR ")),
            Some(threshold) => {
                let mut params = Vec::new();
                let mut indicators = Vec::with_capacity(should.len());
                for part in should {
                    indicators.push(format!("CASE WHEN {} THEN 1 ELSE 0 END", part.sql));
                    params.extend(part.params);
                }
                conjuncts.push(SqlFragment::new(
                    format!("({}) >= {threshold}", indicators.join(" + ")),
                    params,
                ));
            }
        }
    }

    if conjuncts.is_empty() {
        return Ok(SqlFragment::always_true());
    }
    Ok(SqlFragment::join(conjuncts, " AND "))
}
