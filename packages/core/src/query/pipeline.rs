//! Query IR -> aggregation-pipeline expressions
//!
//! Expression form (`{"$eq": ["$field", {"$literal": value}]}`) is what
//! `$match: {$expr}` stages and `$cond` indicators need. Missing and null fields
//! behave the same way they do in the query-operator form and in SQL:
//! comparisons and pattern matches never succeed on them, so `must_not` keeps
//! those records.

use super::{glob_to_regex, validate_field, BoolQuery, CompileError, QueryNode};
use serde_json::{json, Value};

/// `$field` reference
pub(crate) fn field_ref(field: &str) -> String {
    format!("${field}")
}

/// Caller value as an operand; strings starting with `$` stay values
fn literal(value: &Value) -> Value {
    json!({ "$literal": value })
}

/// Field is present and not null
pub(crate) fn field_present_expr(field: &str) -> Value {
    let path = field_ref(field);
    json!({ "$and": [
        { "$ne": [{ "$type": path }, "missing"] },
        { "$ne": [path, null] }
    ]})
}

fn regex_match_expr(field: &str, regex: String, options: Option<&str>) -> Value {
    let mut spec = json!({
        "input": { "$toString": { "$ifNull": [field_ref(field), ""] } },
        "regex": regex,
    });
    if let Some(options) = options {
        spec["options"] = json!(options);
    }
    json!({ "$and": [field_present_expr(field), { "$regexMatch": spec }] })
}

impl QueryNode {
    /// Compile to an aggregation expression evaluating to a boolean
    pub fn to_pipeline_expr(&self) -> Result<Value, CompileError> {
        match self {
            QueryNode::Term { field, value } => {
                validate_field(field)?;
                if value.is_null() {
                    Ok(json!({ "$eq": [{ "$ifNull": [field_ref(field), null] }, null] }))
                } else {
                    Ok(json!({ "$eq": [field_ref(field), literal(value)] }))
                }
            }
            QueryNode::Match { field, value } => {
                validate_field(field)?;
                Ok(regex_match_expr(field, regex::escape(value), Some("i")))
            }
            QueryNode::Range(range) => {
                validate_field(&range.field)?;
                let mut parts = Vec::new();
                for (op, value) in [
                    ("$gt", &range.gt),
                    ("$gte", &range.gte),
                    ("$lt", &range.lt),
                    ("$lte", &range.lte),
                ] {
                    if let Some(value) = value {
                        parts.push(json!({ op: [field_ref(&range.field), literal(value)] }));
                    }
                }
                if parts.is_empty() {
                    return Ok(Value::Bool(true));
                }
                parts.insert(0, field_present_expr(&range.field));
                Ok(json!({ "$and": parts }))
            }
            QueryNode::Exists { field } => {
                validate_field(field)?;
                Ok(field_present_expr(field))
            }
            QueryNode::Wildcard { field, pattern } => {
                validate_field(field)?;
                Ok(regex_match_expr(field, glob_to_regex(pattern), Some("i")))
            }
            QueryNode::Regexp { field, pattern } => {
                validate_field(field)?;
                Ok(regex_match_expr(field, pattern.clone(), None))
            }
            QueryNode::Bool(node) => bool_to_expr(node),
        }
    }

    /// Compile to a `$match` pipeline stage
    pub fn to_pipeline_stage(&self) -> Result<Value, CompileError> {
        Ok(json!({ "$match": { "$expr": self.to_pipeline_expr()? } }))
    }
}

/// "At least `threshold` of `children` hold", as a sum of 0/1 indicators
pub(crate) fn threshold_expr(children: &[QueryNode], threshold: usize) -> Result<Value, CompileError> {
    let indicators = children
        .iter()
        .map(|child| Ok(json!({ "$cond": [child.to_pipeline_expr()?, 1, 0] })))
        .collect::<Result<Vec<_>, CompileError>>()?;
    Ok(json!({ "$gte": [{ "$add": indicators }, threshold] }))
}

fn bool_to_expr(node: &BoolQuery) -> Result<Value, CompileError> {
    node.validate()?;

    let mut parts = Vec::new();

    for child in node.must.iter().chain(&node.filter) {
        parts.push(child.to_pipeline_expr()?);
    }

    for child in &node.must_not {
        parts.push(json!({ "$not": [child.to_pipeline_expr()?] }));
    }

    if !node.should.is_empty() {
        match node.should_threshold() {
            None => {
                let should = node
                    .should
                    .iter()
                    .map(QueryNode::to_pipeline_expr)
                    .collect::<Result<Vec<_>, _>>()?;
                parts.push(json!({ "$or": should }));
            }
            Some(threshold) => parts.push(threshold_expr(&node.should, threshold)?),
        }
    }

    Ok(match parts.len() {
        0 => Value::Bool(true),
        1 => parts.remove(0),
        _ => json!({ "$and": parts }),
    })
}
