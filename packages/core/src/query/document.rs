//! Query IR -> document-store filter (query-operator form)
//!
//! This is the payload for `find`-style requests. `min_should_match > 1` has no
//! query-operator equivalent, so it embeds the expression form via `$expr`.

use super::{glob_to_regex, validate_field, BoolQuery, CompileError, QueryNode};
use serde_json::{json, Map, Value};

impl QueryNode {
    /// Compile to a document-store filter
    pub fn to_document_query(&self) -> Result<Value, CompileError> {
        match self {
            QueryNode::Term { field, value } => {
                validate_field(field)?;
                Ok(field_filter(field, json!({ "$eq": value })))
            }
            QueryNode::Match { field, value } => {
                validate_field(field)?;
                Ok(field_filter(
                    field,
                    json!({ "$regex": regex::escape(value), "$options": "i" }),
                ))
            }
            QueryNode::Range(range) => {
                validate_field(&range.field)?;
                let mut ops = Map::new();
                for (key, value) in [
                    ("$gt", &range.gt),
                    ("$gte", &range.gte),
                    ("$lt", &range.lt),
                    ("$lte", &range.lte),
                ] {
                    if let Some(value) = value {
                        ops.insert(key.to_string(), value.clone());
                    }
                }
                if ops.is_empty() {
                    Ok(json!({}))
                } else {
                    Ok(field_filter(&range.field, Value::Object(ops)))
                }
            }
            QueryNode::Exists { field } => {
                validate_field(field)?;
                Ok(field_filter(field, json!({ "$exists": true, "$ne": null })))
            }
            QueryNode::Wildcard { field, pattern } => {
                validate_field(field)?;
                Ok(field_filter(
                    field,
                    json!({ "$regex": glob_to_regex(pattern), "$options": "i" }),
                ))
            }
            QueryNode::Regexp { field, pattern } => {
                validate_field(field)?;
                Ok(field_filter(field, json!({ "$regex": pattern })))
            }
            QueryNode::Bool(node) => bool_to_document(node),
        }
    }
}

fn field_filter(field: &str, condition: Value) -> Value {
    let mut filter = Map::new();
    filter.insert(field.to_string(), condition);
    Value::Object(filter)
}

fn bool_to_document(node: &BoolQuery) -> Result<Value, CompileError> {
    node.validate()?;

    let mut clauses = Vec::new();

    for child in node.must.iter().chain(&node.filter) {
        clauses.push(child.to_document_query()?);
    }

    if !node.must_not.is_empty() {
        let negated = node
            .must_not
            .iter()
            .map(QueryNode::to_document_query)
            .collect::<Result<Vec<_>, _>>()?;
        clauses.push(json!({ "$nor": negated }));
    }

    if !node.should.is_empty() {
        match node.should_threshold() {
            None => {
                let should = node
                    .should
                    .iter()
                    .map(QueryNode::to_document_query)
                    .collect::<Result<Vec<_>, _>>()?;
                clauses.push(json!({ "$or": should }));
            }
            Some(threshold) => {
                let expr = super::pipeline::threshold_expr(&node.should, threshold)?;
                clauses.push(json!({ "$expr": expr }));
            }
        }
    }

    Ok(match clauses.len() {
        0 => json!({}),
        1 => clauses.remove(0),
        _ => json!({ "$and": clauses }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaves() {
        assert_eq!(
            QueryNode::term("status", "paid").to_document_query().unwrap(),
            json!({"status": {"$eq": "paid"}})
        );
        assert_eq!(
            QueryNode::text_match("title", "c++").to_document_query().unwrap(),
            json!({"title": {"$regex": "c\\+\\+", "$options": "i"}})
        );
        assert_eq!(
            QueryNode::exists("email").to_document_query().unwrap(),
            json!({"email": {"$exists": true, "$ne": null}})
        );
        assert_eq!(
            QueryNode::wildcard("code", "A*").to_document_query().unwrap(),
            json!({"code": {"$regex": "^A.*$", "$options": "i"}})
        );
    }

    #[test]
    fn test_range_omits_absent_bounds() {
        let range: QueryNode = QueryNode::range("amount").gt(1).lte(9).into();
        assert_eq!(
            range.to_document_query().unwrap(),
            json!({"amount": {"$gt": 1, "$lte": 9}})
        );

        let unbounded: QueryNode = QueryNode::range("amount").into();
        assert_eq!(unbounded.to_document_query().unwrap(), json!({}));
    }

    #[test]
    fn test_bool() {
        let query: QueryNode = BoolQuery::new()
            .must(QueryNode::term("a", 1))
            .must_not(QueryNode::term("b", 2))
            .should(QueryNode::term("c", 3))
            .should(QueryNode::term("d", 4))
            .into();

        assert_eq!(
            query.to_document_query().unwrap(),
            json!({"$and": [
                {"a": {"$eq": 1}},
                {"$nor": [{"b": {"$eq": 2}}]},
                {"$or": [{"c": {"$eq": 3}}, {"d": {"$eq": 4}}]}
            ]})
        );
        assert_eq!(QueryNode::match_all().to_document_query().unwrap(), json!({}));
    }

    #[test]
    fn test_min_should_match_uses_expr() {
        let query: QueryNode = BoolQuery::new()
            .should(QueryNode::term("a", 1))
            .should(QueryNode::term("b", 2))
            .should(QueryNode::term("c", 3))
            .min_should_match(2)
            .into();

        let compiled = query.to_document_query().unwrap();
        let add = &compiled["$expr"]["$gte"][0]["$add"];
        assert_eq!(add.as_array().unwrap().len(), 3);
        assert_eq!(add[0]["$cond"][0], json!({"$eq": ["$a", {"$literal": 1}]}));
        assert_eq!(compiled["$expr"]["$gte"][1], json!(2));
    }
}
