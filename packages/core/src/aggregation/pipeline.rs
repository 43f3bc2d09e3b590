//! Aggregations -> document-store pipeline
//!
//! Shape: `[{$match}, {$facet: {<level path>: [$group, $sort?, $limit?], ...}}]`.
//! Top-level metrics live in the `__metrics` facet as a single `_id: null` group.

use super::plan::{plan, BucketLevel, KeySource, SortTarget, DOC_COUNT, METRICS_FACET};
use super::{
    Aggregation, CompositeAggregation, DateHistogramAggregation, MetricAggregation,
    TermsAggregation,
};
use crate::query::{CompileError, QueryNode};
use serde_json::{json, Map, Value};

/// Compile a filter plus aggregations into one pipeline
pub fn compile_pipeline(
    query: &QueryNode,
    aggregations: &[Aggregation],
) -> Result<Vec<Value>, CompileError> {
    let plan = plan(aggregations)?;
    let mut stages = vec![query.to_pipeline_stage()?];

    let mut facets = Map::new();
    if !plan.metrics.is_empty() {
        let mut group = Map::new();
        group.insert("_id".to_string(), Value::Null);
        insert_accumulators(&mut group, &plan.metrics)?;
        facets.insert(
            METRICS_FACET.to_string(),
            json!([{ "$group": Value::Object(group) }]),
        );
    }
    for level in &plan.levels {
        facets.insert(level.path_name(), Value::Array(level_stages(level)?));
    }

    if !facets.is_empty() {
        stages.push(json!({ "$facet": Value::Object(facets) }));
    }
    Ok(stages)
}

fn insert_accumulators(
    group: &mut Map<String, Value>,
    metrics: &[&MetricAggregation],
) -> Result<(), CompileError> {
    for metric in metrics {
        group.insert(metric.name.clone(), metric.to_pipeline_accumulator()?);
    }
    Ok(())
}

fn key_expr(source: &KeySource<'_>) -> Value {
    match *source {
        KeySource::Field(field) => Value::String(format!("${field}")),
        KeySource::Date {
            field,
            unit,
            format,
            time_zone,
        } => {
            let mut spec = json!({
                "format": format.unwrap_or(unit.key_format()),
                "date": { "$toDate": format!("${field}") },
            });
            if let Some(tz) = time_zone {
                spec["timezone"] = json!(tz);
            }
            json!({ "$dateToString": spec })
        }
    }
}

fn level_stages(level: &BucketLevel<'_>) -> Result<Vec<Value>, CompileError> {
    let mut id = Map::new();
    for key in &level.keys {
        id.insert(key.alias.clone(), key_expr(&key.source));
    }

    let mut group = Map::new();
    group.insert("_id".to_string(), Value::Object(id));
    group.insert(DOC_COUNT.to_string(), json!({ "$sum": 1 }));
    insert_accumulators(&mut group, &level.node.metrics())?;

    let mut stages = vec![json!({ "$group": Value::Object(group) })];

    if level.is_root() {
        let mut sort = Map::new();
        for key in level.node.sort_keys() {
            let column = match key.target {
                SortTarget::Count => DOC_COUNT.to_string(),
                SortTarget::Key(index) => format!("_id.{}", level.own_keys()[index].alias),
                SortTarget::Metric(name) => name.to_string(),
            };
            let direction = if key.direction.is_desc() { -1 } else { 1 };
            sort.entry(column).or_insert(json!(direction));
        }
        stages.push(json!({ "$sort": Value::Object(sort) }));
        if let Some(size) = level.node.size() {
            stages.push(json!({ "$limit": size }));
        }
    }

    Ok(stages)
}

fn single_level_stages(aggregation: Aggregation) -> Result<Vec<Value>, CompileError> {
    let name = aggregation.name().to_string();
    let plan = plan(std::slice::from_ref(&aggregation))?;
    match plan.levels.first() {
        Some(level) => level_stages(level),
        None => Err(CompileError::invalid_aggregation(name, "not a bucket aggregation")),
    }
}

impl TermsAggregation {
    /// `$group`/`$sort`/`$limit` stages computing this node's buckets
    pub fn to_pipeline(&self) -> Result<Vec<Value>, CompileError> {
        single_level_stages(self.clone().into())
    }
}

impl DateHistogramAggregation {
    pub fn to_pipeline(&self) -> Result<Vec<Value>, CompileError> {
        single_level_stages(self.clone().into())
    }
}

impl CompositeAggregation {
    pub fn to_pipeline(&self) -> Result<Vec<Value>, CompileError> {
        single_level_stages(self.clone().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::BucketOrder;
    use crate::query::field_present_expr;

    #[test]
    fn test_terms_stages() {
        let stages = TermsAggregation::new("by_status", "status")
            .size(10)
            .order(BucketOrder::desc("total_amount"))
            .sub_aggregation(Aggregation::sum("total_amount", "amount"))
            .to_pipeline()
            .unwrap();

        assert_eq!(
            stages,
            vec![
                json!({"$group": {
                    "_id": {"__k0_0": "$status"},
                    "__doc_count": {"$sum": 1},
                    "total_amount": {"$sum": "$amount"}
                }}),
                json!({"$sort": {"total_amount": -1, "_id.__k0_0": 1}}),
                json!({"$limit": 10}),
            ]
        );
    }

    #[test]
    fn test_pipeline_has_match_then_facets() {
        let query = QueryNode::exists("status");
        let aggs = vec![
            Aggregation::count("n", "status"),
            DateHistogramAggregation::new("monthly", "created_at", "month")
                .time_zone("Europe/Paris")
                .into(),
        ];

        let pipeline = compile_pipeline(&query, &aggs).unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline[0]["$match"]["$expr"], field_present_expr("status"));

        let facets = &pipeline[1]["$facet"];
        assert_eq!(facets["__metrics"][0]["$group"]["_id"], Value::Null);
        assert!(facets["__metrics"][0]["$group"]["n"]["$sum"]["$cond"].is_array());

        let key = &facets["monthly"][0]["$group"]["_id"]["__k0_0"]["$dateToString"];
        assert_eq!(key["format"], "%Y-%m");
        assert_eq!(key["timezone"], "Europe/Paris");
        assert_eq!(facets["monthly"][1], json!({"$sort": {"_id.__k0_0": 1}}));
    }

    #[test]
    fn test_no_aggregations_is_just_match() {
        let pipeline = compile_pipeline(&QueryNode::match_all(), &[]).unwrap();
        assert_eq!(pipeline, vec![json!({"$match": {"$expr": true}})]);
    }
}
