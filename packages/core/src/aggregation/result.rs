//! Aggregation results and bucket assembly
//!
//! Backends return flat rows per level (key aliases, `__doc_count`, metric
//! columns). Assembly nests them under their parents and applies ordering and
//! size per parent bucket.

use super::plan::{direct_metrics, key_alias, BucketNode, SortTarget, DOC_COUNT};
use super::{Aggregation, MetricAggregation, MetricKind};
use crate::query::CompileError;
use crate::value::{compare_values, values_equal};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Name-keyed aggregation results
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregationResult {
    values: BTreeMap<String, AggregationValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggregationValue {
    Metric(Value),
    Buckets(Vec<Bucket>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    /// Scalar for terms/histogram buckets, `{source: value}` for composite ones
    pub key: Value,
    pub doc_count: u64,
    #[serde(skip_serializing_if = "AggregationResult::is_empty")]
    pub sub_aggregations: AggregationResult,
}

impl AggregationResult {
    pub fn get(&self, name: &str) -> Option<&AggregationValue> {
        self.values.get(name)
    }

    pub fn metric(&self, name: &str) -> Option<&Value> {
        match self.values.get(name) {
            Some(AggregationValue::Metric(value)) => Some(value),
            _ => None,
        }
    }

    pub fn buckets(&self, name: &str) -> Option<&[Bucket]> {
        match self.values.get(name) {
            Some(AggregationValue::Buckets(buckets)) => Some(buckets),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AggregationValue)> {
        self.values.iter()
    }

    fn insert(&mut self, name: &str, value: AggregationValue) {
        self.values.insert(name.to_string(), value);
    }
}

impl Bucket {
    pub fn metric(&self, name: &str) -> Option<&Value> {
        self.sub_aggregations.metric(name)
    }

    pub fn buckets(&self, name: &str) -> Option<&[Bucket]> {
        self.sub_aggregations.buckets(name)
    }
}

/// Build the result tree
///
/// `metrics` is the single row of top-level metrics (absent when nothing
/// matched on the document store); `levels` maps each level path to its rows.
pub(crate) fn assemble(
    aggregations: &[Aggregation],
    metrics: Option<&Map<String, Value>>,
    levels: &HashMap<String, Vec<Map<String, Value>>>,
) -> Result<AggregationResult, CompileError> {
    Aggregation::validate_all(aggregations)?;
    let mut result = AggregationResult::default();
    assemble_into(&mut result, aggregations, "", 0, &[], metrics, levels);
    Ok(result)
}

fn assemble_into(
    result: &mut AggregationResult,
    aggregations: &[Aggregation],
    parent_path: &str,
    depth: usize,
    prefix: &[(String, Value)],
    row: Option<&Map<String, Value>>,
    levels: &HashMap<String, Vec<Map<String, Value>>>,
) {
    for metric in direct_metrics(aggregations) {
        let value = metric_value(metric, row.and_then(|r| r.get(&metric.name)));
        result.insert(&metric.name, AggregationValue::Metric(value));
    }

    for aggregation in aggregations {
        let Some(node) = BucketNode::from_aggregation(aggregation) else {
            continue;
        };
        let path = if parent_path.is_empty() {
            node.name().to_string()
        } else {
            format!("{parent_path}/{}", node.name())
        };

        let rows = levels.get(&path).map(Vec::as_slice).unwrap_or_default();
        let mut buckets: Vec<(Vec<Value>, Bucket)> = rows
            .iter()
            .filter(|row| {
                prefix.iter().all(|(alias, expected)| {
                    values_equal(row.get(alias).unwrap_or(&Value::Null), expected)
                })
            })
            .map(|row| {
                let own: Vec<Value> = (0..node.key_width())
                    .map(|i| row.get(&key_alias(depth, i)).cloned().unwrap_or(Value::Null))
                    .collect();

                let mut child_prefix = prefix.to_vec();
                child_prefix.extend(
                    own.iter()
                        .enumerate()
                        .map(|(i, value)| (key_alias(depth, i), value.clone())),
                );

                let mut sub = AggregationResult::default();
                assemble_into(
                    &mut sub,
                    node.sub_aggregations(),
                    &path,
                    depth + 1,
                    &child_prefix,
                    Some(row),
                    levels,
                );

                let bucket = Bucket {
                    key: bucket_key(&node, &own),
                    doc_count: as_count(row.get(DOC_COUNT)),
                    sub_aggregations: sub,
                };
                (own, bucket)
            })
            .collect();

        let sort_keys = node.sort_keys();
        buckets.sort_by(|(a_keys, a), (b_keys, b)| {
            for key in &sort_keys {
                let ordering = match key.target {
                    SortTarget::Count => a.doc_count.cmp(&b.doc_count),
                    SortTarget::Key(i) => compare_values(a_keys.get(i), b_keys.get(i)),
                    SortTarget::Metric(name) => compare_values(a.metric(name), b.metric(name)),
                };
                let ordering = if key.direction.is_desc() {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        let mut buckets: Vec<Bucket> = buckets.into_iter().map(|(_, bucket)| bucket).collect();
        if let Some(size) = node.size() {
            buckets.truncate(size);
        }
        result.insert(node.name(), AggregationValue::Buckets(buckets));
    }
}

fn bucket_key(node: &BucketNode<'_>, own: &[Value]) -> Value {
    match node {
        BucketNode::Composite(c) => {
            let mut key = Map::new();
            for (source, value) in c.sources.iter().zip(own) {
                key.insert(source.name.clone(), value.clone());
            }
            Value::Object(key)
        }
        _ => own.first().cloned().unwrap_or(Value::Null),
    }
}

fn as_count(value: Option<&Value>) -> u64 {
    value
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .unwrap_or(0)
}

/// Normalise a metric value so both backends agree on empty inputs:
/// counts and sums are `0`, the others `null`
fn metric_value(metric: &MetricAggregation, value: Option<&Value>) -> Value {
    match (metric.kind, value) {
        (MetricKind::Count, v) => json!(as_count(v)),
        (MetricKind::Sum, None | Some(Value::Null)) => json!(0),
        (_, Some(v)) => v.clone(),
        (_, None) => Value::Null,
    }
}
