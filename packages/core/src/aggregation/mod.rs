//! Aggregation IR
//!
//! Metric leaves (sum/avg/min/max/count) and bucket nodes (terms, date
//! histogram, composite) holding ordered sub-aggregations.
//!
//! # Compilation model
//!
//! Every bucket node at depth `d` becomes one grouped query keyed by its
//! ancestors' keys plus its own, selecting the document count and its direct
//! metric sub-aggregations. Top-level metrics become a single ungrouped query.
//! The row store runs one SQL statement per level; the document store runs one
//! pipeline whose `$facet` stage holds one branch per level. Both hand the rows
//! to the same assembler, which nests buckets and applies per-parent ordering
//! and size limits, so ordering and tie-breaks are identical across backends.
//!
//! # Examples
//!
//! ```rust
//! use unistore_core::{Aggregation, BucketOrder, Dialect, SqlFragment, TermsAggregation};
//!
//! let by_status = TermsAggregation::new("by_status", "status")
//!     .size(10)
//!     .order(BucketOrder::desc("total_amount"))
//!     .sub_aggregation(Aggregation::sum("total_amount", "amount"));
//!
//! let sql = by_status
//!     .to_sql("orders", &SqlFragment::always_true(), Dialect::Sqlite)
//!     .unwrap();
//! assert!(sql.sql.contains("GROUP BY status"));
//! assert!(sql.sql.contains("SUM(amount) AS total_amount"));
//! assert!(sql.sql.contains("ORDER BY total_amount DESC"));
//! assert!(sql.sql.contains("LIMIT 10"));
//! ```

mod pipeline;
mod plan;
mod result;
mod sql;

pub use pipeline::compile_pipeline;
pub use result::{AggregationResult, AggregationValue, Bucket};
pub use sql::{compile_sql, SqlAggregation};

pub(crate) use plan::METRICS_FACET;
pub(crate) use result::assemble;

use crate::dialect::DateUnit;
use crate::query::{field_present_expr, validate_field, CompileError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

/// Aggregation tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Aggregation {
    Metric(MetricAggregation),
    Terms(TermsAggregation),
    DateHistogram(DateHistogramAggregation),
    Composite(CompositeAggregation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// Scalar-producing aggregation
///
/// `Count` with an empty field counts every row/document; with a field it
/// counts occurrences where the field is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregation {
    pub kind: MetricKind,
    pub name: String,
    #[serde(default)]
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn is_desc(self) -> bool {
        matches!(self, SortDirection::Desc)
    }
}

/// Bucket ordering: `_count`, `_key`, or the name of a metric sub-aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOrder {
    pub key: String,
    pub direction: SortDirection,
}

impl BucketOrder {
    pub const COUNT: &'static str = "_count";
    pub const KEY: &'static str = "_key";

    pub fn asc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// One bucket per distinct value of `field`
///
/// Defaults to `_count` descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermsAggregation {
    pub name: String,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<BucketOrder>,
    #[serde(default)]
    pub sub_aggregations: Vec<Aggregation>,
}

/// One bucket per calendar interval of a date field
///
/// Recognised intervals: `1h|hour`, `1d|day`, `1M|month`, `1y|year`. Any
/// other token buckets by day. Keys are strings rendered with `format`
/// (strftime syntax) or the interval's default format. Ordered by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateHistogramAggregation {
    pub name: String,
    pub field: String,
    pub interval: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub sub_aggregations: Vec<Aggregation>,
}

/// Named source of a composite key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeSource {
    pub name: String,
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// One bucket per distinct combination of source fields
///
/// Bucket keys are objects `{source_name: value}`; buckets are ordered by the
/// sources in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeAggregation {
    pub name: String,
    pub sources: Vec<CompositeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default)]
    pub sub_aggregations: Vec<Aggregation>,
}

impl Aggregation {
    pub fn metric(kind: MetricKind, name: impl Into<String>, field: impl Into<String>) -> Self {
        Aggregation::Metric(MetricAggregation {
            kind,
            name: name.into(),
            field: field.into(),
        })
    }

    pub fn sum(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Sum, name, field)
    }

    pub fn avg(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Avg, name, field)
    }

    pub fn min(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Min, name, field)
    }

    pub fn max(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Max, name, field)
    }

    /// Count rows; pass `""` to count all, or a field to count its occurrences
    pub fn count(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::metric(MetricKind::Count, name, field)
    }

    pub fn name(&self) -> &str {
        match self {
            Aggregation::Metric(m) => &m.name,
            Aggregation::Terms(t) => &t.name,
            Aggregation::DateHistogram(h) => &h.name,
            Aggregation::Composite(c) => &c.name,
        }
    }

    pub fn sub_aggregations(&self) -> &[Aggregation] {
        match self {
            Aggregation::Metric(_) => &[],
            Aggregation::Terms(t) => &t.sub_aggregations,
            Aggregation::DateHistogram(h) => &h.sub_aggregations,
            Aggregation::Composite(c) => &c.sub_aggregations,
        }
    }

    /// Validate a sibling list and everything below it
    pub fn validate_all(aggregations: &[Aggregation]) -> Result<(), CompileError> {
        let mut seen = HashSet::new();
        for aggregation in aggregations {
            if !seen.insert(aggregation.name()) {
                return Err(CompileError::DuplicateAggregationName {
                    name: aggregation.name().to_string(),
                });
            }
            aggregation.validate()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CompileError> {
        validate_name(self.name())?;
        match self {
            Aggregation::Metric(m) => m.validate(),
            Aggregation::Terms(t) => {
                validate_field(&t.field)?;
                validate_size(&t.name, t.size)?;
                if let Some(order) = &t.order {
                    validate_order(&t.name, order, &t.sub_aggregations)?;
                }
                Self::validate_all(&t.sub_aggregations)
            }
            Aggregation::DateHistogram(h) => {
                validate_field(&h.field)?;
                Self::validate_all(&h.sub_aggregations)
            }
            Aggregation::Composite(c) => {
                if c.sources.is_empty() {
                    return Err(CompileError::invalid_aggregation(
                        &c.name,
                        "composite needs at least one source",
                    ));
                }
                let mut names = HashSet::new();
                for source in &c.sources {
                    validate_name(&source.name)?;
                    validate_field(&source.field)?;
                    if !names.insert(source.name.as_str()) {
                        return Err(CompileError::invalid_aggregation(
                            &c.name,
                            format!("duplicate source name '{}'", source.name),
                        ));
                    }
                }
                validate_size(&c.name, c.size)?;
                Self::validate_all(&c.sub_aggregations)
            }
        }
    }
}

/// Aggregation and source names become SQL aliases and document keys
fn validate_name(name: &str) -> Result<(), CompileError> {
    if name.starts_with("__") || name.contains('.') {
        return Err(CompileError::invalid_aggregation(
            name,
            "names may not start with '__' or contain '.'",
        ));
    }
    validate_field(name).map_err(|_| CompileError::invalid_aggregation(name, "invalid name"))
}

fn validate_size(name: &str, size: Option<usize>) -> Result<(), CompileError> {
    if size == Some(0) {
        return Err(CompileError::invalid_aggregation(name, "size must be positive"));
    }
    Ok(())
}

fn validate_order(
    name: &str,
    order: &BucketOrder,
    sub_aggregations: &[Aggregation],
) -> Result<(), CompileError> {
    if order.key == BucketOrder::COUNT || order.key == BucketOrder::KEY {
        return Ok(());
    }
    let is_metric = sub_aggregations
        .iter()
        .any(|sub| matches!(sub, Aggregation::Metric(m) if m.name == order.key));
    if is_metric {
        Ok(())
    } else {
        Err(CompileError::invalid_aggregation(
            name,
            format!(
                "order key '{}' must be _count, _key or a metric sub-aggregation",
                order.key
            ),
        ))
    }
}

impl MetricAggregation {
    pub fn validate(&self) -> Result<(), CompileError> {
        validate_name(&self.name)?;
        match (self.kind, self.field.is_empty()) {
            (MetricKind::Count, true) => Ok(()),
            (_, true) => Err(CompileError::MissingField {
                name: self.name.clone(),
            }),
            (_, false) => validate_field(&self.field),
        }
    }

    /// SQL select expression, e.g. `SUM(amount) AS total_amount`
    pub fn to_sql(&self) -> Result<String, CompileError> {
        self.validate()?;
        Ok(format!("{} AS {}", self.aggregate_expr(), self.name))
    }

    /// Aggregate call without its alias; callers validate first
    pub(crate) fn aggregate_expr(&self) -> String {
        match self.kind {
            MetricKind::Sum => format!("SUM({})", self.field),
            MetricKind::Avg => format!("AVG({})", self.field),
            MetricKind::Min => format!("MIN({})", self.field),
            MetricKind::Max => format!("MAX({})", self.field),
            MetricKind::Count if self.field.is_empty() => "COUNT(*)".to_string(),
            MetricKind::Count => format!("COUNT({})", self.field),
        }
    }

    /// `$group` accumulator, e.g. `{"$sum": "$amount"}`
    ///
    /// A field count only counts values that are present, non-null and, for
    /// text, non-empty.
    pub fn to_pipeline_accumulator(&self) -> Result<Value, CompileError> {
        self.validate()?;
        let path = format!("${}", self.field);
        Ok(match self.kind {
            MetricKind::Sum => json!({ "$sum": path }),
            MetricKind::Avg => json!({ "$avg": path }),
            MetricKind::Min => json!({ "$min": path }),
            MetricKind::Max => json!({ "$max": path }),
            MetricKind::Count if self.field.is_empty() => json!({ "$sum": 1 }),
            MetricKind::Count => {
                let present = json!({ "$and": [
                    field_present_expr(&self.field),
                    { "$ne": [path, ""] }
                ]});
                json!({ "$sum": { "$cond": [present, 1, 0] } })
            }
        })
    }
}

impl TermsAggregation {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            size: None,
            order: None,
            sub_aggregations: Vec::new(),
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn order(mut self, order: BucketOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn sub_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.sub_aggregations.push(aggregation);
        self
    }
}

impl DateHistogramAggregation {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        interval: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            interval: interval.into(),
            format: None,
            time_zone: None,
            sub_aggregations: Vec::new(),
        }
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    pub fn sub_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.sub_aggregations.push(aggregation);
        self
    }

    /// Interval token -> truncation unit; unknown tokens fall back to days
    pub fn unit(&self) -> DateUnit {
        match self.interval.as_str() {
            "1h" | "hour" => DateUnit::Hour,
            "1d" | "day" => DateUnit::Day,
            "1M" | "month" => DateUnit::Month,
            "1y" | "year" => DateUnit::Year,
            other => {
                tracing::debug!("Unrecognised date_histogram interval '{}', using day", other);
                DateUnit::Day
            }
        }
    }
}

impl CompositeAggregation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            size: None,
            sub_aggregations: Vec::new(),
        }
    }

    pub fn source(
        mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        direction: SortDirection,
    ) -> Self {
        self.sources.push(CompositeSource {
            name: name.into(),
            field: field.into(),
            direction,
        });
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn sub_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.sub_aggregations.push(aggregation);
        self
    }
}

impl From<TermsAggregation> for Aggregation {
    fn from(value: TermsAggregation) -> Self {
        Aggregation::Terms(value)
    }
}

impl From<DateHistogramAggregation> for Aggregation {
    fn from(value: DateHistogramAggregation) -> Self {
        Aggregation::DateHistogram(value)
    }
}

impl From<CompositeAggregation> for Aggregation {
    fn from(value: CompositeAggregation) -> Self {
        Aggregation::Composite(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(aggregation: Aggregation) -> MetricAggregation {
        match aggregation {
            Aggregation::Metric(m) => m,
            other => panic!("expected metric, got {:?}", other),
        }
    }

    #[test]
    fn test_count_to_sql() {
        assert_eq!(
            metric(Aggregation::count("total", "")).to_sql().unwrap(),
            "COUNT(*) AS total"
        );
        assert_eq!(
            metric(Aggregation::count("with_status", "status"))
                .to_sql()
                .unwrap(),
            "COUNT(status) AS with_status"
        );
    }

    #[test]
    fn test_metric_to_sql() {
        assert_eq!(
            metric(Aggregation::sum("total_amount", "amount"))
                .to_sql()
                .unwrap(),
            "SUM(amount) AS total_amount"
        );
        assert_eq!(
            metric(Aggregation::avg("avg_amount", "amount")).to_sql().unwrap(),
            "AVG(amount) AS avg_amount"
        );
        assert!(metric(Aggregation::sum("s", "")).to_sql().is_err());
    }

    #[test]
    fn test_count_accumulator_guards_null_missing_and_empty() {
        let all = metric(Aggregation::count("n", ""))
            .to_pipeline_accumulator()
            .unwrap();
        assert_eq!(all, json!({"$sum": 1}));

        let field = metric(Aggregation::count("n", "status"))
            .to_pipeline_accumulator()
            .unwrap();
        let checks = &field["$sum"]["$cond"][0]["$and"];
        assert_eq!(checks[0], field_present_expr("status"));
        assert_eq!(checks[1], json!({"$ne": ["$status", ""]}));
    }

    #[test]
    fn test_duplicate_sibling_names_rejected() {
        let aggs = vec![
            Aggregation::sum("x", "amount"),
            Aggregation::max("x", "amount"),
        ];
        assert_eq!(
            Aggregation::validate_all(&aggs),
            Err(CompileError::DuplicateAggregationName {
                name: "x".to_string()
            })
        );
    }

    #[test]
    fn test_same_name_at_different_levels_allowed() {
        let aggs = vec![TermsAggregation::new("x", "status")
            .sub_aggregation(Aggregation::sum("x", "amount"))
            .into()];
        assert!(Aggregation::validate_all(&aggs).is_ok());
    }

    #[test]
    fn test_order_key_must_exist() {
        let bad: Aggregation = TermsAggregation::new("by_status", "status")
            .order(BucketOrder::desc("missing"))
            .into();
        assert!(bad.validate().is_err());

        let good: Aggregation = TermsAggregation::new("by_status", "status")
            .order(BucketOrder::asc(BucketOrder::KEY))
            .into();
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_interval_fallback() {
        let unit = |interval: &str| DateHistogramAggregation::new("h", "at", interval).unit();
        assert_eq!(unit("1M"), DateUnit::Month);
        assert_eq!(unit("month"), DateUnit::Month);
        assert_eq!(unit("1y"), DateUnit::Year);
        assert_eq!(unit("hour"), DateUnit::Hour);
        assert_eq!(unit("1d"), DateUnit::Day);
        assert_eq!(unit("fortnight"), DateUnit::Day);
    }

    #[test]
    fn test_composite_requires_sources() {
        let empty: Aggregation = CompositeAggregation::new("combo").into();
        assert!(empty.validate().is_err());

        let dup: Aggregation = CompositeAggregation::new("combo")
            .source("a", "status", SortDirection::Asc)
            .source("a", "region", SortDirection::Asc)
            .into();
        assert!(dup.validate().is_err());
    }
}
