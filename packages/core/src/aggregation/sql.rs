//! Aggregations -> grouped SQL statements

use super::plan::{plan, BucketLevel, KeySource, SortKey, SortTarget, DOC_COUNT};
use super::{
    Aggregation, CompositeAggregation, DateHistogramAggregation, MetricAggregation, MetricKind,
    TermsAggregation,
};
use crate::dialect::Dialect;
use crate::query::{validate_field, CompileError, SqlFragment};

/// Statements answering one aggregation request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlAggregation {
    /// Ungrouped query over the top-level metrics, if there are any
    pub metrics: Option<SqlFragment>,
    /// One grouped query per bucket node, keyed by its `/`-joined path
    pub levels: Vec<(String, SqlFragment)>,
}

/// Compile `aggregations` against `table`, filtered by `filter`
pub fn compile_sql(
    aggregations: &[Aggregation],
    table: &str,
    filter: &SqlFragment,
    dialect: Dialect,
) -> Result<SqlAggregation, CompileError> {
    validate_field(table)?;
    let plan = plan(aggregations)?;

    let metrics = if plan.metrics.is_empty() {
        None
    } else {
        let columns = select_metrics(&plan.metrics)?;
        Some(SqlFragment::new(
            format!(
                "SELECT {} FROM {table}{}",
                columns.join(", "),
                where_clause(filter)
            ),
            filter.params.clone(),
        ))
    };

    let levels = plan
        .levels
        .iter()
        .map(|level| Ok((level.path_name(), level_sql(level, table, filter, dialect)?)))
        .collect::<Result<Vec<_>, CompileError>>()?;

    Ok(SqlAggregation { metrics, levels })
}

fn select_metrics(metrics: &[&MetricAggregation]) -> Result<Vec<String>, CompileError> {
    metrics.iter().map(|m| m.to_sql()).collect()
}

fn where_clause(filter: &SqlFragment) -> String {
    if filter.is_always_true() {
        String::new()
    } else {
        format!(" WHERE {}", filter.sql)
    }
}

fn key_expr(source: &KeySource<'_>, dialect: Dialect) -> String {
    match *source {
        KeySource::Field(field) => field.to_string(),
        KeySource::Date {
            field,
            unit,
            format,
            time_zone,
        } => dialect.date_bucket(field, unit, format, time_zone),
    }
}

fn level_sql(
    level: &BucketLevel<'_>,
    table: &str,
    filter: &SqlFragment,
    dialect: Dialect,
) -> Result<SqlFragment, CompileError> {
    let group_by: Vec<String> = level
        .keys
        .iter()
        .map(|key| key_expr(&key.source, dialect))
        .collect();

    let mut columns: Vec<String> = level
        .keys
        .iter()
        .zip(&group_by)
        .map(|(key, expr)| format!("{expr} AS {}", key.alias))
        .collect();
    columns.push(format!("COUNT(*) AS {DOC_COUNT}"));
    columns.extend(select_metrics(&level.node.metrics())?);

    let mut sql = format!(
        "SELECT {} FROM {table}{} GROUP BY {}",
        columns.join(", "),
        where_clause(filter),
        group_by.join(", ")
    );

    // Deeper levels are ordered and cut per parent bucket during assembly
    if level.is_root() {
        let order: Vec<String> = level
            .node
            .sort_keys()
            .iter()
            .map(|key| order_term(level, key))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        sql.push_str(&dialect.limit_offset(level.node.size(), None));
    }

    Ok(SqlFragment::new(sql, filter.params.clone()))
}

fn order_term(level: &BucketLevel<'_>, key: &SortKey<'_>) -> String {
    let column = match key.target {
        SortTarget::Count => DOC_COUNT.to_string(),
        SortTarget::Key(index) => level.own_keys()[index].alias.clone(),
        SortTarget::Metric(name) => metric_order_expr(level, name),
    };
    let direction = if key.direction.is_desc() { "DESC" } else { "ASC" };
    format!("{column} {direction}")
}

/// A bucket whose summed values are all NULL reports a sum of 0, so it must
/// also sort as 0
fn metric_order_expr(level: &BucketLevel<'_>, name: &str) -> String {
    match level.node.metrics().into_iter().find(|m| m.name == name) {
        Some(metric) if metric.kind == MetricKind::Sum => {
            format!("COALESCE({}, 0)", metric.aggregate_expr())
        }
        _ => name.to_string(),
    }
}

/// Grouped query for a single bucket node and its direct metrics
fn single_level_sql(
    aggregation: Aggregation,
    table: &str,
    filter: &SqlFragment,
    dialect: Dialect,
) -> Result<SqlFragment, CompileError> {
    let name = aggregation.name().to_string();
    let compiled = compile_sql(std::slice::from_ref(&aggregation), table, filter, dialect)?;
    compiled
        .levels
        .into_iter()
        .find(|(path, _)| *path == name)
        .map(|(_, sql)| sql)
        .ok_or_else(|| CompileError::invalid_aggregation(name, "not a bucket aggregation"))
}

impl TermsAggregation {
    /// Grouped query selecting each term's count and metric sub-aggregations
    pub fn to_sql(
        &self,
        table: &str,
        filter: &SqlFragment,
        dialect: Dialect,
    ) -> Result<SqlFragment, CompileError> {
        single_level_sql(self.clone().into(), table, filter, dialect)
    }
}

impl DateHistogramAggregation {
    pub fn to_sql(
        &self,
        table: &str,
        filter: &SqlFragment,
        dialect: Dialect,
    ) -> Result<SqlFragment, CompileError> {
        single_level_sql(self.clone().into(), table, filter, dialect)
    }
}

impl CompositeAggregation {
    pub fn to_sql(
        &self,
        table: &str,
        filter: &SqlFragment,
        dialect: Dialect,
    ) -> Result<SqlFragment, CompileError> {
        single_level_sql(self.clone().into(), table, filter, dialect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{BucketOrder, SortDirection};
    use crate::query::QueryNode;
    use serde_json::json;

    #[test]
    fn test_terms_with_sum_ordered_by_metric() {
        let terms = TermsAggregation::new("by_status", "status")
            .size(10)
            .order(BucketOrder::desc("total_amount"))
            .sub_aggregation(Aggregation::sum("total_amount", "amount"));

        let sql = terms
            .to_sql("orders", &SqlFragment::always_true(), Dialect::Sqlite)
            .unwrap();

        assert_eq!(
            sql.sql,
            "SELECT status AS __k0_0, COUNT(*) AS __doc_count, SUM(amount) AS total_amount \
             FROM orders GROUP BY status ORDER BY COALESCE(SUM(amount), 0) DESC, __k0_0 ASC LIMIT 10"
        );
        assert!(sql.params.is_empty());
    }

    #[test]
    fn test_only_sum_order_is_coalesced() {
        let by_avg = TermsAggregation::new("by_status", "status")
            .order(BucketOrder::asc("avg_amount"))
            .sub_aggregation(Aggregation::avg("avg_amount", "amount"))
            .sub_aggregation(Aggregation::sum("total_amount", "amount"));
        let sql = by_avg
            .to_sql("orders", &SqlFragment::always_true(), Dialect::Postgres)
            .unwrap();
        assert!(sql.sql.contains("ORDER BY avg_amount ASC, __k0_0 ASC"), "{}", sql.sql);
        assert!(sql.sql.contains("SUM(amount) AS total_amount"));
    }

    #[test]
    fn test_filter_params_are_carried() {
        let filter = QueryNode::term("region", "eu").to_sql(Dialect::Sqlite).unwrap();
        let compiled = compile_sql(
            &[
                Aggregation::count("n", ""),
                TermsAggregation::new("by_status", "status").into(),
            ],
            "orders",
            &filter,
            Dialect::Sqlite,
        )
        .unwrap();

        let metrics = compiled.metrics.unwrap();
        assert_eq!(metrics.sql, "SELECT COUNT(*) AS n FROM orders WHERE region = ?");
        assert_eq!(metrics.params, vec![json!("eu")]);

        let (path, level) = &compiled.levels[0];
        assert_eq!(path, "by_status");
        assert!(level.sql.contains("WHERE region = ? GROUP BY status"));
        assert!(level.sql.contains("ORDER BY __doc_count DESC, __k0_0 ASC"));
        assert_eq!(level.params, vec![json!("eu")]);
    }

    #[test]
    fn test_nested_level_groups_by_ancestors_without_limit() {
        let aggs: Vec<Aggregation> = vec![TermsAggregation::new("by_status", "status")
            .size(3)
            .sub_aggregation(
                DateHistogramAggregation::new("monthly", "created_at", "1M")
                    .sub_aggregation(Aggregation::max("largest", "amount"))
                    .into(),
            )
            .into()];

        let compiled =
            compile_sql(&aggs, "orders", &SqlFragment::always_true(), Dialect::Sqlite).unwrap();
        assert!(compiled.metrics.is_none());
        assert_eq!(compiled.levels.len(), 2);

        let (path, nested) = &compiled.levels[1];
        assert_eq!(path, "by_status/monthly");
        assert_eq!(
            nested.sql,
            "SELECT status AS __k0_0, strftime('%Y-%m', created_at) AS __k1_0, \
             COUNT(*) AS __doc_count, MAX(amount) AS largest FROM orders \
             GROUP BY status, strftime('%Y-%m', created_at)"
        );
    }

    #[test]
    fn test_composite_orders_by_sources() {
        let composite = CompositeAggregation::new("combo")
            .source("status", "status", SortDirection::Asc)
            .source("region", "region", SortDirection::Desc)
            .size(5);
        let sql = composite
            .to_sql("orders", &SqlFragment::always_true(), Dialect::Postgres)
            .unwrap();
        assert!(sql.sql.contains("GROUP BY status, region"));
        assert!(sql.sql.ends_with("ORDER BY __k0_0 ASC, __k0_1 DESC LIMIT 5"));
    }

    #[test]
    fn test_histogram_uses_dialect_truncation() {
        let histogram = DateHistogramAggregation::new("daily", "created_at", "1d");
        let sql = histogram
            .to_sql("orders", &SqlFragment::always_true(), Dialect::Postgres)
            .unwrap();
        assert!(sql.sql.contains("to_char(created_at, 'YYYY-MM-DD') AS __k0_0"));
        assert!(sql.sql.contains("ORDER BY __k0_0 ASC"));
    }

    #[test]
    fn test_invalid_table_rejected() {
        assert!(compile_sql(
            &[Aggregation::count("n", "")],
            "orders; DROP TABLE x",
            &SqlFragment::always_true(),
            Dialect::Sqlite
        )
        .is_err());
    }
}
