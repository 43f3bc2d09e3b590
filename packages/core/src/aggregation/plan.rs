//! Level planning shared by the SQL and pipeline aggregation compilers
//!
//! A tree of bucket nodes flattens into one [`BucketLevel`] per node. Each level
//! groups by its ancestors' key columns followed by its own, so a single grouped
//! query yields every bucket of that node under every parent bucket.

use super::{
    Aggregation, BucketOrder, CompositeAggregation, DateHistogramAggregation, MetricAggregation,
    SortDirection, TermsAggregation,
};
use crate::dialect::DateUnit;
use crate::query::CompileError;

/// Column alias holding the per-bucket document count
pub(crate) const DOC_COUNT: &str = "__doc_count";

/// Facet name holding the top-level metrics on the document store
pub(crate) const METRICS_FACET: &str = "__metrics";

/// Column alias of key `index` contributed by the bucket node at `depth`
pub(crate) fn key_alias(depth: usize, index: usize) -> String {
    format!("__k{depth}_{index}")
}

/// Where a key column's value comes from
#[derive(Debug, Clone, Copy)]
pub(crate) enum KeySource<'a> {
    Field(&'a str),
    Date {
        field: &'a str,
        unit: DateUnit,
        format: Option<&'a str>,
        time_zone: Option<&'a str>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct KeyColumn<'a> {
    pub alias: String,
    pub source: KeySource<'a>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum SortTarget<'a> {
    Count,
    /// Index into the node's own key columns
    Key(usize),
    Metric(&'a str),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SortKey<'a> {
    pub target: SortTarget<'a>,
    pub direction: SortDirection,
}

/// Borrowed view over the three bucket node kinds
#[derive(Debug, Clone, Copy)]
pub(crate) enum BucketNode<'a> {
    Terms(&'a TermsAggregation),
    DateHistogram(&'a DateHistogramAggregation),
    Composite(&'a CompositeAggregation),
}

impl<'a> BucketNode<'a> {
    pub fn from_aggregation(aggregation: &'a Aggregation) -> Option<Self> {
        match aggregation {
            Aggregation::Metric(_) => None,
            Aggregation::Terms(t) => Some(BucketNode::Terms(t)),
            Aggregation::DateHistogram(h) => Some(BucketNode::DateHistogram(h)),
            Aggregation::Composite(c) => Some(BucketNode::Composite(c)),
        }
    }

    pub fn name(&self) -> &'a str {
        match *self {
            BucketNode::Terms(t) => &t.name,
            BucketNode::DateHistogram(h) => &h.name,
            BucketNode::Composite(c) => &c.name,
        }
    }

    pub fn sub_aggregations(&self) -> &'a [Aggregation] {
        match *self {
            BucketNode::Terms(t) => &t.sub_aggregations,
            BucketNode::DateHistogram(h) => &h.sub_aggregations,
            BucketNode::Composite(c) => &c.sub_aggregations,
        }
    }

    pub fn size(&self) -> Option<usize> {
        match *self {
            BucketNode::Terms(t) => t.size,
            BucketNode::DateHistogram(_) => None,
            BucketNode::Composite(c) => c.size,
        }
    }

    /// Metric sub-aggregations computed alongside this node's doc count
    pub fn metrics(&self) -> Vec<&'a MetricAggregation> {
        direct_metrics(self.sub_aggregations())
    }

    pub fn own_sources(&self) -> Vec<KeySource<'a>> {
        match *self {
            BucketNode::Terms(t) => vec![KeySource::Field(&t.field)],
            BucketNode::DateHistogram(h) => vec![KeySource::Date {
                field: &h.field,
                unit: h.unit(),
                format: h.format.as_deref(),
                time_zone: h.time_zone.as_deref(),
            }],
            BucketNode::Composite(c) => c
                .sources
                .iter()
                .map(|source| KeySource::Field(&source.field))
                .collect(),
        }
    }

    pub fn key_width(&self) -> usize {
        match *self {
            BucketNode::Composite(c) => c.sources.len(),
            _ => 1,
        }
    }

    /// Sort keys for this node's buckets, ending with every own key ascending
    /// unless the order already covers it
    pub fn sort_keys(&self) -> Vec<SortKey<'a>> {
        let mut keys = match *self {
            BucketNode::Terms(t) => {
                let (key, direction) = match &t.order {
                    Some(order) => (order.key.as_str(), order.direction),
                    None => (BucketOrder::COUNT, SortDirection::Desc),
                };
                let target = match key {
                    BucketOrder::COUNT => SortTarget::Count,
                    BucketOrder::KEY => SortTarget::Key(0),
                    metric => SortTarget::Metric(metric),
                };
                vec![SortKey { target, direction }]
            }
            BucketNode::DateHistogram(_) => vec![SortKey {
                target: SortTarget::Key(0),
                direction: SortDirection::Asc,
            }],
            BucketNode::Composite(c) => c
                .sources
                .iter()
                .enumerate()
                .map(|(i, source)| SortKey {
                    target: SortTarget::Key(i),
                    direction: source.direction,
                })
                .collect(),
        };

        for index in 0..self.key_width() {
            let covered = keys
                .iter()
                .any(|k| matches!(k.target, SortTarget::Key(i) if i == index));
            if !covered {
                keys.push(SortKey {
                    target: SortTarget::Key(index),
                    direction: SortDirection::Asc,
                });
            }
        }
        keys
    }
}

pub(crate) fn direct_metrics(aggregations: &[Aggregation]) -> Vec<&MetricAggregation> {
    aggregations
        .iter()
        .filter_map(|aggregation| match aggregation {
            Aggregation::Metric(m) => Some(m),
            _ => None,
        })
        .collect()
}

/// One grouped query: a bucket node under all of its ancestors
#[derive(Debug, Clone)]
pub(crate) struct BucketLevel<'a> {
    pub node: BucketNode<'a>,
    pub path: Vec<&'a str>,
    /// Ancestor key columns followed by this node's own
    pub keys: Vec<KeyColumn<'a>>,
    pub own_start: usize,
}

impl<'a> BucketLevel<'a> {
    /// Unique name of this level: bucket names from the root joined by `/`
    pub fn path_name(&self) -> String {
        self.path.join("/")
    }

    pub fn is_root(&self) -> bool {
        self.path.len() == 1
    }

    pub fn own_keys(&self) -> &[KeyColumn<'a>] {
        &self.keys[self.own_start..]
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AggregationPlan<'a> {
    pub metrics: Vec<&'a MetricAggregation>,
    pub levels: Vec<BucketLevel<'a>>,
}

/// Validate `aggregations` and flatten them into levels
pub(crate) fn plan(aggregations: &[Aggregation]) -> Result<AggregationPlan<'_>, CompileError> {
    Aggregation::validate_all(aggregations)?;
    let mut levels = Vec::new();
    collect_levels(aggregations, &[], &[], &mut levels);
    Ok(AggregationPlan {
        metrics: direct_metrics(aggregations),
        levels,
    })
}

fn collect_levels<'a>(
    aggregations: &'a [Aggregation],
    parent_path: &[&'a str],
    parent_keys: &[KeyColumn<'a>],
    out: &mut Vec<BucketLevel<'a>>,
) {
    for aggregation in aggregations {
        let Some(node) = BucketNode::from_aggregation(aggregation) else {
            continue;
        };

        let mut path = parent_path.to_vec();
        path.push(node.name());
        let depth = path.len() - 1;

        let mut keys = parent_keys.to_vec();
        let own_start = keys.len();
        keys.extend(
            node.own_sources()
                .into_iter()
                .enumerate()
                .map(|(i, source)| KeyColumn {
                    alias: key_alias(depth, i),
                    source,
                }),
        );

        out.push(BucketLevel {
            node,
            path: path.clone(),
            keys: keys.clone(),
            own_start,
        });
        collect_levels(node.sub_aggregations(), &path, &keys, out);
    }
}
