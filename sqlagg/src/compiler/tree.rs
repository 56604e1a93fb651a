//! Aggregation tree built during compilation
//!
//! Buckets nest outer to inner; metrics and the HAVING selector hang off the
//! innermost bucket, or sit at the root when there is no GROUP BY.

use std::collections::BTreeMap;

use super::grouping::{DateHistogramConfig, DateRangeConfig, HistogramConfig, RangeConfig};
use super::metrics::{PercentilesConfig, TopHitsConfig};
use crate::query::ast::SortDirection;

/// Bucketing construct of one GROUP BY term
#[derive(Debug, Clone, PartialEq)]
pub enum BucketKind {
    Terms { field: String },
    Range(RangeConfig),
    DateRange(DateRangeConfig),
    DateHistogram(DateHistogramConfig),
    Histogram(HistogramConfig),
}

impl BucketKind {
    /// Range buckets come back in declaration order and cannot be sorted
    pub fn supports_order(&self) -> bool {
        !matches!(self, BucketKind::Range(_) | BucketKind::DateRange(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketNode {
    pub name: String,
    pub kind: BucketKind,
    /// Sort directives in ORDER BY order: `(metric name | "_key", direction)`
    pub order: Vec<(String, SortDirection)>,
    pub size: Option<usize>,
    pub children: Vec<AggNode>,
}

impl BucketNode {
    pub fn new(name: impl Into<String>, kind: BucketKind) -> Self {
        Self {
            name: name.into(),
            kind,
            order: Vec::new(),
            size: None,
            children: Vec::new(),
        }
    }

    pub fn terms(field: impl Into<String>, size: usize) -> Self {
        let field = field.into();
        let mut node = Self::new(field.clone(), BucketKind::Terms { field });
        node.size = Some(size);
        node
    }

    pub fn is_terms(&self) -> bool {
        matches!(self.kind, BucketKind::Terms { .. })
    }
}

/// Resolved metric
#[derive(Debug, Clone, PartialEq)]
pub enum MetricKind {
    /// `COUNT(*)`
    DocCount,
    ValueCount { field: String },
    Cardinality { field: String },
    Sum { field: String },
    Min { field: String },
    Max { field: String },
    Avg { field: String },
    Stats { field: String },
    Percentiles(PercentilesConfig),
    TopHits(TopHitsConfig),
}

impl MetricKind {
    /// Metrics that expose a single `value` usable in sort and selector paths
    pub fn is_single_value(&self) -> bool {
        !matches!(
            self,
            MetricKind::Stats { .. } | MetricKind::Percentiles(_) | MetricKind::TopHits(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricNode {
    /// Display name of the select item
    pub name: String,
    pub kind: MetricKind,
}

/// `bucket_selector` compiled from HAVING
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorNode {
    pub name: String,
    pub buckets_path: BTreeMap<String, String>,
    pub script: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggNode {
    Bucket(BucketNode),
    Metric(MetricNode),
    Selector(SelectorNode),
}

impl AggNode {
    pub fn name(&self) -> &str {
        match self {
            AggNode::Bucket(b) => &b.name,
            AggNode::Metric(m) => &m.name,
            AggNode::Selector(s) => &s.name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationTree {
    pub roots: Vec<AggNode>,
}

impl AggregationTree {
    /// Chain `buckets` outer to inner and attach `leaves` to the innermost one
    pub fn nest(buckets: Vec<BucketNode>, leaves: Vec<AggNode>) -> Self {
        let mut current = leaves;
        for mut bucket in buckets.into_iter().rev() {
            bucket.children = current;
            current = vec![AggNode::Bucket(bucket)];
        }
        Self { roots: current }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Bucket chain from the outermost bucket inwards
    pub fn bucket_chain(&self) -> Vec<&BucketNode> {
        let mut chain = Vec::new();
        let mut level = &self.roots;
        while let Some(bucket) = level.iter().find_map(|n| match n {
            AggNode::Bucket(b) => Some(b),
            _ => None,
        }) {
            chain.push(bucket);
            level = &bucket.children;
        }
        chain
    }

    /// Metrics in placement order
    pub fn metrics(&self) -> Vec<&MetricNode> {
        let level = match self.bucket_chain().last() {
            Some(bucket) => &bucket.children,
            None => &self.roots,
        };
        level
            .iter()
            .filter_map(|n| match n {
                AggNode::Metric(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}
