//! Elasticsearch Query DSL types
//!
//! The subset of the search request body the compiler emits. All keyed maps
//! are `BTreeMap` so that serialisation is deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::query::ast::SortDirection;

/// Root search request body
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SearchBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<EsQuery>,

    /// Number of hits to return; 0 for aggregation-only requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,

    /// Fields to return in `_source`, all when absent
    #[serde(default, rename = "_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortClause>>,

    #[serde(
        default,
        alias = "aggregations",
        skip_serializing_if = "Option::is_none"
    )]
    pub aggs: Option<BTreeMap<String, EsAggregation>>,
}

/// `{"field": {"order": "asc"}}`
pub type SortClause = BTreeMap<String, SortSpec>;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SortSpec {
    pub order: SortDirection,
}

pub fn sort_clause(field: impl Into<String>, order: SortDirection) -> SortClause {
    let mut clause = BTreeMap::new();
    clause.insert(field.into(), SortSpec { order });
    clause
}

/// Query types
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EsQuery {
    /// Match all documents
    MatchAll(MatchAllQuery),

    /// Exact match, not analyzed
    Term(BTreeMap<String, Value>),

    /// Exact match against any of several values
    Terms(BTreeMap<String, Vec<Value>>),

    Range(BTreeMap<String, RangeParams>),

    /// `*` and `?` wildcards
    Wildcard(BTreeMap<String, String>),

    Exists(ExistsQuery),

    Bool(BoolQuery),
}

impl EsQuery {
    pub fn match_all() -> Self {
        EsQuery::MatchAll(MatchAllQuery::default())
    }

    pub fn term(field: impl Into<String>, value: Value) -> Self {
        let mut map = BTreeMap::new();
        map.insert(field.into(), value);
        EsQuery::Term(map)
    }

    pub fn terms(field: impl Into<String>, values: Vec<Value>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(field.into(), values);
        EsQuery::Terms(map)
    }

    pub fn range(field: impl Into<String>, params: RangeParams) -> Self {
        let mut map = BTreeMap::new();
        map.insert(field.into(), params);
        EsQuery::Range(map)
    }

    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(field.into(), pattern.into());
        EsQuery::Wildcard(map)
    }

    pub fn exists(field: impl Into<String>) -> Self {
        EsQuery::Exists(ExistsQuery {
            field: field.into(),
        })
    }

    /// `bool.must_not` around a single clause
    pub fn not(inner: EsQuery) -> Self {
        EsQuery::Bool(BoolQuery {
            must_not: vec![inner],
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MatchAllQuery {}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RangeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BoolQuery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<EsQuery>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<EsQuery>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<EsQuery>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<EsQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_should_match: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExistsQuery {
    pub field: String,
}

/// One aggregation node; exactly one kind field is set
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EsAggregation {
    // Metric aggregations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_count: Option<FieldAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<FieldAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<FieldAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<FieldAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<FieldAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg: Option<FieldAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FieldAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<PercentilesAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_hits: Option<TopHitsAgg>,

    // Bucket aggregations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<TermsAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRangeAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_histogram: Option<DateHistogramAgg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub histogram: Option<HistogramAgg>,

    // Pipeline aggregations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_selector: Option<BucketSelectorAgg>,

    // Nested aggregations
    #[serde(
        default,
        alias = "aggregations",
        skip_serializing_if = "Option::is_none"
    )]
    pub aggs: Option<BTreeMap<String, EsAggregation>>,
}

impl EsAggregation {
    /// True for aggregations whose result is a `buckets` list
    pub fn is_bucket(&self) -> bool {
        self.terms.is_some()
            || self.range.is_some()
            || self.date_range.is_some()
            || self.date_histogram.is_some()
            || self.histogram.is_some()
    }

    pub fn sub_aggregations(&self) -> impl Iterator<Item = (&String, &EsAggregation)> {
        self.aggs.iter().flat_map(|m| m.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldAgg {
    pub field: String,
}

impl FieldAgg {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PercentilesAgg {
    pub field: String,
    pub percents: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TopHitsAgg {
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<SortClause>>,
    #[serde(default, rename = "_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SourceFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
}

/// Bucket order entry, e.g. `{"_count": "desc"}` or `{"SUM(age)": "asc"}`
pub type BucketOrder = BTreeMap<String, SortDirection>;

pub fn bucket_order(key: impl Into<String>, direction: SortDirection) -> BucketOrder {
    let mut order = BTreeMap::new();
    order.insert(key.into(), direction);
    order
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TermsAgg {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<BucketOrder>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RangeAgg {
    pub field: String,
    pub ranges: Vec<RangeBucket>,
}

/// Half-open `[from, to)` numeric range
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RangeBucket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DateRangeAgg {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub ranges: Vec<DateRangeBucket>,
}

/// Range bounds are date-math expressions resolved by the engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DateRangeBucket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DateHistogramAgg {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_doc_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<BucketOrder>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HistogramAgg {
    pub field: String,
    pub interval: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_doc_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<BucketOrder>>,
}

/// Pipeline filter over the parent's buckets
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BucketSelectorAgg {
    pub buckets_path: BTreeMap<String, String>,
    pub script: String,
}
