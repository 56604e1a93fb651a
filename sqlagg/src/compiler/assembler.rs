//! Assemble compiled pieces into a [`SearchRequest`]

use std::collections::BTreeMap;

use super::grouping::DateInterval;
use super::tree::{AggNode, AggregationTree, BucketKind, BucketNode, MetricKind, MetricNode};
use crate::error::{Error, Result};
use crate::query::ast::Source;
use crate::request::*;

/// Request for an aggregating query; hits are suppressed with `size = 0`
pub fn assemble(
    source: &Source,
    query: Option<EsQuery>,
    tree: &AggregationTree,
) -> Result<SearchRequest> {
    if tree.is_empty() {
        return Err(Error::syntax("aggregation query produced no aggregations", 0));
    }

    Ok(SearchRequest {
        index: source.index.clone(),
        doc_type: source.doc_type.clone(),
        body: SearchBody {
            query,
            size: Some(0),
            aggs: Some(to_aggs(&tree.roots)),
            ..Default::default()
        },
    })
}

/// Request for a plain hit listing
pub fn assemble_search(
    source: &Source,
    query: Option<EsQuery>,
    includes: Option<Vec<String>>,
    sort: Vec<SortClause>,
    size: usize,
) -> SearchRequest {
    SearchRequest {
        index: source.index.clone(),
        doc_type: source.doc_type.clone(),
        body: SearchBody {
            query,
            size: Some(size),
            source: includes,
            sort: (!sort.is_empty()).then_some(sort),
            aggs: None,
        },
    }
}

fn to_aggs(nodes: &[AggNode]) -> BTreeMap<String, EsAggregation> {
    nodes
        .iter()
        .map(|node| (node.name().to_string(), node_to_es(node)))
        .collect()
}

fn node_to_es(node: &AggNode) -> EsAggregation {
    match node {
        AggNode::Bucket(bucket) => bucket_to_es(bucket),
        AggNode::Metric(metric) => metric_to_es(metric),
        AggNode::Selector(selector) => EsAggregation {
            bucket_selector: Some(BucketSelectorAgg {
                buckets_path: selector.buckets_path.clone(),
                script: selector.script.clone(),
            }),
            ..Default::default()
        },
    }
}

fn bucket_to_es(bucket: &BucketNode) -> EsAggregation {
    let order = (!bucket.order.is_empty()).then(|| {
        bucket
            .order
            .iter()
            .map(|(key, dir)| bucket_order(key.clone(), *dir))
            .collect::<Vec<_>>()
    });

    let mut agg = EsAggregation::default();
    match &bucket.kind {
        BucketKind::Terms { field } => {
            agg.terms = Some(TermsAgg {
                field: field.clone(),
                size: bucket.size,
                order,
            })
        }
        BucketKind::Range(config) => {
            agg.range = Some(RangeAgg {
                field: config.field.clone(),
                ranges: config
                    .ranges()
                    .into_iter()
                    .map(|(from, to)| RangeBucket {
                        from: Some(from),
                        to: Some(to),
                    })
                    .collect(),
            })
        }
        BucketKind::DateRange(config) => {
            agg.date_range = Some(DateRangeAgg {
                field: config.field.clone(),
                format: config.format.clone(),
                ranges: config
                    .ranges
                    .iter()
                    .map(|(from, to)| DateRangeBucket {
                        from: Some(from.clone()),
                        to: Some(to.clone()),
                    })
                    .collect(),
            })
        }
        BucketKind::DateHistogram(config) => {
            let (calendar_interval, fixed_interval) = match &config.interval {
                DateInterval::Calendar(unit) => (Some(unit.as_str().to_string()), None),
                DateInterval::Fixed { text, .. } => (None, Some(text.clone())),
            };
            agg.date_histogram = Some(DateHistogramAgg {
                field: config.field.clone(),
                calendar_interval,
                fixed_interval,
                format: config.format.clone(),
                time_zone: config.time_zone.clone(),
                min_doc_count: config.min_doc_count,
                order,
            })
        }
        BucketKind::Histogram(config) => {
            agg.histogram = Some(HistogramAgg {
                field: config.field.clone(),
                interval: config.interval,
                min_doc_count: config.min_doc_count,
                order,
            })
        }
    }

    if !bucket.children.is_empty() {
        agg.aggs = Some(to_aggs(&bucket.children));
    }
    agg
}

fn metric_to_es(metric: &MetricNode) -> EsAggregation {
    let mut agg = EsAggregation::default();
    match &metric.kind {
        // _index is present on every document
        MetricKind::DocCount => agg.value_count = Some(FieldAgg::new("_index")),
        MetricKind::ValueCount { field } => agg.value_count = Some(FieldAgg::new(field)),
        MetricKind::Cardinality { field } => agg.cardinality = Some(FieldAgg::new(field)),
        MetricKind::Sum { field } => agg.sum = Some(FieldAgg::new(field)),
        MetricKind::Min { field } => agg.min = Some(FieldAgg::new(field)),
        MetricKind::Max { field } => agg.max = Some(FieldAgg::new(field)),
        MetricKind::Avg { field } => agg.avg = Some(FieldAgg::new(field)),
        MetricKind::Stats { field } => agg.stats = Some(FieldAgg::new(field)),
        MetricKind::Percentiles(config) => {
            agg.percentiles = Some(PercentilesAgg {
                field: config.field.clone(),
                percents: config.percents.clone(),
            })
        }
        MetricKind::TopHits(config) => {
            let sort = (!config.sort.is_empty()).then(|| {
                config
                    .sort
                    .iter()
                    .map(|(field, dir)| sort_clause(field.clone(), *dir))
                    .collect()
            });
            let source = (!config.includes.is_empty() || !config.excludes.is_empty()).then(|| {
                SourceFilter {
                    includes: config.includes.clone(),
                    excludes: config.excludes.clone(),
                }
            });
            agg.top_hits = Some(TopHitsAgg {
                size: config.size,
                from: config.from,
                sort,
                source,
            })
        }
    }
    agg
}
