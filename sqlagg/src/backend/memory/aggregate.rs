//! Aggregation evaluation over stored documents
//!
//! Produces the same response shapes as the search engine: metrics as
//! `{"value": ..}` objects, bucket aggregations as `{"buckets": [..]}` with
//! each bucket carrying `key`, `doc_count` and its sub-aggregation results.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::dates::{
    advance, date_value, floor, format_date, from_millis, parse_offset, resolve_date_math,
};
use super::document::{as_number, compare_values, key_string, StoredDoc};
use super::script;
use crate::backend::BackendError;
use crate::compiler::grouping::DateInterval;
use crate::query::ast::SortDirection;
use crate::request::*;

/// Upper bound on buckets a single aggregation may produce
pub const MAX_BUCKETS: usize = 65_536;

const DEFAULT_TERMS_SIZE: usize = 10;

/// Evaluation context shared by all aggregations of a request
#[derive(Debug, Clone, Copy)]
pub struct AggContext {
    /// Anchor for `now` in date math
    pub now: DateTime<Utc>,
}

fn bad_request(message: impl Into<String>) -> BackendError {
    BackendError::Status {
        status: 400,
        body: message.into(),
    }
}

/// Evaluate a map of aggregations; pipeline selectors are applied by the parent bucket
pub fn aggregate(
    aggs: &BTreeMap<String, EsAggregation>,
    docs: &[&StoredDoc],
    ctx: &AggContext,
) -> Result<Map<String, Value>, BackendError> {
    let mut out = Map::new();
    for (name, agg) in aggs {
        if agg.bucket_selector.is_some() {
            continue;
        }
        let value = if agg.is_bucket() {
            bucket_agg(name, agg, docs, ctx)?
        } else {
            metric_agg(name, agg, docs)?
        };
        out.insert(name.clone(), value);
    }
    Ok(out)
}

// ============================================================================
// Metrics
// ============================================================================

fn numbers(docs: &[&StoredDoc], field: &str) -> Vec<f64> {
    docs.iter()
        .flat_map(|doc| doc.values(field))
        .filter_map(|v| as_number(&v))
        .collect()
}

fn metric_agg(name: &str, agg: &EsAggregation, docs: &[&StoredDoc]) -> Result<Value, BackendError> {
    if let Some(f) = &agg.value_count {
        let count: usize = docs.iter().map(|doc| doc.values(&f.field).len()).sum();
        return Ok(json!({ "value": count }));
    }
    if let Some(f) = &agg.cardinality {
        let distinct: HashSet<String> = docs
            .iter()
            .flat_map(|doc| doc.values(&f.field))
            .map(|v| key_string(&v))
            .collect();
        return Ok(json!({ "value": distinct.len() }));
    }
    if let Some(f) = &agg.sum {
        return Ok(json!({ "value": numbers(docs, &f.field).iter().sum::<f64>() }));
    }
    if let Some(f) = &agg.min {
        return Ok(json!({ "value": numbers(docs, &f.field).into_iter().reduce(f64::min) }));
    }
    if let Some(f) = &agg.max {
        return Ok(json!({ "value": numbers(docs, &f.field).into_iter().reduce(f64::max) }));
    }
    if let Some(f) = &agg.avg {
        let values = numbers(docs, &f.field);
        let avg = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
        return Ok(json!({ "value": avg }));
    }
    if let Some(f) = &agg.stats {
        let values = numbers(docs, &f.field);
        let sum: f64 = values.iter().sum();
        let avg = (!values.is_empty()).then(|| sum / values.len() as f64);
        return Ok(json!({
            "count": values.len(),
            "min": values.iter().copied().reduce(f64::min),
            "max": values.iter().copied().reduce(f64::max),
            "avg": avg,
            "sum": sum,
        }));
    }
    if let Some(p) = &agg.percentiles {
        return Ok(percentiles(docs, p));
    }
    if let Some(top) = &agg.top_hits {
        return Ok(top_hits(docs, top));
    }
    Err(bad_request(format!("aggregation '{}' has no type", name)))
}

/// Linear interpolation between closest ranks
fn percentiles(docs: &[&StoredDoc], agg: &PercentilesAgg) -> Value {
    let mut values = numbers(docs, &agg.field);
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mut out = Map::new();
    for p in &agg.percents {
        let value = if values.is_empty() {
            None
        } else {
            let rank = p / 100.0 * (values.len() - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            Some(values[lo] + (values[hi] - values[lo]) * (rank - lo as f64))
        };
        out.insert(format!("{:?}", p), json!(value));
    }
    json!({ "values": out })
}

fn top_hits(docs: &[&StoredDoc], agg: &TopHitsAgg) -> Value {
    let mut hits: Vec<&StoredDoc> = docs.to_vec();
    if let Some(sort) = &agg.sort {
        sort_docs(&mut hits, sort);
    }
    let (includes, excludes) = agg
        .source
        .as_ref()
        .map(|s| (s.includes.clone(), s.excludes.clone()))
        .unwrap_or_default();

    let list: Vec<Value> = hits
        .iter()
        .skip(agg.from.unwrap_or(0))
        .take(agg.size)
        .map(|doc| doc.to_hit(doc.filtered_source(&includes, &excludes)))
        .collect();

    json!({
        "hits": {
            "total": { "value": docs.len(), "relation": "eq" },
            "max_score": null,
            "hits": list,
        }
    })
}

/// Stable sort by sort clauses; ascending uses a field's smallest value,
/// descending its largest, and documents without the field sort last
pub fn sort_docs(docs: &mut [&StoredDoc], sort: &[SortClause]) {
    let keys: Vec<(&String, SortDirection)> = sort
        .iter()
        .flat_map(|clause| clause.iter().map(|(field, spec)| (field, spec.order)))
        .filter(|(field, _)| field.as_str() != "_doc" && field.as_str() != "_score")
        .collect();
    if keys.is_empty() {
        return;
    }

    docs.sort_by(|a, b| {
        for (field, dir) in &keys {
            let ord = match (sort_value(a, field, *dir), sort_value(b, field, *dir)) {
                (Some(x), Some(y)) => {
                    let ord = compare_values(&x, &y);
                    match dir {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

// ============================================================================
// Buckets
// ============================================================================

struct Bucket<'a> {
    key: Value,
    /// Kind-specific fields such as `key_as_string`, `from`, `to`
    extra: Map<String, Value>,
    docs: Vec<&'a StoredDoc>,
    subs: Map<String, Value>,
}

impl<'a> Bucket<'a> {
    fn new(key: Value, docs: Vec<&'a StoredDoc>) -> Self {
        Self {
            key,
            extra: Map::new(),
            docs,
            subs: Map::new(),
        }
    }

    fn metric(&self, name: &str) -> Option<f64> {
        self.subs.get(name).and_then(|v| v.get("value")).and_then(Value::as_f64)
    }

    fn into_json(self) -> Value {
        let mut out = Map::new();
        out.insert("key".to_string(), self.key);
        out.extend(self.extra);
        out.insert("doc_count".to_string(), json!(self.docs.len()));
        out.extend(self.subs);
        Value::Object(out)
    }
}

fn bucket_agg(
    name: &str,
    agg: &EsAggregation,
    docs: &[&StoredDoc],
    ctx: &AggContext,
) -> Result<Value, BackendError> {
    let (mut buckets, order) = if let Some(terms) = &agg.terms {
        (terms_buckets(terms, docs), terms.order.as_deref())
    } else if let Some(range) = &agg.range {
        (range_buckets(range, docs), None)
    } else if let Some(date_range) = &agg.date_range {
        (date_range_buckets(date_range, docs, ctx)?, None)
    } else if let Some(histogram) = &agg.date_histogram {
        (date_histogram_buckets(histogram, docs)?, histogram.order.as_deref())
    } else if let Some(histogram) = &agg.histogram {
        (histogram_buckets(histogram, docs)?, histogram.order.as_deref())
    } else {
        return Err(bad_request(format!("aggregation '{}' has no type", name)));
    };

    if let Some(subs) = &agg.aggs {
        for bucket in &mut buckets {
            bucket.subs = aggregate(subs, &bucket.docs, ctx)?;
        }
    }

    match order {
        Some(order) => sort_buckets(&mut buckets, order, agg.aggs.as_ref())?,
        None if agg.terms.is_some() => {
            let default = [bucket_order("_count", SortDirection::Desc)];
            sort_buckets(&mut buckets, &default, agg.aggs.as_ref())?;
        }
        None => {}
    }

    if let Some(terms) = &agg.terms {
        buckets.truncate(terms.size.unwrap_or(DEFAULT_TERMS_SIZE));
    }

    for (selector_name, sub) in agg.sub_aggregations() {
        if let Some(selector) = &sub.bucket_selector {
            buckets = apply_selector(selector_name, selector, buckets)?;
        }
    }

    let list: Vec<Value> = buckets.into_iter().map(Bucket::into_json).collect();
    Ok(json!({ "buckets": list }))
}

fn sort_buckets(
    buckets: &mut [Bucket<'_>],
    order: &[BucketOrder],
    subs: Option<&BTreeMap<String, EsAggregation>>,
) -> Result<(), BackendError> {
    let keys: Vec<(&String, SortDirection)> = order
        .iter()
        .flat_map(|entry| entry.iter().map(|(key, dir)| (key, *dir)))
        .collect();

    for (key, _) in &keys {
        let known = matches!(key.as_str(), "_count" | "_key" | "_term")
            || subs.is_some_and(|s| s.contains_key(key.as_str()));
        if !known {
            return Err(bad_request(format!("invalid aggregation order path [{}]", key)));
        }
    }

    buckets.sort_by(|a, b| {
        for (key, dir) in &keys {
            let ord = match key.as_str() {
                "_count" => a.docs.len().cmp(&b.docs.len()),
                "_key" | "_term" => compare_values(&a.key, &b.key),
                metric => compare_optional(a.metric(metric), b.metric(metric)),
            };
            let ord = match dir {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        compare_values(&a.key, &b.key)
    });
    Ok(())
}

fn sort_value(doc: &StoredDoc, field: &str, dir: SortDirection) -> Option<Value> {
    let values = doc.values(field);
    match dir {
        SortDirection::Asc => values.into_iter().min_by(compare_values),
        SortDirection::Desc => values.into_iter().max_by(compare_values),
    }
}

fn compare_optional(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Like [`compare_optional`] but an unbounded upper end sorts last
fn compare_upper(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        _ => compare_optional(a, b),
    }
}

fn apply_selector<'a>(
    name: &str,
    selector: &BucketSelectorAgg,
    buckets: Vec<Bucket<'a>>,
) -> Result<Vec<Bucket<'a>>, BackendError> {
    let mut kept = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let params: HashMap<String, Option<f64>> = selector
            .buckets_path
            .iter()
            .map(|(param, path)| {
                let value = match path.as_str() {
                    "_count" => Some(bucket.docs.len() as f64),
                    metric => bucket.metric(metric),
                };
                (param.clone(), value)
            })
            .collect();
        let keep = script::evaluate(&selector.script, &params).map_err(|e| {
            BackendError::Unsupported(format!("bucket_selector '{}': {}", name, e))
        })?;
        if keep {
            kept.push(bucket);
        }
    }
    Ok(kept)
}

fn terms_buckets<'a>(agg: &TermsAgg, docs: &[&'a StoredDoc]) -> Vec<Bucket<'a>> {
    let mut groups: HashMap<String, (Value, Vec<&'a StoredDoc>)> = HashMap::new();
    for doc in docs {
        let mut seen = HashSet::new();
        for value in doc.values(&agg.field) {
            let key = key_string(&value);
            if seen.insert(key.clone()) {
                groups.entry(key).or_insert_with(|| (value, Vec::new())).1.push(*doc);
            }
        }
    }

    groups
        .into_values()
        .map(|(value, docs)| match value {
            Value::Bool(b) => {
                let mut bucket = Bucket::new(json!(u8::from(b)), docs);
                bucket
                    .extra
                    .insert("key_as_string".to_string(), json!(b.to_string()));
                bucket
            }
            other => Bucket::new(other, docs),
        })
        .collect()
}

fn format_bound(value: Option<f64>) -> String {
    value.map_or_else(|| "*".to_string(), |v| format!("{:?}", v))
}

fn range_buckets<'a>(agg: &RangeAgg, docs: &[&'a StoredDoc]) -> Vec<Bucket<'a>> {
    let mut ranges = agg.ranges.clone();
    ranges.sort_by(|a, b| compare_optional(a.from, b.from).then(compare_upper(a.to, b.to)));

    ranges
        .iter()
        .map(|range| {
            let members: Vec<&StoredDoc> = docs
                .iter()
                .copied()
                .filter(|doc| {
                    doc.values(&agg.field).iter().filter_map(as_number).any(|v| {
                        range.from.map_or(true, |f| v >= f) && range.to.map_or(true, |t| v < t)
                    })
                })
                .collect();
            let key = format!("{}-{}", format_bound(range.from), format_bound(range.to));
            let mut bucket = Bucket::new(json!(key), members);
            if let Some(from) = range.from {
                bucket.extra.insert("from".to_string(), json!(from));
            }
            if let Some(to) = range.to {
                bucket.extra.insert("to".to_string(), json!(to));
            }
            bucket
        })
        .collect()
}

fn date_range_buckets<'a>(
    agg: &DateRangeAgg,
    docs: &[&'a StoredDoc],
    ctx: &AggContext,
) -> Result<Vec<Bucket<'a>>, BackendError> {
    let format = agg.format.as_deref();
    let resolve = |expr: &Option<String>| -> Result<Option<DateTime<Utc>>, BackendError> {
        expr.as_deref()
            .map(|e| resolve_date_math(e, ctx.now, format).map_err(bad_request))
            .transpose()
    };
    let render = |dt: Option<DateTime<Utc>>| -> Result<Option<String>, BackendError> {
        dt.map(|d| format_date(&d, format).map_err(bad_request))
            .transpose()
    };

    let mut resolved = Vec::with_capacity(agg.ranges.len());
    for range in &agg.ranges {
        resolved.push((resolve(&range.from)?, resolve(&range.to)?));
    }
    let millis = |d: Option<DateTime<Utc>>| d.map(|d| d.timestamp_millis() as f64);
    resolved.sort_by(|a, b| {
        compare_optional(millis(a.0), millis(b.0)).then(compare_upper(millis(a.1), millis(b.1)))
    });

    let mut buckets = Vec::with_capacity(resolved.len());
    for (from, to) in resolved {
        let members: Vec<&StoredDoc> = docs
            .iter()
            .copied()
            .filter(|doc| {
                doc.values(&agg.field)
                    .iter()
                    .filter_map(|v| date_value(v, format))
                    .any(|d| from.map_or(true, |f| d >= f) && to.map_or(true, |t| d < t))
            })
            .collect();

        let from_str = render(from)?;
        let to_str = render(to)?;
        let key = format!(
            "{}-{}",
            from_str.as_deref().unwrap_or("*"),
            to_str.as_deref().unwrap_or("*")
        );
        let mut bucket = Bucket::new(json!(key), members);
        if let (Some(f), Some(s)) = (from, &from_str) {
            bucket
                .extra
                .insert("from".to_string(), json!(f.timestamp_millis() as f64));
            bucket.extra.insert("from_as_string".to_string(), json!(s));
        }
        if let (Some(t), Some(s)) = (to, &to_str) {
            bucket
                .extra
                .insert("to".to_string(), json!(t.timestamp_millis() as f64));
            bucket.extra.insert("to_as_string".to_string(), json!(s));
        }
        buckets.push(bucket);
    }
    Ok(buckets)
}

fn date_histogram_buckets<'a>(
    agg: &DateHistogramAgg,
    docs: &[&'a StoredDoc],
) -> Result<Vec<Bucket<'a>>, BackendError> {
    let raw = agg
        .calendar_interval
        .as_deref()
        .or(agg.fixed_interval.as_deref())
        .ok_or_else(|| bad_request("date_histogram requires an interval"))?;
    let interval = DateInterval::parse(raw).map_err(bad_request)?;
    let offset = agg
        .time_zone
        .as_deref()
        .map(parse_offset)
        .transpose()
        .map_err(BackendError::Unsupported)?
        .unwrap_or(0);
    let format = agg.format.as_deref();

    // Keys are UTC millis of the local bucket start
    let key_of = |dt: DateTime<Utc>| -> Option<i64> {
        let local = from_millis(dt.timestamp_millis() + offset)?;
        let start = match &interval {
            DateInterval::Calendar(unit) => floor(local, *unit)?.timestamp_millis(),
            DateInterval::Fixed { millis, .. } => local.timestamp_millis().div_euclid(*millis) * millis,
        };
        Some(start - offset)
    };
    let next_key = |key: i64| -> Option<i64> {
        match &interval {
            DateInterval::Calendar(unit) => {
                Some(advance(from_millis(key + offset)?, *unit)?.timestamp_millis() - offset)
            }
            DateInterval::Fixed { millis, .. } => key.checked_add(*millis),
        }
    };

    let mut groups: BTreeMap<i64, Vec<&'a StoredDoc>> = BTreeMap::new();
    for doc in docs {
        let mut keys: Vec<i64> = doc
            .values(&agg.field)
            .iter()
            .filter_map(|v| date_value(v, format))
            .filter_map(|d| key_of(d))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        for key in keys {
            groups.entry(key).or_default().push(*doc);
        }
    }

    let min_doc_count = agg.min_doc_count.unwrap_or(0);
    if min_doc_count == 0 {
        fill_gaps(&mut groups, next_key)?;
    }

    groups
        .into_iter()
        .filter(|(_, docs)| docs.len() as u64 >= min_doc_count)
        .map(|(key, docs)| {
            let local = from_millis(key + offset)
                .ok_or_else(|| bad_request(format!("date key {} out of range", key)))?;
            let label = format_date(&local, format).map_err(bad_request)?;
            let mut bucket = Bucket::new(json!(key), docs);
            bucket
                .extra
                .insert("key_as_string".to_string(), json!(label));
            Ok(bucket)
        })
        .collect()
}

fn histogram_buckets<'a>(
    agg: &HistogramAgg,
    docs: &[&'a StoredDoc],
) -> Result<Vec<Bucket<'a>>, BackendError> {
    if !(agg.interval > 0.0) {
        return Err(bad_request(format!(
            "histogram interval must be positive, got {}",
            agg.interval
        )));
    }

    let mut groups: BTreeMap<i64, Vec<&'a StoredDoc>> = BTreeMap::new();
    for doc in docs {
        let mut slots: Vec<i64> = doc
            .values(&agg.field)
            .iter()
            .filter_map(as_number)
            .map(|v| (v / agg.interval).floor() as i64)
            .collect();
        slots.sort_unstable();
        slots.dedup();
        for slot in slots {
            groups.entry(slot).or_default().push(*doc);
        }
    }

    let min_doc_count = agg.min_doc_count.unwrap_or(0);
    if min_doc_count == 0 {
        fill_gaps(&mut groups, |slot| slot.checked_add(1))?;
    }

    Ok(groups
        .into_iter()
        .filter(|(_, docs)| docs.len() as u64 >= min_doc_count)
        .map(|(slot, docs)| Bucket::new(json!(slot as f64 * agg.interval), docs))
        .collect())
}

/// Insert empty buckets between the first and last key
fn fill_gaps<'a>(
    groups: &mut BTreeMap<i64, Vec<&'a StoredDoc>>,
    next: impl Fn(i64) -> Option<i64>,
) -> Result<(), BackendError> {
    let (Some(&first), Some(&last)) = (groups.keys().next(), groups.keys().next_back()) else {
        return Ok(());
    };
    let mut key = first;
    let mut count = 0;
    while key < last {
        count += 1;
        if count > MAX_BUCKETS {
            return Err(bad_request(format!(
                "too many buckets, limit is {}",
                MAX_BUCKETS
            )));
        }
        groups.entry(key).or_default();
        key = next(key).ok_or_else(|| bad_request("bucket key overflow"))?;
    }
    Ok(())
}
