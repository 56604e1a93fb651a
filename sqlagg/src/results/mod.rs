//! Reading raw responses back into typed results
//!
//! The reader walks the request's aggregation map alongside the response's
//! `aggregations` object, so every result is keyed by the same display name
//! the compiler gave its node.

pub mod table;

pub use table::Table;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::backend::BackendError;
use crate::compiler::Column;
use crate::error::{Error, Result};
use crate::request::{EsAggregation, SearchRequest};

/// Value of one aggregation in a result row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultValue {
    Null,
    Number(f64),
    Stats(StatsValue),
    Percentiles(BTreeMap<String, Option<f64>>),
    /// `_source` of each hit
    Hits(Vec<Value>),
    Buckets(Vec<BucketRow>),
}

impl ResultValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResultValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// JSON cell for tables; integral numbers render without a fraction
    pub fn to_json(&self) -> Value {
        match self {
            ResultValue::Null => Value::Null,
            ResultValue::Number(n) => number_json(*n),
            ResultValue::Stats(stats) => json!({
                "count": stats.count,
                "min": stats.min.map(number_json),
                "max": stats.max.map(number_json),
                "avg": stats.avg.map(number_json),
                "sum": number_json(stats.sum),
            }),
            ResultValue::Percentiles(values) => Value::Object(
                values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map(number_json).unwrap_or(Value::Null)))
                    .collect(),
            ),
            ResultValue::Hits(hits) => Value::Array(hits.clone()),
            ResultValue::Buckets(buckets) => Value::Array(
                buckets
                    .iter()
                    .map(|b| {
                        let mut obj = Map::new();
                        obj.insert("key".to_string(), b.label());
                        obj.insert("doc_count".to_string(), json!(b.doc_count));
                        obj.extend(b.row.to_json_map());
                        Value::Object(obj)
                    })
                    .collect(),
            ),
        }
    }
}

pub(crate) fn number_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsValue {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub sum: f64,
}

/// One bucket of a bucket aggregation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketRow {
    pub key: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_as_string: Option<String>,
    pub doc_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
    /// Sub-aggregation results
    pub row: ResultRow,
}

impl BucketRow {
    /// `key_as_string` when present, else the key
    pub fn label(&self) -> Value {
        match (&self.key_as_string, &self.key) {
            (Some(s), _) => Value::String(s.clone()),
            (None, Value::Number(n)) if n.is_f64() => {
                n.as_f64().map(number_json).unwrap_or(Value::Null)
            }
            (None, key) => key.clone(),
        }
    }
}

/// Aggregation results keyed by display name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultRow {
    values: BTreeMap<String, ResultValue>,
}

impl ResultRow {
    pub fn get(&self, name: &str) -> Option<&ResultValue> {
        self.values.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ResultValue::as_f64)
    }

    pub fn buckets(&self, name: &str) -> Option<&[BucketRow]> {
        match self.get(name)? {
            ResultValue::Buckets(buckets) => Some(buckets),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResultValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn to_json_map(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_json_map())
    }

    /// The bucket aggregation of this row, if any
    fn bucket_entry(&self) -> Option<&[BucketRow]> {
        self.values.values().find_map(|v| match v {
            ResultValue::Buckets(buckets) => Some(buckets.as_slice()),
            _ => None,
        })
    }
}

/// Hits of a plain search
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Hits {
    pub total: u64,
    /// `_source` objects in response order
    pub rows: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutput {
    Aggregations(ResultRow),
    Hits(Hits),
}

impl QueryOutput {
    /// Flatten into a table; one row per leaf bucket path or per hit
    pub fn to_table(&self, columns: &[Column]) -> Table {
        match self {
            QueryOutput::Aggregations(row) => {
                let mut rows = Vec::new();
                flatten(row, columns, &mut Vec::new(), &mut rows);
                Table {
                    columns: columns.iter().map(|c| c.name.clone()).collect(),
                    rows,
                }
            }
            QueryOutput::Hits(hits) => table::from_hits(hits, columns),
        }
    }
}

fn flatten(row: &ResultRow, columns: &[Column], prefix: &mut Vec<Value>, out: &mut Vec<Vec<Value>>) {
    if let Some(buckets) = row.bucket_entry() {
        for bucket in buckets {
            prefix.push(bucket.label());
            flatten(&bucket.row, columns, prefix, out);
            prefix.pop();
        }
        return;
    }

    let mut cells = prefix.clone();
    cells.extend(columns.iter().skip(prefix.len()).map(|column| {
        row.get(&column.field)
            .map(ResultValue::to_json)
            .unwrap_or(Value::Null)
    }));
    out.push(cells);
}

// ============================================================================
// Reader
// ============================================================================

fn decode(message: impl Into<String>) -> Error {
    Error::Backend(BackendError::Decode(message.into()))
}

/// Reads raw responses into [`QueryOutput`]
pub struct ResultReader;

impl ResultReader {
    pub fn read(request: &SearchRequest, response: &Value) -> Result<QueryOutput> {
        match &request.body.aggs {
            Some(aggs) => {
                let raw = response
                    .get("aggregations")
                    .ok_or_else(|| decode("response has no 'aggregations'"))?;
                let row = read_row(aggs, raw)?;
                debug!(entries = row.len(), "Read aggregation response");
                Ok(QueryOutput::Aggregations(row))
            }
            None => read_hits(response).map(QueryOutput::Hits),
        }
    }
}

fn read_hits(response: &Value) -> Result<Hits> {
    let hits = response
        .get("hits")
        .ok_or_else(|| decode("response has no 'hits'"))?;
    let total = match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(obj @ Value::Object(_)) => obj.get("value").and_then(Value::as_u64),
        _ => None,
    }
    .ok_or_else(|| decode("'hits.total' is missing or malformed"))?;

    let rows = hits
        .get("hits")
        .and_then(Value::as_array)
        .ok_or_else(|| decode("'hits.hits' is not an array"))?
        .iter()
        .map(|hit| hit.get("_source").cloned().unwrap_or(Value::Null))
        .collect();

    Ok(Hits { total, rows })
}

fn read_row(aggs: &BTreeMap<String, EsAggregation>, raw: &Value) -> Result<ResultRow> {
    let mut values = BTreeMap::new();
    for (name, agg) in aggs {
        if agg.bucket_selector.is_some() {
            continue;
        }
        let entry = raw
            .get(name)
            .ok_or_else(|| decode(format!("missing aggregation '{}'", name)))?;
        values.insert(name.clone(), read_value(name, agg, entry)?);
    }
    Ok(ResultRow { values })
}

fn read_value(name: &str, agg: &EsAggregation, raw: &Value) -> Result<ResultValue> {
    if agg.is_bucket() {
        return read_buckets(name, agg, raw);
    }
    if agg.stats.is_some() {
        let count = raw
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| decode(format!("'{}' has no stats count", name)))?;
        let field = |key: &str| raw.get(key).and_then(Value::as_f64);
        return Ok(ResultValue::Stats(StatsValue {
            count,
            min: field("min"),
            max: field("max"),
            avg: field("avg"),
            sum: field("sum").unwrap_or(0.0),
        }));
    }
    if agg.percentiles.is_some() {
        let values = raw
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| decode(format!("'{}' has no percentile values", name)))?;
        return Ok(ResultValue::Percentiles(
            values
                .iter()
                .map(|(k, v)| (k.clone(), v.as_f64()))
                .collect(),
        ));
    }
    if agg.top_hits.is_some() {
        let hits = raw
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| decode(format!("'{}' has no hits", name)))?;
        return Ok(ResultValue::Hits(
            hits.iter()
                .map(|hit| hit.get("_source").cloned().unwrap_or(Value::Null))
                .collect(),
        ));
    }

    match raw.get("value") {
        Some(Value::Null) => Ok(ResultValue::Null),
        Some(v) => v
            .as_f64()
            .map(ResultValue::Number)
            .ok_or_else(|| decode(format!("'{}' value is not a number", name))),
        None => Err(decode(format!("'{}' has no value", name))),
    }
}

fn read_buckets(name: &str, agg: &EsAggregation, raw: &Value) -> Result<ResultValue> {
    let list = raw
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| decode(format!("'{}' has no bucket list", name)))?;

    let empty = BTreeMap::new();
    let subs = agg.aggs.as_ref().unwrap_or(&empty);

    let mut buckets = Vec::with_capacity(list.len());
    for bucket in list {
        let key = bucket
            .get("key")
            .cloned()
            .ok_or_else(|| decode(format!("bucket of '{}' has no key", name)))?;
        let doc_count = bucket
            .get("doc_count")
            .and_then(Value::as_u64)
            .ok_or_else(|| decode(format!("bucket of '{}' has no doc_count", name)))?;
        buckets.push(BucketRow {
            key,
            key_as_string: bucket
                .get("key_as_string")
                .and_then(Value::as_str)
                .map(str::to_string),
            doc_count,
            from: bucket.get("from").cloned(),
            to: bucket.get("to").cloned(),
            row: read_row(subs, bucket)?,
        });
    }
    Ok(ResultValue::Buckets(buckets))
}
