//! In-memory execution backend
//!
//! Evaluates compiled requests over documents held in memory and answers with
//! the same JSON shapes the search engine returns. Used by tests and for
//! running queries against small local datasets without a cluster.

mod aggregate;
mod dates;
mod document;
mod filter;
mod script;

pub use document::StoredDoc;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use self::aggregate::{aggregate, sort_docs, AggContext};
use self::document::glob_regex;
use super::{BackendError, ExecutionBackend};
use crate::request::SearchRequest;

/// Hits returned when a request does not set `size`
const DEFAULT_HITS_SIZE: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    indices: BTreeSet<String>,
    docs: Vec<StoredDoc>,
    now: Option<DateTime<Utc>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add documents to an index; they match any document type
    pub fn with_documents(
        mut self,
        index: impl Into<String>,
        docs: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.insert(index.into(), None, docs);
        self
    }

    /// Add documents under an index and document type
    pub fn with_typed_documents(
        mut self,
        index: impl Into<String>,
        doc_type: impl Into<String>,
        docs: impl IntoIterator<Item = Value>,
    ) -> Self {
        self.insert(index.into(), Some(doc_type.into()), docs);
        self
    }

    /// Fix the instant `now` resolves to in date math
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn insert(
        &mut self,
        index: String,
        doc_type: Option<String>,
        docs: impl IntoIterator<Item = Value>,
    ) {
        self.indices.insert(index.clone());
        for source in docs {
            let id = source
                .get("_id")
                .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_u64().map(|n| n.to_string())))
                .unwrap_or_else(|| (self.docs.len() + 1).to_string());
            self.docs.push(StoredDoc {
                index: index.clone(),
                doc_type: doc_type.clone(),
                id,
                source,
            });
        }
    }

    /// Indices named by a request path segment: comma separated, `*` wildcards
    fn resolve_indices(&self, pattern: &str) -> Result<BTreeSet<&str>, BackendError> {
        let mut matched = BTreeSet::new();
        for part in pattern.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let regex = glob_regex(part)
                .ok_or_else(|| BackendError::Unsupported(format!("index pattern '{}'", part)))?;
            let before = matched.len();
            matched.extend(
                self.indices
                    .iter()
                    .filter(|name| regex.is_match(name))
                    .map(String::as_str),
            );
            if matched.len() == before && !part.contains('*') {
                return Err(BackendError::IndexNotFound(part.to_string()));
            }
        }
        if matched.is_empty() {
            return Err(BackendError::IndexNotFound(pattern.to_string()));
        }
        Ok(matched)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<Value, BackendError> {
        let indices = self.resolve_indices(&request.index)?;
        let body = &request.body;

        let mut hits: Vec<&StoredDoc> = Vec::new();
        for doc in &self.docs {
            if !indices.contains(doc.index.as_str()) {
                continue;
            }
            if let (Some(wanted), Some(actual)) = (&request.doc_type, &doc.doc_type) {
                if wanted != actual {
                    continue;
                }
            }
            let matched = match &body.query {
                Some(query) => filter::matches(query, doc)?,
                None => true,
            };
            if matched {
                hits.push(doc);
            }
        }
        debug!(
            index = %request.index,
            matched = hits.len(),
            aggregation = request.is_aggregation(),
            "Evaluated request in memory"
        );

        let aggregations = match &body.aggs {
            Some(aggs) => {
                let ctx = AggContext {
                    now: self.now.unwrap_or_else(Utc::now),
                };
                Some(aggregate(aggs, &hits, &ctx)?)
            }
            None => None,
        };

        let total = hits.len();
        if let Some(sort) = &body.sort {
            sort_docs(&mut hits, sort);
        }
        let includes = body.source.clone().unwrap_or_default();
        let listed: Vec<Value> = hits
            .iter()
            .take(body.size.unwrap_or(DEFAULT_HITS_SIZE))
            .map(|doc| doc.to_hit(doc.filtered_source(&includes, &[])))
            .collect();

        let mut response = json!({
            "took": 0,
            "timed_out": false,
            "hits": {
                "total": { "value": total, "relation": "eq" },
                "max_score": null,
                "hits": listed,
            }
        });
        if let (Some(aggregations), Some(obj)) = (aggregations, response.as_object_mut()) {
            obj.insert("aggregations".to_string(), Value::Object(aggregations));
        }
        Ok(response)
    }
}

#[async_trait]
impl ExecutionBackend for MemoryBackend {
    async fn execute(&self, request: &SearchRequest) -> Result<Value, BackendError> {
        self.search(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::SqlCompiler;

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .with_typed_documents(
                "bank",
                "account",
                vec![
                    json!({"firstname": "Amber", "gender": "M", "age": 32, "balance": 39225}),
                    json!({"firstname": "Hattie", "gender": "M", "age": 36, "balance": 5686}),
                    json!({"firstname": "Nanette", "gender": "F", "age": 28, "balance": 32838}),
                ],
            )
            .with_documents("logs", vec![json!({"level": "info"})])
    }

    fn run(sql: &str) -> Result<Value, BackendError> {
        let compiled = SqlCompiler::default().explain(sql).unwrap();
        backend().search(&compiled.request)
    }

    #[test]
    fn test_plain_search_with_sort_and_source() {
        let response = run("SELECT firstname FROM bank WHERE age > 30 ORDER BY age DESC").unwrap();
        assert_eq!(response["hits"]["total"]["value"], json!(2));
        let hits = response["hits"]["hits"].as_array().unwrap();
        assert_eq!(hits[0]["_source"], json!({"firstname": "Hattie"}));
        assert_eq!(hits[1]["_source"], json!({"firstname": "Amber"}));
        assert!(response.get("aggregations").is_none());
    }

    #[test]
    fn test_aggregation_response() {
        let response = run("SELECT gender, COUNT(*) FROM bank/account GROUP BY gender").unwrap();
        assert_eq!(response["hits"]["hits"], json!([]));
        let buckets = response["aggregations"]["gender"]["buckets"].as_array().unwrap();
        assert_eq!(buckets[0]["key"], json!("M"));
        assert_eq!(buckets[0]["COUNT(*)"]["value"], json!(2));
    }

    #[test]
    fn test_type_filtering() {
        let response = run("SELECT COUNT(*) FROM bank/other").unwrap();
        assert_eq!(response["aggregations"]["COUNT(*)"]["value"], json!(0));
    }

    #[test]
    fn test_index_resolution() {
        let b = backend();
        assert_eq!(b.resolve_indices("bank").unwrap().len(), 1);
        assert_eq!(b.resolve_indices("*").unwrap().len(), 2);
        assert_eq!(b.resolve_indices("bank,logs").unwrap().len(), 2);
        assert!(matches!(
            b.resolve_indices("missing"),
            Err(BackendError::IndexNotFound(name)) if name == "missing"
        ));
        assert!(matches!(
            b.resolve_indices("nothing*"),
            Err(BackendError::IndexNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_through_trait() {
        let backend: std::sync::Arc<dyn ExecutionBackend> = std::sync::Arc::new(backend());
        let compiled = SqlCompiler::default()
            .explain("SELECT COUNT(*) FROM logs")
            .unwrap();
        let response = backend.execute(&compiled.request).await.unwrap();
        assert_eq!(response["aggregations"]["COUNT(*)"]["value"], json!(1));
    }
}
