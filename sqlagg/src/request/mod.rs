//! Compiled search requests

pub mod types;

pub use types::*;

use serde::{Deserialize, Serialize};

/// A compiled request: target index/type and a Query DSL body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub index: String,
    pub doc_type: Option<String>,
    pub body: SearchBody,
}

impl SearchRequest {
    /// `/index/type/_search` or `/index/_search`
    pub fn path(&self) -> String {
        match &self.doc_type {
            Some(t) => format!("/{}/{}/_search", self.index, t),
            None => format!("/{}/_search", self.index),
        }
    }

    /// True when the request carries aggregations rather than a hit listing
    pub fn is_aggregation(&self) -> bool {
        self.body.aggs.is_some()
    }

    /// Request body as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_with_and_without_type() {
        let mut req = SearchRequest {
            index: "bank".to_string(),
            doc_type: Some("account".to_string()),
            body: SearchBody::default(),
        };
        assert_eq!(req.path(), "/bank/account/_search");
        req.doc_type = None;
        assert_eq!(req.path(), "/bank/_search");
    }

    #[test]
    fn test_empty_body_serializes_to_empty_object() {
        let req = SearchRequest {
            index: "bank".to_string(),
            doc_type: None,
            body: SearchBody::default(),
        };
        assert_eq!(req.to_json(), serde_json::json!({}));
        assert!(!req.is_aggregation());
    }
}
