//! Stored documents and field access

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

/// A document held by the memory backend
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDoc {
    pub index: String,
    pub doc_type: Option<String>,
    pub id: String,
    pub source: Value,
}

impl StoredDoc {
    /// Values of a field, arrays flattened and nulls dropped.
    /// `_index`, `_type` and `_id` resolve to document metadata.
    pub fn values(&self, path: &str) -> Vec<Value> {
        match path {
            "_index" => return vec![Value::String(self.index.clone())],
            "_id" => return vec![Value::String(self.id.clone())],
            "_type" => {
                return self
                    .doc_type
                    .iter()
                    .map(|t| Value::String(t.clone()))
                    .collect()
            }
            _ => {}
        }

        let mut out = Vec::new();
        if let Some(direct) = self.source.get(path) {
            flatten_into(direct, &mut out);
            return out;
        }

        let mut current = vec![&self.source];
        for segment in path.split('.') {
            let mut next = Vec::new();
            for value in current {
                match value {
                    Value::Object(map) => {
                        if let Some(child) = map.get(segment) {
                            next.push(child);
                        }
                    }
                    Value::Array(items) => {
                        next.extend(items.iter().filter_map(|item| item.get(segment)));
                    }
                    _ => {}
                }
            }
            current = next;
        }
        for value in current {
            flatten_into(value, &mut out);
        }
        out
    }

    pub fn has_field(&self, path: &str) -> bool {
        !self.values(path).is_empty()
    }

    /// `_source` restricted by include/exclude patterns on top-level keys.
    /// A dotted include such as `address.city` keeps its whole parent object.
    pub fn filtered_source(&self, includes: &[String], excludes: &[String]) -> Value {
        let Value::Object(map) = &self.source else {
            return self.source.clone();
        };
        let parents: Vec<&str> = includes
            .iter()
            .filter_map(|p| p.split_once('.').map(|(parent, _)| parent))
            .collect();
        let includes: Vec<Regex> = includes.iter().filter_map(|p| glob_regex(p)).collect();
        let excludes: Vec<Regex> = excludes.iter().filter_map(|p| glob_regex(p)).collect();

        let filtered: Map<String, Value> = map
            .iter()
            .filter(|(key, _)| {
                includes.is_empty()
                    || includes.iter().any(|r| r.is_match(key))
                    || parents.contains(&key.as_str())
            })
            .filter(|(key, _)| !excludes.iter().any(|r| r.is_match(key)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(filtered)
    }

    /// Hit entry as returned in `hits.hits`
    pub fn to_hit(&self, source: Value) -> Value {
        let mut hit = Map::new();
        hit.insert("_index".to_string(), Value::String(self.index.clone()));
        if let Some(t) = &self.doc_type {
            hit.insert("_type".to_string(), Value::String(t.clone()));
        }
        hit.insert("_id".to_string(), Value::String(self.id.clone()));
        hit.insert("_score".to_string(), Value::Null);
        hit.insert("_source".to_string(), source);
        Value::Object(hit)
    }
}

fn flatten_into(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => items.iter().for_each(|v| flatten_into(v, out)),
        other => out.push(other.clone()),
    }
}

/// Numeric view of a value; numeric strings are coerced
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Total order used for keys and sorting: numbers, then strings, then the rest
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        _ => 3,
    }
}

/// Term equality; a number matches its numeric string form
pub fn values_equal(doc_value: &Value, query_value: &Value) -> bool {
    match (doc_value, query_value) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (as_number(doc_value), as_number(query_value)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        _ => doc_value == query_value,
    }
}

/// Ordering for range comparisons: numeric when both sides are numeric
pub fn compare_for_range(doc_value: &Value, bound: &Value) -> Option<Ordering> {
    match (as_number(doc_value), as_number(bound)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (doc_value, bound) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

/// Hash key distinguishing `1` from `"1"`
pub fn key_string(value: &Value) -> String {
    value.to_string()
}

/// Anchored regex for a `*`/`?` pattern; `\` escapes the next character
pub fn glob_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(source: Value) -> StoredDoc {
        StoredDoc {
            index: "bank".to_string(),
            doc_type: Some("account".to_string()),
            id: "1".to_string(),
            source,
        }
    }

    #[test]
    fn test_values_nested_and_arrays() {
        let d = doc(json!({
            "name": "Amber",
            "address": {"city": "Brogan", "zip": null},
            "tags": ["a", "b"],
            "jobs": [{"title": "dev"}, {"title": "ops"}],
            "dotted.key": 5
        }));
        assert_eq!(d.values("name"), vec![json!("Amber")]);
        assert_eq!(d.values("address.city"), vec![json!("Brogan")]);
        assert!(d.values("address.zip").is_empty());
        assert_eq!(d.values("tags").len(), 2);
        assert_eq!(d.values("jobs.title"), vec![json!("dev"), json!("ops")]);
        assert_eq!(d.values("dotted.key"), vec![json!(5)]);
        assert_eq!(d.values("_index"), vec![json!("bank")]);
        assert!(!d.has_field("missing"));
    }

    #[test]
    fn test_filtered_source() {
        let d = doc(json!({"firstname": "Amber", "lastname": "Duke", "age": 32}));
        let only_names = d.filtered_source(&["*name".to_string()], &["last*".to_string()]);
        assert_eq!(only_names, json!({"firstname": "Amber"}));
        assert_eq!(d.filtered_source(&[], &[]), d.source);

        let nested = doc(json!({"address": {"city": "Brogan"}, "age": 32}));
        assert_eq!(
            nested.filtered_source(&["address.city".to_string()], &[]),
            json!({"address": {"city": "Brogan"}})
        );
    }

    #[test]
    fn test_compare_and_equality() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(5), &json!("a")), Ordering::Less);
        assert!(values_equal(&json!(30), &json!(30.0)));
        assert!(values_equal(&json!("30"), &json!(30)));
        assert!(!values_equal(&json!("M"), &json!("F")));
    }

    #[test]
    fn test_glob_regex() {
        let re = glob_regex("Am?er*").unwrap();
        assert!(re.is_match("Amber"));
        assert!(re.is_match("Amberlyn"));
        assert!(!re.is_match("Ambr"));
        let literal = glob_regex("50\\*").unwrap();
        assert!(literal.is_match("50*"));
        assert!(!literal.is_match("500"));
    }
}
