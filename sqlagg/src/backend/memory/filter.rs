//! Query DSL evaluation over stored documents

use std::cmp::Ordering;

use super::document::{compare_for_range, glob_regex, values_equal, StoredDoc};
use crate::backend::BackendError;
use crate::request::{BoolQuery, EsQuery, RangeParams};

/// True when `doc` satisfies `query`
pub fn matches(query: &EsQuery, doc: &StoredDoc) -> Result<bool, BackendError> {
    let matched = match query {
        EsQuery::MatchAll(_) => true,
        EsQuery::Term(map) => map
            .iter()
            .all(|(field, expected)| doc.values(field).iter().any(|v| values_equal(v, expected))),
        EsQuery::Terms(map) => map.iter().all(|(field, expected)| {
            doc.values(field)
                .iter()
                .any(|v| expected.iter().any(|e| values_equal(v, e)))
        }),
        EsQuery::Range(map) => map
            .iter()
            .all(|(field, params)| doc.values(field).iter().any(|v| in_range(v, params))),
        EsQuery::Wildcard(map) => {
            let mut all = true;
            for (field, pattern) in map {
                let regex = glob_regex(pattern).ok_or_else(|| {
                    BackendError::Unsupported(format!("wildcard pattern '{}'", pattern))
                })?;
                let hit = doc
                    .values(field)
                    .iter()
                    .any(|v| v.as_str().is_some_and(|s| regex.is_match(s)));
                all &= hit;
            }
            all
        }
        EsQuery::Exists(exists) => doc.has_field(&exists.field),
        EsQuery::Bool(bool_query) => matches_bool(bool_query, doc)?,
    };
    Ok(matched)
}

fn matches_bool(query: &BoolQuery, doc: &StoredDoc) -> Result<bool, BackendError> {
    for clause in query.must.iter().chain(&query.filter) {
        if !matches(clause, doc)? {
            return Ok(false);
        }
    }
    for clause in &query.must_not {
        if matches(clause, doc)? {
            return Ok(false);
        }
    }
    if query.should.is_empty() {
        return Ok(true);
    }

    // Without must/filter clauses at least one should clause is required
    let required = match query.minimum_should_match {
        Some(n) => n as usize,
        None if query.must.is_empty() && query.filter.is_empty() => 1,
        None => 0,
    };
    let mut hits = 0;
    for clause in &query.should {
        if matches(clause, doc)? {
            hits += 1;
        }
    }
    Ok(hits >= required)
}

fn in_range(value: &serde_json::Value, params: &RangeParams) -> bool {
    let check = |bound: &Option<serde_json::Value>, ok: fn(Ordering) -> bool| match bound {
        Some(b) => compare_for_range(value, b).is_some_and(ok),
        None => true,
    };
    check(&params.gte, |o| o != Ordering::Less)
        && check(&params.gt, |o| o == Ordering::Greater)
        && check(&params.lte, |o| o != Ordering::Greater)
        && check(&params.lt, |o| o == Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::filter::compile_filter;
    use crate::query::parser::parse;
    use serde_json::{json, Value};

    fn doc(source: Value) -> StoredDoc {
        StoredDoc {
            index: "bank".to_string(),
            doc_type: None,
            id: "1".to_string(),
            source,
        }
    }

    fn eval(condition: &str, source: Value) -> bool {
        let query = parse(&format!("select * from bank where {}", condition)).unwrap();
        let compiled = compile_filter(&query.filter.unwrap()).unwrap();
        matches(&compiled, &doc(source)).unwrap()
    }

    #[test]
    fn test_term_and_ranges() {
        let d = json!({"gender": "M", "age": 32, "balance": 1500.5});
        assert!(eval("gender = 'M'", d.clone()));
        assert!(!eval("gender = 'F'", d.clone()));
        assert!(eval("age >= 32", d.clone()));
        assert!(!eval("age > 32", d.clone()));
        assert!(eval("balance between 1000 and 2000", d.clone()));
        assert!(eval("age != 30", d));
    }

    #[test]
    fn test_boolean_combinations() {
        let d = json!({"state": "TX", "age": 25});
        assert!(eval("age > 20 and (state = 'TX' or state = 'CA')", d.clone()));
        assert!(!eval("age > 30 or state = 'CA'", d.clone()));
        assert!(eval("not state = 'CA'", d));
    }

    #[test]
    fn test_like_in_and_null() {
        let d = json!({"firstname": "Amber", "state": "TX", "email": null});
        assert!(eval("firstname like 'Am_er%'", d.clone()));
        assert!(!eval("firstname not like 'Am%'", d.clone()));
        assert!(eval("state in ('TX', 'CA')", d.clone()));
        assert!(eval("email is null", d.clone()));
        assert!(eval("state is not null", d));
    }

    #[test]
    fn test_bool_should_alongside_must() {
        let query = EsQuery::Bool(BoolQuery {
            must: vec![EsQuery::term("gender", json!("M"))],
            should: vec![EsQuery::term("state", json!("CA"))],
            ..Default::default()
        });
        assert!(matches(&query, &doc(json!({"gender": "M", "state": "TX"}))).unwrap());
    }
}
