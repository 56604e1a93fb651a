//! WHERE to Query DSL, HAVING to a `bucket_selector` pipeline

use std::collections::BTreeMap;

use super::tree::{MetricKind, MetricNode, SelectorNode};
use crate::error::{Error, Result};
use crate::query::ast::{ColumnRef, CompareOp, Condition, HavingCondition, Literal, SelectItem};
use crate::request::{BoolQuery, EsQuery, RangeParams};

/// Name of the compiled HAVING node
pub const HAVING_SELECTOR_NAME: &str = "having";

/// Translate a WHERE condition
pub fn compile_filter(condition: &Condition) -> Result<EsQuery> {
    let query = match condition {
        Condition::And(children) => EsQuery::Bool(BoolQuery {
            filter: compile_all(children)?,
            ..Default::default()
        }),
        Condition::Or(children) => EsQuery::Bool(BoolQuery {
            should: compile_all(children)?,
            minimum_should_match: Some(1),
            ..Default::default()
        }),
        Condition::Not(inner) => EsQuery::not(compile_filter(inner)?),
        Condition::Compare { field, op, value } => compile_compare(field, *op, value),
        Condition::Like {
            field,
            pattern,
            negated,
        } => negate_if(*negated, EsQuery::wildcard(field, like_to_wildcard(pattern))),
        Condition::In {
            field,
            values,
            negated,
        } => negate_if(
            *negated,
            EsQuery::terms(field, values.iter().map(Literal::to_json).collect()),
        ),
        Condition::Between {
            field,
            low,
            high,
            negated,
        } => negate_if(
            *negated,
            EsQuery::range(
                field,
                RangeParams {
                    gte: Some(low.to_json()),
                    lte: Some(high.to_json()),
                    ..Default::default()
                },
            ),
        ),
        Condition::IsNull { field, negated } => {
            // IS NULL matches documents without the field
            negate_if(!*negated, EsQuery::exists(field))
        }
    };
    Ok(query)
}

fn compile_all(children: &[Condition]) -> Result<Vec<EsQuery>> {
    children.iter().map(compile_filter).collect()
}

fn compile_compare(field: &str, op: CompareOp, value: &Literal) -> EsQuery {
    let v = value.to_json();
    let range = |params: RangeParams| EsQuery::range(field, params);
    match op {
        CompareOp::Eq => EsQuery::term(field, v),
        CompareOp::NotEq => EsQuery::not(EsQuery::term(field, v)),
        CompareOp::Lt => range(RangeParams {
            lt: Some(v),
            ..Default::default()
        }),
        CompareOp::Lte => range(RangeParams {
            lte: Some(v),
            ..Default::default()
        }),
        CompareOp::Gt => range(RangeParams {
            gt: Some(v),
            ..Default::default()
        }),
        CompareOp::Gte => range(RangeParams {
            gte: Some(v),
            ..Default::default()
        }),
    }
}

fn negate_if(negated: bool, query: EsQuery) -> EsQuery {
    if negated {
        EsQuery::not(query)
    } else {
        query
    }
}

/// SQL LIKE pattern to wildcard syntax: `%` to `*`, `_` to `?`
pub fn like_to_wildcard(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '%' => out.push('*'),
            '_' => out.push('?'),
            '*' | '?' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// HAVING
// ============================================================================

/// Compile HAVING into a selector over the innermost bucket's metrics
pub fn compile_having(
    having: &HavingCondition,
    select: &[SelectItem],
    metrics: &[MetricNode],
) -> Result<SelectorNode> {
    let mut paths: Vec<String> = Vec::new();
    let script = render_having(having, select, metrics, &mut paths, true)?;

    let buckets_path: BTreeMap<String, String> = paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| (format!("p{}", i), path))
        .collect();

    Ok(SelectorNode {
        name: HAVING_SELECTOR_NAME.to_string(),
        buckets_path,
        script,
    })
}

fn render_having(
    condition: &HavingCondition,
    select: &[SelectItem],
    metrics: &[MetricNode],
    paths: &mut Vec<String>,
    top: bool,
) -> Result<String> {
    let joined = |children: &[HavingCondition], op: &str, paths: &mut Vec<String>| {
        let parts = children
            .iter()
            .map(|c| render_having(c, select, metrics, paths, false))
            .collect::<Result<Vec<_>>>()?;
        let text = parts.join(op);
        Ok::<_, Error>(if top { text } else { format!("({})", text) })
    };

    match condition {
        HavingCondition::And(children) => joined(children, " && ", paths),
        HavingCondition::Or(children) => joined(children, " || ", paths),
        HavingCondition::Not(inner) => Ok(format!(
            "!({})",
            render_having(inner, select, metrics, paths, true)?
        )),
        HavingCondition::Compare { target, op, value } => {
            let path = resolve_path(target, select, metrics)?;
            let number = match value {
                Literal::Number(raw) if value.as_f64().is_some() => raw.clone(),
                other => {
                    return Err(Error::invalid_argument(
                        "HAVING",
                        format!("'{}' is not a number", other.render()),
                    ))
                }
            };
            let index = match paths.iter().position(|p| *p == path) {
                Some(i) => i,
                None => {
                    paths.push(path);
                    paths.len() - 1
                }
            };
            Ok(format!("params.p{} {} {}", index, op.symbol(), number))
        }
    }
}

/// Bucket path of a HAVING reference: `_count` for `COUNT(*)`, else the metric name
fn resolve_path(target: &ColumnRef, select: &[SelectItem], metrics: &[MetricNode]) -> Result<String> {
    let lookup = target.lookup_name();
    let name = select
        .iter()
        .find_map(|item| match (item, target) {
            (SelectItem::Aggregate(call), ColumnRef::Name(n)) if call.display_name() == *n => {
                Some(call.display_name())
            }
            (SelectItem::Aggregate(call), ColumnRef::Aggregate(_))
                if call.canonical_name() == lookup =>
            {
                Some(call.display_name())
            }
            _ => None,
        })
        .ok_or_else(|| Error::UnresolvedReference(lookup.clone()))?;

    let metric = metrics
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| Error::UnresolvedReference(lookup.clone()))?;

    match &metric.kind {
        MetricKind::DocCount => Ok("_count".to_string()),
        kind if kind.is_single_value() => Ok(metric.name.clone()),
        _ => Err(Error::Unsupported(format!(
            "HAVING cannot compare multi-value metric '{}'",
            metric.name
        ))),
    }
}
