//! ORDER BY and LIMIT compilation

use tracing::debug;

use super::tree::{BucketNode, MetricNode};
use crate::error::{Error, Result};
use crate::query::ast::{ColumnRef, Query, SelectItem};
use crate::request::{sort_clause, SortClause};

/// What an ORDER BY item refers to in an aggregating query
#[derive(Debug, Clone, PartialEq)]
enum OrderTarget {
    /// Metric display name
    Metric(String),
    /// Key of the bucket at this chain position
    Key(usize),
}

/// Attach sort directives and the LIMIT size to the bucket chain
pub fn apply_bucket_order(
    query: &Query,
    buckets: &mut [BucketNode],
    metrics: &[MetricNode],
) -> Result<()> {
    for item in &query.order_by {
        let target = resolve(&item.target, query, buckets, metrics)?;
        let Some(innermost) = buckets.len().checked_sub(1) else {
            // Without GROUP BY there is a single row; nothing to sort
            continue;
        };

        let (index, key) = match target {
            OrderTarget::Metric(name) => {
                let single_value = metrics
                    .iter()
                    .find(|m| m.name == name)
                    .is_some_and(|m| m.kind.is_single_value());
                if !single_value {
                    return Err(Error::Unsupported(format!(
                        "cannot order buckets by multi-value metric '{}'",
                        name
                    )));
                }
                (innermost, name)
            }
            OrderTarget::Key(index) => (index, "_key".to_string()),
        };

        let bucket = &mut buckets[index];
        if !bucket.kind.supports_order() {
            return Err(Error::Unsupported(format!(
                "bucket '{}' cannot be ordered",
                bucket.name
            )));
        }
        debug!(bucket = %bucket.name, %key, direction = item.direction.as_str(), "Bucket order");
        bucket.order.push((key, item.direction));
    }

    if let (Some(limit), Some(innermost)) = (query.limit, buckets.last_mut()) {
        if !innermost.is_terms() {
            return Err(Error::Unsupported(format!(
                "LIMIT applies to field buckets, innermost bucket is '{}'",
                innermost.name
            )));
        }
        if limit == 0 {
            return Err(Error::invalid_argument(
                "LIMIT",
                format!("bucket '{}' needs a size of at least 1", innermost.name),
            ));
        }
        innermost.size = Some(limit);
    }

    Ok(())
}

fn resolve(
    target: &ColumnRef,
    query: &Query,
    buckets: &[BucketNode],
    metrics: &[MetricNode],
) -> Result<OrderTarget> {
    let lookup = target.lookup_name();

    // Metrics by display name, or by canonical name when restated
    let metric = query.select.iter().find_map(|item| match item {
        SelectItem::Aggregate(call) => {
            let matches = match target {
                ColumnRef::Name(n) => call.display_name() == *n,
                ColumnRef::Aggregate(_) => call.canonical_name() == lookup,
            };
            matches.then(|| call.display_name())
        }
        _ => None,
    });
    if let Some(name) = metric.filter(|n| metrics.iter().any(|m| &m.name == n)) {
        return Ok(OrderTarget::Metric(name));
    }

    if let ColumnRef::Name(name) = target {
        let field = field_for_alias(query, name).unwrap_or(name.as_str());
        if let Some(index) = buckets
            .iter()
            .position(|b| b.is_terms() && b.name == field)
        {
            return Ok(OrderTarget::Key(index));
        }
    }

    Err(Error::UnresolvedOrderTarget(lookup))
}

fn field_for_alias<'a>(query: &'a Query, alias: &str) -> Option<&'a str> {
    query.select.iter().find_map(|item| match item {
        SelectItem::Field {
            name,
            alias: Some(a),
        } if a == alias => Some(name.as_str()),
        _ => None,
    })
}

/// Hit sort for non-aggregating queries
pub fn hit_sort(query: &Query) -> Result<Vec<SortClause>> {
    query
        .order_by
        .iter()
        .map(|item| match &item.target {
            ColumnRef::Name(name) => {
                let field = field_for_alias(query, name).unwrap_or(name.as_str());
                Ok(sort_clause(field, item.direction))
            }
            ColumnRef::Aggregate(call) => {
                Err(Error::UnresolvedOrderTarget(call.canonical_name()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::grouping::compile_group_by;
    use crate::compiler::metrics::compile_metrics;
    use crate::query::parser::parse;
    use crate::query::ast::SortDirection;

    fn compile(sql: &str) -> Result<(Vec<BucketNode>, Vec<MetricNode>)> {
        let query = parse(sql)?;
        let mut buckets = compile_group_by(&query.group_by, 10_000)?;
        let metrics = compile_metrics(&query.select)?;
        apply_bucket_order(&query, &mut buckets, &metrics)?;
        Ok((buckets, metrics))
    }

    // ========================================================================
    // Aggregating queries
    // ========================================================================

    #[test]
    fn test_order_by_restated_distinct_count() {
        let (buckets, _) = compile(
            "select sum(age),count(*), count(distinct age) from bank group by gender order by count(distinct age) desc limit 3",
        )
        .unwrap();
        assert_eq!(buckets[0].size, Some(3));
        assert_eq!(
            buckets[0].order,
            vec![("COUNT(DISTINCT age)".to_string(), SortDirection::Desc)]
        );
    }

    #[test]
    fn test_order_by_alias() {
        let (buckets, _) =
            compile("select count(*) as kk from bank group by gender order by kk desc limit 10")
                .unwrap();
        assert_eq!(buckets[0].size, Some(10));
        assert_eq!(buckets[0].order, vec![("kk".to_string(), SortDirection::Desc)]);
    }

    #[test]
    fn test_order_by_restated_aliased_aggregate() {
        let (buckets, _) =
            compile("select count(*) as kk from bank group by gender order by count(*)").unwrap();
        assert_eq!(buckets[0].order, vec![("kk".to_string(), SortDirection::Asc)]);
    }

    #[test]
    fn test_order_by_group_key_targets_its_bucket() {
        let (buckets, _) = compile(
            "select count(*) from bank group by gender, state order by gender desc, count(*) asc",
        )
        .unwrap();
        assert_eq!(buckets[0].order, vec![("_key".to_string(), SortDirection::Desc)]);
        assert_eq!(buckets[1].order, vec![("COUNT(*)".to_string(), SortDirection::Asc)]);
    }

    #[test]
    fn test_order_by_unknown_target() {
        let err = compile("select count(*) from bank group by gender order by nope").unwrap_err();
        assert!(matches!(err, Error::UnresolvedOrderTarget(n) if n == "nope"));

        let err = compile("select count(*) from bank group by gender order by sum(age)")
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedOrderTarget(n) if n == "SUM(age)"));
    }

    #[test]
    fn test_order_range_bucket_unsupported() {
        let err = compile("select count(*) from bank group by range(age, 20, 30) order by count(*)")
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_limit_on_range_bucket_unsupported() {
        let err = compile("select count(*) from bank group by range(age, 20, 30) limit 1")
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_limit_zero_on_buckets_rejected() {
        let err = compile("select g, count(*) from t group by g limit 0").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument { function, .. } if function == "LIMIT"
        ));
    }

    #[test]
    fn test_order_by_stats_unsupported() {
        let err = compile("select stats(age) from bank group by gender order by stats(age)")
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_limit_without_group_by_is_ignored() {
        let (buckets, metrics) = compile("select count(*) from bank order by count(*) limit 5")
            .unwrap();
        assert!(buckets.is_empty());
        assert_eq!(metrics.len(), 1);
    }

    // ========================================================================
    // Plain queries
    // ========================================================================

    #[test]
    fn test_hit_sort_resolves_alias() {
        let query = parse("select firstname as fn, age from bank order by fn, age desc").unwrap();
        let sort = hit_sort(&query).unwrap();
        assert_eq!(
            sort,
            vec![
                sort_clause("firstname", SortDirection::Asc),
                sort_clause("age", SortDirection::Desc),
            ]
        );
    }
}
