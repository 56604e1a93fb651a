//! Aggregate select items to metric nodes

use tracing::debug;

use super::tree::{MetricKind, MetricNode};
use crate::error::{Error, Result};
use crate::query::ast::{AggregateCall, CallArgument, Literal, SelectItem, SortDirection};

const DEFAULT_TOP_HITS_SIZE: usize = 3;
const DEFAULT_PERCENTS: &[f64] = &[1.0, 5.0, 25.0, 50.0, 75.0, 95.0, 99.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFunction {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Stats,
    Percentiles,
    TopHits,
}

impl MetricFunction {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "count" => Ok(MetricFunction::Count),
            "sum" => Ok(MetricFunction::Sum),
            "min" => Ok(MetricFunction::Min),
            "max" => Ok(MetricFunction::Max),
            "avg" => Ok(MetricFunction::Avg),
            "stats" => Ok(MetricFunction::Stats),
            "percentiles" => Ok(MetricFunction::Percentiles),
            "tophits" | "top_hits" => Ok(MetricFunction::TopHits),
            _ => Err(Error::UnknownFunction(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetricFunction::Count => "COUNT",
            MetricFunction::Sum => "SUM",
            MetricFunction::Min => "MIN",
            MetricFunction::Max => "MAX",
            MetricFunction::Avg => "AVG",
            MetricFunction::Stats => "STATS",
            MetricFunction::Percentiles => "PERCENTILES",
            MetricFunction::TopHits => "TOPHITS",
        }
    }
}

/// `TOPHITS(size=n, from=k, include='a,b', exclude='c', field='asc'|'desc', ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct TopHitsConfig {
    pub size: usize,
    pub from: Option<usize>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    /// Sort keys in argument order
    pub sort: Vec<(String, SortDirection)>,
}

impl Default for TopHitsConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_TOP_HITS_SIZE,
            from: None,
            includes: Vec::new(),
            excludes: Vec::new(),
            sort: Vec::new(),
        }
    }
}

impl TopHitsConfig {
    fn from_call(call: &AggregateCall) -> Result<Self> {
        let function = MetricFunction::TopHits.name();
        if call.argument.is_some() || !call.positional.is_empty() {
            return Err(Error::invalid_argument(
                function,
                "takes only key=value arguments",
            ));
        }

        let mut config = Self::default();
        for (key, value) in &call.parameters {
            match key.to_lowercase().as_str() {
                "size" => config.size = non_negative(function, "size", value)?,
                "from" => config.from = Some(non_negative(function, "from", value)?),
                "include" => config.includes = split_list(value),
                "exclude" => config.excludes = split_list(value),
                _ => {
                    let direction = value
                        .as_str()
                        .and_then(SortDirection::parse)
                        .ok_or_else(|| {
                            Error::invalid_argument(
                                function,
                                format!(
                                    "sort direction for '{}' must be 'asc' or 'desc', got '{}'",
                                    key,
                                    value.render()
                                ),
                            )
                        })?;
                    config.sort.push((key.clone(), direction));
                }
            }
        }
        Ok(config)
    }
}

/// `PERCENTILES(field, p1, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct PercentilesConfig {
    pub field: String,
    pub percents: Vec<f64>,
}

impl PercentilesConfig {
    fn from_call(call: &AggregateCall, field: String) -> Result<Self> {
        let function = MetricFunction::Percentiles.name();
        if !call.parameters.is_empty() {
            return Err(Error::invalid_argument(
                function,
                "percents are given positionally",
            ));
        }
        if call.positional.is_empty() {
            return Ok(Self {
                field,
                percents: DEFAULT_PERCENTS.to_vec(),
            });
        }

        let mut percents = Vec::with_capacity(call.positional.len());
        for literal in &call.positional {
            let p = literal
                .as_f64()
                .filter(|p| (0.0..=100.0).contains(p))
                .ok_or_else(|| {
                    Error::invalid_argument(
                        function,
                        format!("'{}' is not a percentile in [0, 100]", literal.render()),
                    )
                })?;
            percents.push(p);
        }
        Ok(Self { field, percents })
    }
}

/// Compile the aggregate items of a SELECT list, in select order
pub fn compile_metrics(items: &[SelectItem]) -> Result<Vec<MetricNode>> {
    items
        .iter()
        .filter_map(|item| match item {
            SelectItem::Aggregate(call) => Some(compile_metric(call)),
            _ => None,
        })
        .collect()
}

pub fn compile_metric(call: &AggregateCall) -> Result<MetricNode> {
    let function = MetricFunction::from_name(&call.function)?;
    let name = function.name();

    if call.distinct && function != MetricFunction::Count {
        return Err(Error::invalid_argument(name, "DISTINCT is only valid in COUNT"));
    }
    if call.argument == Some(CallArgument::Star) && function != MetricFunction::Count {
        return Err(Error::invalid_argument(name, "'*' is only valid in COUNT"));
    }

    let kind = match function {
        MetricFunction::Count => {
            no_extra_arguments(call, name)?;
            match &call.argument {
                Some(CallArgument::Star) => MetricKind::DocCount,
                Some(CallArgument::Field(field)) if call.distinct => MetricKind::Cardinality {
                    field: field.clone(),
                },
                Some(CallArgument::Field(field)) => MetricKind::ValueCount {
                    field: field.clone(),
                },
                None => return Err(Error::invalid_argument(name, "requires '*' or a field")),
            }
        }
        MetricFunction::Sum => MetricKind::Sum {
            field: single_field(call, name)?,
        },
        MetricFunction::Min => MetricKind::Min {
            field: single_field(call, name)?,
        },
        MetricFunction::Max => MetricKind::Max {
            field: single_field(call, name)?,
        },
        MetricFunction::Avg => MetricKind::Avg {
            field: single_field(call, name)?,
        },
        MetricFunction::Stats => MetricKind::Stats {
            field: single_field(call, name)?,
        },
        MetricFunction::Percentiles => {
            let field = required_field(call, name)?;
            MetricKind::Percentiles(PercentilesConfig::from_call(call, field)?)
        }
        MetricFunction::TopHits => MetricKind::TopHits(TopHitsConfig::from_call(call)?),
    };

    let node = MetricNode {
        name: call.display_name(),
        kind,
    };
    debug!(metric = %node.name, ?function, "Compiled metric");
    Ok(node)
}

fn required_field(call: &AggregateCall, function: &str) -> Result<String> {
    call.field()
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_argument(function, "requires a field"))
}

fn single_field(call: &AggregateCall, function: &str) -> Result<String> {
    no_extra_arguments(call, function)?;
    required_field(call, function)
}

fn no_extra_arguments(call: &AggregateCall, function: &str) -> Result<()> {
    if !call.parameters.is_empty() || !call.positional.is_empty() {
        return Err(Error::invalid_argument(
            function,
            "takes a single argument",
        ));
    }
    Ok(())
}

fn non_negative(function: &str, key: &str, value: &Literal) -> Result<usize> {
    value.render().parse().map_err(|_| {
        Error::invalid_argument(
            function,
            format!("{} must be a non-negative integer, got '{}'", key, value.render()),
        )
    })
}

fn split_list(value: &Literal) -> Vec<String> {
    value
        .render()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_star() -> AggregateCall {
        AggregateCall::new("COUNT", Some(CallArgument::Star))
    }

    // ========================================================================
    // COUNT family
    // ========================================================================

    #[test]
    fn test_count_variants() {
        assert_eq!(compile_metric(&count_star()).unwrap().kind, MetricKind::DocCount);
        assert_eq!(
            compile_metric(&AggregateCall::on_field("count", "age")).unwrap().kind,
            MetricKind::ValueCount {
                field: "age".to_string()
            }
        );
        let distinct = compile_metric(&AggregateCall::on_field("count", "age").distinct()).unwrap();
        assert_eq!(distinct.name, "COUNT(DISTINCT age)");
        assert_eq!(
            distinct.kind,
            MetricKind::Cardinality {
                field: "age".to_string()
            }
        );
    }

    #[test]
    fn test_alias_becomes_metric_name() {
        let node = compile_metric(&count_star().alias("mycount")).unwrap();
        assert_eq!(node.name, "mycount");
    }

    #[test]
    fn test_distinct_only_on_count() {
        let err = compile_metric(&AggregateCall::on_field("sum", "age").distinct()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_star_only_on_count() {
        let err =
            compile_metric(&AggregateCall::new("avg", Some(CallArgument::Star))).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_unknown_function() {
        let err = compile_metric(&AggregateCall::on_field("median", "age")).unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(n) if n == "median"));
    }

    #[test]
    fn test_numeric_metrics() {
        for (function, expected) in [
            ("sum", MetricKind::Sum { field: "balance".to_string() }),
            ("MIN", MetricKind::Min { field: "balance".to_string() }),
            ("Max", MetricKind::Max { field: "balance".to_string() }),
            ("avg", MetricKind::Avg { field: "balance".to_string() }),
            ("stats", MetricKind::Stats { field: "balance".to_string() }),
        ] {
            let node = compile_metric(&AggregateCall::on_field(function, "balance")).unwrap();
            assert_eq!(node.kind, expected);
        }
    }

    // ========================================================================
    // Parameterised metrics
    // ========================================================================

    #[test]
    fn test_top_hits_config() {
        let mut call = AggregateCall::new("topHits", None);
        call.parameters = vec![
            ("size".to_string(), Literal::number("3")),
            ("age".to_string(), Literal::string("desc")),
            ("include".to_string(), Literal::string("firstname, age")),
        ];
        let node = compile_metric(&call).unwrap();
        assert_eq!(node.name, "TOPHITS(size=3,age=desc,include=firstname, age)");
        match node.kind {
            MetricKind::TopHits(config) => {
                assert_eq!(config.size, 3);
                assert_eq!(config.sort, vec![("age".to_string(), SortDirection::Desc)]);
                assert_eq!(config.includes, vec!["firstname", "age"]);
            }
            other => panic!("Expected top hits, got {:?}", other),
        }
    }

    #[test]
    fn test_top_hits_defaults_and_errors() {
        match compile_metric(&AggregateCall::new("tophits", None)).unwrap().kind {
            MetricKind::TopHits(config) => assert_eq!(config.size, DEFAULT_TOP_HITS_SIZE),
            other => panic!("Expected top hits, got {:?}", other),
        }

        let mut bad_size = AggregateCall::new("tophits", None);
        bad_size.parameters = vec![("size".to_string(), Literal::number("-1"))];
        assert!(compile_metric(&bad_size).is_err());

        let mut bad_direction = AggregateCall::new("tophits", None);
        bad_direction.parameters = vec![("age".to_string(), Literal::string("sideways"))];
        assert!(compile_metric(&bad_direction).is_err());
    }

    #[test]
    fn test_percentiles() {
        let mut call = AggregateCall::on_field("percentiles", "age");
        match compile_metric(&call).unwrap().kind {
            MetricKind::Percentiles(config) => assert_eq!(config.percents, DEFAULT_PERCENTS),
            other => panic!("Expected percentiles, got {:?}", other),
        }

        call.positional = vec![Literal::number("50"), Literal::number("99")];
        let node = compile_metric(&call).unwrap();
        assert_eq!(node.name, "PERCENTILES(age,50,99)");
        match node.kind {
            MetricKind::Percentiles(config) => assert_eq!(config.percents, vec![50.0, 99.0]),
            other => panic!("Expected percentiles, got {:?}", other),
        }

        call.positional = vec![Literal::number("150")];
        assert!(compile_metric(&call).is_err());
    }

    #[test]
    fn test_compile_metrics_skips_plain_items() {
        let items = vec![
            SelectItem::field("gender"),
            SelectItem::Aggregate(count_star()),
            SelectItem::Star,
        ];
        let metrics = compile_metrics(&items).unwrap();
        assert_eq!(metrics.len(), 1);
    }
}
