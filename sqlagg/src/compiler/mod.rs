//! SQL to search request compilation
//!
//! [`SqlCompiler`] is a stateless value: parse, build the aggregation tree
//! (buckets outer to inner, metrics at the innermost bucket), annotate order
//! and size, then assemble the request.

pub mod assembler;
pub mod filter;
pub mod grouping;
pub mod metrics;
pub mod order;
pub mod tree;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::query::ast::{Query, SelectItem};
use crate::query::parser::SqlParser;
use crate::request::{EsQuery, SearchRequest};
use tree::{AggNode, AggregationTree};

/// Default `terms` size, large enough to be effectively unbounded
pub const DEFAULT_BUCKET_SIZE: usize = 10_000;

/// Default hit count for plain SELECT queries
pub const DEFAULT_SEARCH_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerOptions {
    pub default_bucket_size: usize,
    pub default_search_size: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            default_bucket_size: DEFAULT_BUCKET_SIZE,
            default_search_size: DEFAULT_SEARCH_SIZE,
        }
    }
}

/// Result column of a compiled query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Display name
    pub name: String,
    /// Source field for hit columns, aggregation name otherwise
    pub field: String,
}

impl Column {
    fn same(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            field: name.clone(),
            name,
        }
    }
}

/// A compiled query: the request plus the columns a reader should expect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub request: SearchRequest,
    /// Bucket names outer to inner, then metric display names in select order.
    /// Empty for `SELECT *`, where columns come from the hits.
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Default)]
pub struct SqlCompiler {
    options: CompilerOptions,
}

impl SqlCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Parse and compile a SQL string
    pub fn explain(&self, sql: &str) -> Result<CompiledQuery> {
        let query = SqlParser::parse(sql)?;
        debug!(index = %query.source.index, aggregation = query.is_aggregation(), "Parsed query");
        self.compile(&query)
    }

    pub fn compile(&self, query: &Query) -> Result<CompiledQuery> {
        check_unique_names(&query.select)?;

        let where_query = query
            .filter
            .as_ref()
            .map(filter::compile_filter)
            .transpose()?;

        if query.is_aggregation() {
            self.compile_aggregation(query, where_query)
        } else {
            self.compile_search(query, where_query)
        }
    }

    fn compile_aggregation(
        &self,
        query: &Query,
        where_query: Option<EsQuery>,
    ) -> Result<CompiledQuery> {
        let mut buckets =
            grouping::compile_group_by(&query.group_by, self.options.default_bucket_size)?;
        let metrics = metrics::compile_metrics(&query.select)?;
        order::apply_bucket_order(query, &mut buckets, &metrics)?;

        let mut leaves: Vec<AggNode> = metrics.into_iter().map(AggNode::Metric).collect();

        if let Some(having) = &query.having {
            if buckets.is_empty() {
                return Err(Error::Unsupported("HAVING requires GROUP BY".to_string()));
            }
            let metric_nodes: Vec<_> = leaves
                .iter()
                .filter_map(|n| match n {
                    AggNode::Metric(m) => Some(m.clone()),
                    _ => None,
                })
                .collect();
            let selector = filter::compile_having(having, &query.select, &metric_nodes)?;
            if leaves.iter().any(|n| n.name() == selector.name) {
                return Err(Error::DuplicateName(selector.name));
            }
            leaves.push(AggNode::Selector(selector));
        }

        // Bucket and metric names share the result columns
        if let Some(clash) = buckets
            .iter()
            .find(|b| leaves.iter().any(|n| n.name() == b.name))
        {
            return Err(Error::DuplicateName(clash.name.clone()));
        }

        let tree = AggregationTree::nest(buckets, leaves);
        let mut columns: Vec<Column> = tree
            .bucket_chain()
            .into_iter()
            .map(|b| Column::same(&b.name))
            .collect();
        columns.extend(tree.metrics().into_iter().map(|m| Column::same(&m.name)));

        let request = assembler::assemble(&query.source, where_query, &tree)?;
        debug!(path = %request.path(), columns = columns.len(), "Compiled aggregation request");

        Ok(CompiledQuery { request, columns })
    }

    fn compile_search(
        &self,
        query: &Query,
        where_query: Option<EsQuery>,
    ) -> Result<CompiledQuery> {
        if query.having.is_some() {
            return Err(Error::Unsupported("HAVING requires GROUP BY".to_string()));
        }

        let star = query.select.iter().any(|i| matches!(i, SelectItem::Star));
        let columns: Vec<Column> = if star {
            Vec::new()
        } else {
            query
                .select
                .iter()
                .filter_map(|item| match item {
                    SelectItem::Field { name, .. } => Some(Column {
                        name: item.display_name(),
                        field: name.clone(),
                    }),
                    _ => None,
                })
                .collect()
        };

        let includes = (!star).then(|| columns.iter().map(|c| c.field.clone()).collect());
        let sort = order::hit_sort(query)?;
        let size = query.limit.unwrap_or(self.options.default_search_size);

        let request = assembler::assemble_search(&query.source, where_query, includes, sort, size);
        debug!(path = %request.path(), size, "Compiled search request");

        Ok(CompiledQuery { request, columns })
    }
}

fn check_unique_names(items: &[SelectItem]) -> Result<()> {
    let mut seen = HashSet::new();
    for item in items {
        if matches!(item, SelectItem::Star) {
            continue;
        }
        let name = item.display_name();
        if !seen.insert(name.clone()) {
            return Err(Error::DuplicateName(name));
        }
    }
    Ok(())
}
