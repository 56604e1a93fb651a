//! SQL text to [`Query`](crate::query::ast::Query)

mod sql;
pub mod tokenizer;

pub use sql::SqlParser;

use crate::error::Result;
use crate::query::ast::Query;

/// Parse a single SELECT statement
pub fn parse(sql: &str) -> Result<Query> {
    SqlParser::parse(sql)
}
