pub mod explain;
pub mod query;

pub use explain::run_explain;
pub use query::{run_query, OutputFormat};

use anyhow::{Context, Result};
use std::io::Read;

/// SQL from the argument, or from stdin when it is `-`
pub fn read_sql(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut sql = String::new();
    std::io::stdin()
        .read_to_string(&mut sql)
        .context("Failed to read SQL from stdin")?;
    Ok(sql)
}
