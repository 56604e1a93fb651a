use anyhow::Result;
use clap::ValueEnum;
use sqlagg::{ExecutionBackend, SqlClient, Table};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table
    Table,
    /// JSON array with one object per row
    Json,
}

pub fn render_table(table: &Table, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table.render()),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&table.to_json())? + "\n"),
    }
}

/// Run a query and print the flattened result
pub async fn run_query<B: ExecutionBackend>(
    client: &SqlClient<B>,
    sql: &str,
    format: OutputFormat,
) -> Result<()> {
    let start = Instant::now();
    let table = client.query_table(sql).await?;
    tracing::debug!(
        rows = table.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Query finished"
    );
    print!("{}", render_table(&table, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use sqlagg::MemoryBackend;

    fn client() -> SqlClient<MemoryBackend> {
        SqlClient::new(MemoryBackend::new().with_documents(
            "bank",
            vec![
                json!({"gender": "M", "age": 30}),
                json!({"gender": "F", "age": 40}),
                json!({"gender": "M", "age": 50}),
            ],
        ))
    }

    #[tokio::test]
    async fn test_render_json_rows() {
        let table = client()
            .query_table("SELECT gender, MAX(age) AS oldest FROM bank GROUP BY gender")
            .await
            .unwrap();
        let text = render_table(&table, OutputFormat::Json).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!([{"gender": "M", "oldest": 50}, {"gender": "F", "oldest": 40}])
        );
    }

    #[tokio::test]
    async fn test_render_text_table() {
        let table = client()
            .query_table("SELECT COUNT(*) FROM bank")
            .await
            .unwrap();
        let text = render_table(&table, OutputFormat::Table).unwrap();
        assert!(text.starts_with("COUNT(*)"));
        assert!(text.ends_with("(1 rows)\n"));
    }
}
