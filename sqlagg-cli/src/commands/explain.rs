use anyhow::Result;
use serde_json::json;
use sqlagg::{CompiledQuery, SqlCompiler};

/// Request path, body and output columns as JSON
pub fn render_explain(compiled: &CompiledQuery, pretty: bool) -> Result<String> {
    let columns: Vec<&str> = compiled.columns.iter().map(|c| c.name.as_str()).collect();
    let value = json!({
        "path": compiled.request.path(),
        "body": compiled.request.to_json(),
        "columns": columns,
    });
    let text = if pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    Ok(text)
}

/// Compile a query and print the request it would send
pub fn run_explain(compiler: &SqlCompiler, sql: &str, pretty: bool) -> Result<()> {
    let compiled = compiler.explain(sql)?;
    println!("{}", render_explain(&compiled, pretty)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_render_explain() {
        let compiled = SqlCompiler::default()
            .explain("SELECT gender, COUNT(*) FROM bank/account GROUP BY gender")
            .unwrap();
        let text = render_explain(&compiled, false).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["path"], "/bank/account/_search");
        assert_eq!(value["body"]["size"], 0);
        assert_eq!(value["body"]["aggs"]["gender"]["terms"]["field"], "gender");
        assert_eq!(value["columns"], json!(["gender", "COUNT(*)"]));
        assert!(!text.contains('\n'));
        assert!(render_explain(&compiled, true).unwrap().contains('\n'));
    }
}
