//! Tabular view of query results

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::{Map, Value};

use super::{number_json, Hits};
use crate::compiler::Column;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let obj: Map<String, Value> = self
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect();
                    Value::Object(obj)
                })
                .collect(),
        )
    }

    /// Plain-text rendering with aligned columns
    pub fn render(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let line = |values: &[String]| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = String::new();
        out.push_str(&line(&self.columns));
        out.push('\n');
        out.push_str(
            &widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        out.push('\n');
        for row in &cells {
            out.push_str(&line(row));
            out.push('\n');
        }
        out.push_str(&format!("({} rows)\n", self.rows.len()));
        out
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Hit rows; without explicit columns every top-level source key is a column
pub(super) fn from_hits(hits: &Hits, columns: &[Column]) -> Table {
    let columns: Vec<Column> = if columns.is_empty() {
        let keys: BTreeSet<&String> = hits
            .rows
            .iter()
            .filter_map(Value::as_object)
            .flat_map(|obj| obj.keys())
            .collect();
        keys.into_iter()
            .map(|k| Column {
                name: k.clone(),
                field: k.clone(),
            })
            .collect()
    } else {
        columns.to_vec()
    };

    let rows = hits
        .rows
        .iter()
        .map(|source| {
            columns
                .iter()
                .map(|c| lookup(source, &c.field).map(normalize).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Table {
        columns: columns.into_iter().map(|c| c.name).collect(),
        rows,
    }
}

/// Field of a `_source` object; dotted paths descend into objects
fn lookup(source: &Value, path: &str) -> Option<Value> {
    if let Some(direct) = source.get(path) {
        return Some(direct.clone());
    }
    let mut current = source;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => n.as_f64().map(number_json).unwrap_or(Value::Number(n)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn column(name: &str, field: &str) -> Column {
        Column {
            name: name.to_string(),
            field: field.to_string(),
        }
    }

    #[test]
    fn test_hits_with_aliases_and_nested_fields() {
        let hits = Hits {
            total: 1,
            rows: vec![json!({"firstname": "Amber", "address": {"city": "Brogan"}, "balance": 10.0})],
        };
        let table = from_hits(
            &hits,
            &[
                column("name", "firstname"),
                column("address.city", "address.city"),
                column("balance", "balance"),
            ],
        );
        assert_eq!(table.columns, vec!["name", "address.city", "balance"]);
        assert_eq!(table.rows, vec![vec![json!("Amber"), json!("Brogan"), json!(10)]]);
    }

    #[test]
    fn test_star_columns_are_sorted_union() {
        let hits = Hits {
            total: 2,
            rows: vec![json!({"b": 1, "a": 2}), json!({"c": 3})],
        };
        let table = from_hits(&hits, &[]);
        assert_eq!(table.columns, vec!["a", "b", "c"]);
        assert_eq!(table.rows[1], vec![Value::Null, Value::Null, json!(3)]);
    }

    #[test]
    fn test_render_and_json() {
        let table = Table {
            columns: vec!["gender".to_string(), "COUNT(*)".to_string()],
            rows: vec![vec![json!("M"), json!(507)], vec![json!("F"), Value::Null]],
        };
        assert_eq!(
            table.render(),
            "gender | COUNT(*)\n-------+---------\nM      | 507\nF      |\n(2 rows)\n"
        );
        assert_eq!(
            table.to_json(),
            json!([{"gender": "M", "COUNT(*)": 507}, {"gender": "F", "COUNT(*)": null}])
        );
    }
}
