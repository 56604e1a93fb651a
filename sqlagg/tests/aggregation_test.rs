//! End-to-end aggregation behaviour over the in-memory backend
//!
//! The fixture is 1000 bank accounts with deterministic fields so that every
//! expected count and sum can be derived by hand.

use chrono::{Days, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use sqlagg::backend::BackendError;
use sqlagg::{Error, MemoryBackend, QueryOutput, SqlClient, Table};

const DOCS: usize = 1000;
const STATES: [&str; 7] = ["TX", "CA", "NY", "WA", "IL", "OR", "MA"];

// ── Fixture ─────────────────────────────────────────────────────────────────

fn account(i: usize) -> Value {
    let created = NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .checked_add_days(Days::new((i % 90) as u64))
        .unwrap();
    json!({
        "account_number": i,
        "firstname": format!("Name{}", i),
        "gender": if i % 3 == 0 { "F" } else { "M" },
        "age": 20 + (i % 21),
        "balance": 1000 + 7 * i,
        "state": STATES[i % 7],
        "created": created.format("%Y-%m-%d").to_string(),
    })
}

fn accounts() -> Vec<Value> {
    (0..DOCS).map(account).collect()
}

fn client() -> SqlClient<MemoryBackend> {
    let backend = MemoryBackend::new()
        .with_typed_documents("bank", "account", accounts())
        .with_now(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    SqlClient::new(backend)
}

async fn table(sql: &str) -> Table {
    client().query_table(sql).await.unwrap()
}

async fn single_row(sql: &str) -> Vec<Value> {
    let table = table(sql).await;
    assert_eq!(table.rows.len(), 1, "expected one row for {}", sql);
    table.rows.into_iter().next().unwrap()
}

// ── Root metrics ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_count_star() {
    let output = client().query("SELECT COUNT(*) FROM bank/account").await.unwrap();
    let QueryOutput::Aggregations(row) = output else {
        panic!("expected aggregations");
    };
    assert_eq!(row.number("COUNT(*)"), Some(DOCS as f64));
}

#[tokio::test]
async fn test_count_alias_replaces_display_name() {
    let output = client()
        .query("SELECT COUNT(*) AS mycount FROM bank/account")
        .await
        .unwrap();
    let QueryOutput::Aggregations(row) = output else {
        panic!("expected aggregations");
    };
    assert_eq!(row.number("mycount"), Some(1000.0));
    assert!(row.get("COUNT(*)").is_none());
}

#[tokio::test]
async fn test_sum_is_exact() {
    let expected: usize = (0..DOCS).map(|i| 1000 + 7 * i).sum();
    assert_eq!(expected, 4_496_500);
    let row = single_row("SELECT SUM(balance) FROM bank/account").await;
    assert_eq!(row, vec![json!(4_496_500)]);
}

#[tokio::test]
async fn test_min_max_avg_and_distinct() {
    let row = single_row(
        "SELECT MIN(age), MAX(age), COUNT(DISTINCT age), COUNT(balance) FROM bank/account",
    )
    .await;
    assert_eq!(row, vec![json!(20), json!(40), json!(21), json!(1000)]);
}

#[tokio::test]
async fn test_where_narrows_aggregation_input() {
    let expected = accounts()
        .iter()
        .filter(|d| d["age"].as_u64().unwrap() >= 35 && d["gender"] == "F")
        .count();
    let row = single_row("SELECT COUNT(*) FROM bank/account WHERE age >= 35 AND gender = 'F'").await;
    assert_eq!(row, vec![json!(expected)]);
}

// ── Terms buckets ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_group_by_gender() {
    let table = table("SELECT gender, COUNT(*) FROM bank/account GROUP BY gender").await;
    assert_eq!(table.columns, vec!["gender", "COUNT(*)"]);
    assert_eq!(
        table.rows,
        vec![vec![json!("M"), json!(666)], vec![json!("F"), json!(334)]]
    );
}

#[tokio::test]
async fn test_order_by_alias_with_limit() {
    let table = table(
        "SELECT gender, SUM(balance) AS total FROM bank/account GROUP BY gender ORDER BY total ASC LIMIT 1",
    )
    .await;
    assert_eq!(table.rows, vec![vec![json!("F"), json!(1_501_831)]]);
}

#[tokio::test]
async fn test_order_by_group_field() {
    let table = table("SELECT state, COUNT(*) FROM bank/account GROUP BY state ORDER BY state").await;
    let states: Vec<&str> = table.rows.iter().map(|r| r[0].as_str().unwrap()).collect();
    assert_eq!(states, vec!["CA", "IL", "MA", "NY", "OR", "TX", "WA"]);
}

#[tokio::test]
async fn test_having_filters_buckets() {
    // Ages 20..=32 hold 48 accounts each, 33..=40 hold 47
    let table = table(
        "SELECT age, COUNT(*) AS c FROM bank/account GROUP BY age HAVING c > 47 ORDER BY age",
    )
    .await;
    let ages: Vec<u64> = table.rows.iter().map(|r| r[0].as_u64().unwrap()).collect();
    assert_eq!(ages, (20..=32).collect::<Vec<u64>>());
    assert!(table.rows.iter().all(|r| r[1] == json!(48)));
}

// ── Bucketing functions ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_range_buckets() {
    let table = table("SELECT COUNT(*) FROM bank/account GROUP BY range(age, 20, 25, 30, 35, 40)").await;
    assert_eq!(table.columns, vec!["range(age)", "COUNT(*)"]);
    assert_eq!(
        table.rows,
        vec![
            vec![json!("20.0-25.0"), json!(240)],
            vec![json!("25.0-30.0"), json!(240)],
            vec![json!("30.0-35.0"), json!(238)],
            vec![json!("35.0-40.0"), json!(235)],
        ]
    );
}

#[tokio::test]
async fn test_nested_terms_and_range() {
    let table = table(
        "SELECT gender, COUNT(*) FROM bank/account GROUP BY gender, range(age, 20, 30, 41)",
    )
    .await;
    assert_eq!(table.rows.len(), 4);
    let total: u64 = table.rows.iter().map(|r| r[2].as_u64().unwrap()).sum();
    assert_eq!(total, 1000);
    assert_eq!(table.rows[0][0], json!("M"));
    assert_eq!(table.rows[0][1], json!("20.0-30.0"));
}

#[tokio::test]
async fn test_histogram() {
    let table = table("SELECT COUNT(*) FROM bank/account GROUP BY histogram(age, 10)").await;
    assert_eq!(
        table.rows,
        vec![
            vec![json!(20), json!(480)],
            vec![json!(30), json!(473)],
            vec![json!(40), json!(47)],
        ]
    );
}

#[tokio::test]
async fn test_date_histogram_by_month() {
    let table = table(
        "SELECT COUNT(*) FROM bank/account GROUP BY date_histogram(field='created', interval='month', format='yyyy-MM')",
    )
    .await;
    assert_eq!(
        table.rows,
        vec![
            vec![json!("2024-01"), json!(351)],
            vec![json!("2024-02"), json!(319)],
            vec![json!("2024-03"), json!(330)],
        ]
    );
}

#[tokio::test]
async fn test_date_range_with_date_math() {
    let table = table(
        "SELECT COUNT(*) FROM bank/account GROUP BY date_range(field='created', format='yyyy-MM-dd', '2024-01-01', '2024-02-01', 'now-31d/d', 'now')",
    )
    .await;
    assert_eq!(
        table.rows,
        vec![
            vec![json!("2024-01-01-2024-02-01"), json!(351)],
            vec![json!("2024-03-01-2024-04-01"), json!(330)],
        ]
    );
}

// ── Multi-value metrics ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_top_hits_per_bucket() {
    let table = table(
        "SELECT gender, TOPHITS(size=2, age=desc, include='firstname,age') FROM bank/account GROUP BY gender",
    )
    .await;
    assert_eq!(table.rows.len(), 2);
    // Female accounts are every third one, which caps their age at 38
    for (row, oldest) in table.rows.iter().zip([40, 38]) {
        let hits = row[1].as_array().unwrap();
        assert_eq!(hits.len(), 2);
        for hit in hits {
            assert_eq!(hit["age"], json!(oldest));
            assert_eq!(hit.as_object().unwrap().len(), 2);
        }
    }
    // Stable order: the first age-40 male account is number 20
    assert_eq!(table.rows[0][1][0]["firstname"], json!("Name20"));
}

#[tokio::test]
async fn test_stats_and_percentiles() {
    let row = single_row("SELECT STATS(age), PERCENTILES(age, 50) FROM bank/account").await;
    assert_eq!(row[0]["count"], json!(1000));
    assert_eq!(row[0]["min"], json!(20));
    assert_eq!(row[0]["max"], json!(40));
    assert_eq!(row[1], json!({"50.0": 30}));
}

// ── Plain search ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plain_select_with_sort_and_limit() {
    let table = table(
        "SELECT firstname, age FROM bank/account WHERE age = 40 ORDER BY balance DESC LIMIT 3",
    )
    .await;
    assert_eq!(table.columns, vec!["firstname", "age"]);
    assert_eq!(
        table.rows,
        vec![
            vec![json!("Name986"), json!(40)],
            vec![json!("Name965"), json!(40)],
            vec![json!("Name944"), json!(40)],
        ]
    );
}

#[tokio::test]
async fn test_select_star_uses_source_columns() {
    let table = table("SELECT * FROM bank WHERE account_number = 7").await;
    assert_eq!(
        table.columns,
        vec!["account_number", "age", "balance", "created", "firstname", "gender", "state"]
    );
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0][4], json!("Name7"));
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_index() {
    let err = client().query("SELECT COUNT(*) FROM missing").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Backend(BackendError::IndexNotFound(name)) if name == "missing"
    ));
}

#[tokio::test]
async fn test_unresolved_order_target() {
    let err = client()
        .query("SELECT gender, COUNT(*) FROM bank GROUP BY gender ORDER BY nope DESC")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnresolvedOrderTarget(_)));
}
