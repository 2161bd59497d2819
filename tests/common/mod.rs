//! Common test utilities for bq-explorer integration tests

use bq_explorer::{Config, QueryRequest, QuerySession};
use chrono::NaiveDate;
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::MockServer;

/// Path the backend serves page requests on
pub const FETCH_PATH: &str = "/api/bigquery/github/fetch/1.0";

/// Configuration pointing at `server` with a short fetch deadline
pub fn test_config(server: &MockServer) -> Config {
    Config {
        endpoint: server.uri().parse().unwrap(),
        fetch_timeout: Duration::from_secs(2),
        export_chunk_delay: Duration::ZERO,
        ..Default::default()
    }
}

/// Session talking HTTP to `server`
pub fn create_test_session(server: &MockServer) -> QuerySession {
    QuerySession::from_config(test_config(server)).unwrap()
}

/// New-query request for 2012-03-25 with 100 rows per page
pub fn new_request() -> QueryRequest {
    QueryRequest::new(NaiveDate::from_ymd_opt(2012, 3, 25).unwrap(), 100)
}

/// Successful page body with `rows` rows named `repo-<first_row + i>`
#[allow(dead_code)]
pub fn page_body(first_row: usize, rows: usize, token: Option<&str>) -> Value {
    let rows: Vec<Value> = (first_row..first_row + rows)
        .map(|i| {
            json!({
                "DateTime": "2012-03-25 10:00:00",
                "Name": format!("repo-{}", i),
                "Language": "Rust",
                "Size": i.to_string(),
                "Homepage": "",
                "Login": "octocat",
                "Owner": "octo"
            })
        })
        .collect();
    let count = rows.len();

    let mut body = json!({
        "rows": rows,
        "jobComplete": true,
        "totalRows": "1458",
        "returnedRows": count.to_string(),
        "totalBytesProcessed": "10485760"
    });
    if let Some(token) = token {
        body["pageToken"] = json!(token);
        body["jobId"] = json!("job1");
    }
    body
}
