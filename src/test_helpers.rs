//! Shared test helpers: a scripted transport and session constructors.

use crate::client::{BackendClient, Transport, TransportError};
use crate::config::Config;
use crate::request::QueryRequest;
use crate::session::QuerySession;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scripted reaction of [`ScriptedTransport`]
pub(crate) enum Reply {
    /// Respond with this JSON payload
    Json(Value),
    /// Fail at the transport level
    Fail(TransportError),
    /// Respond after a delay (still honoring cancellation)
    Delayed(Duration, Value),
    /// Never respond; only cancellation ends the call
    Hang,
}

/// Transport replaying a script of replies and recording what it was sent
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Value>>,
    tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    /// Request bodies received so far
    pub(crate) fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of calls received so far
    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Cancellation tokens handed to each call
    pub(crate) fn tokens(&self) -> Vec<CancellationToken> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _path: &str,
        body: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, TransportError> {
        self.requests.lock().unwrap().push(body);
        self.tokens.lock().unwrap().push(cancel.clone());
        let reply = self.replies.lock().unwrap().pop_front();

        match reply {
            Some(Reply::Json(value)) => Ok(value),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Delayed(delay, value)) => tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(value),
            },
            Some(Reply::Hang) | None => {
                cancel.cancelled().await;
                Err(TransportError::Cancelled)
            }
        }
    }
}

/// JSON payload of a successful page with `rows` rows
///
/// Rows are named `repo-<first_row + i>` so pages can be told apart.
pub(crate) fn page_json(first_row: usize, rows: usize, token: Option<&str>) -> Value {
    let rows: Vec<Value> = (first_row..first_row + rows)
        .map(|i| {
            json!({
                "DateTime": format!("2012-03-25 00:{:02}:{:02}", (i / 60) % 60, i % 60),
                "Name": format!("repo-{}", i),
                "Language": "Rust",
                "Size": i,
                "Homepage": null,
                "Login": "octocat",
                "Owner": "octo"
            })
        })
        .collect();
    let count = rows.len();

    let mut value = json!({
        "rows": rows,
        "jobComplete": true,
        "totalRows": 1458,
        "returnedRows": count,
        "totalBytesProcessed": 10_485_760
    });
    if let Some(token) = token {
        value["pageToken"] = json!(token);
        value["jobId"] = json!("job1");
    }
    value
}

pub(crate) fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// New-query request for one day with 100 rows per page
pub(crate) fn new_request() -> QueryRequest {
    QueryRequest::new(day("2012-03-25"), 100)
}

/// Session driven by a scripted transport
pub(crate) fn create_test_session(replies: Vec<Reply>) -> (QuerySession, Arc<ScriptedTransport>) {
    create_test_session_with(Config::default(), replies)
}

/// Session with custom configuration driven by a scripted transport
pub(crate) fn create_test_session_with(
    config: Config,
    replies: Vec<Reply>,
) -> (QuerySession, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new(replies);
    let client = BackendClient::new(transport.clone(), config.fetch_path.clone());
    let session = QuerySession::new(config, client).unwrap();
    (session, transport)
}
