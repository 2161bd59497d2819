//! Backend API client
//!
//! Calls the proxy endpoint exposed by the backend, never BigQuery itself, so
//! the client holds no cloud credentials. One call is made per page request;
//! there are no retries at this layer.
//!
//! The network is reached through the [`Transport`] trait so the session can
//! run against [`HttpTransport`] in production and scripted transports in
//! tests. Responses are decoded once, here, into a [`FetchOutcome`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::request::QueryRequest;
use crate::types::{FetchOutcome, QueryResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fields every successful response must carry
pub const REQUIRED_RESULT_FIELDS: [&str; 5] = [
    "rows",
    "jobComplete",
    "totalRows",
    "returnedRows",
    "totalBytesProcessed",
];

/// Failure of the transport itself, before any payload could be classified
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failure, DNS failure, reset and the like
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status with a body that is not JSON
    #[error("backend returned HTTP status {status}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Success status with a body that is not JSON
    #[error("response body is not valid JSON: {0}")]
    InvalidBody(String),

    /// The cancellation token fired before the call completed
    #[error("request cancelled")]
    Cancelled,
}

/// Sends one JSON POST to the backend
///
/// Implementations must give up promptly once `cancel` fires and return
/// [`TransportError::Cancelled`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `path` and return the decoded JSON response
    async fn send(
        &self,
        path: &str,
        body: Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, TransportError>;
}

/// [`Transport`] over HTTP using reqwest
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Create a transport sending requests relative to `endpoint`
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, endpoint })
    }
}

const MAX_ERROR_BODY_LEN: usize = 512;

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        path: &str,
        body: Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, TransportError> {
        let url = self
            .endpoint
            .join(path)
            .map_err(|e| TransportError::Network(format!("invalid URL for '{}': {}", path, e)))?;

        let send = self.client.post(url.clone()).json(&body).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = send => result.map_err(|e| {
                if e.is_connect() {
                    TransportError::Network(format!("connection failed for '{}': {}", url, e))
                } else {
                    TransportError::Network(format!("request to '{}' failed: {}", url, e))
                }
            })?,
        };

        let status = response.status();
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = response.text() => result.map_err(|e| {
                TransportError::Network(format!("failed to read response body: {}", e))
            })?,
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Ok(value),
            Err(e) if status.is_success() => Err(TransportError::InvalidBody(e.to_string())),
            Err(_) => {
                let mut body = text;
                if body.len() > MAX_ERROR_BODY_LEN {
                    let mut cut = MAX_ERROR_BODY_LEN;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                Err(TransportError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

/// Performs one page request and classifies the response
#[derive(Clone)]
pub struct BackendClient {
    transport: Arc<dyn Transport>,
    path: String,
}

impl BackendClient {
    /// Create a client posting to `path` through `transport`
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }

    /// Create an HTTP client for the configured endpoint
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config.endpoint.clone())?;
        Ok(Self::new(Arc::new(transport), config.fetch_path.clone()))
    }

    /// Fetch one page
    ///
    /// Invalid request parameters are returned as [`Error::InvalidRequest`]
    /// without any network call. If `cancel` fires first the call is
    /// abandoned and [`Error::Cancelled`] is returned; deciding whether that
    /// was a timeout is up to the caller.
    pub async fn fetch_page(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        let body = serde_json::to_value(request.to_wire()?)?;

        tracing::debug!(
            path = %self.path,
            continuation = request.is_continuation(),
            row_count = request.row_count(),
            "sending page request"
        );

        match self.transport.send(&self.path, body, cancel).await {
            Ok(value) => Ok(classify_response(value)),
            Err(TransportError::Cancelled) => Err(Error::Cancelled),
            Err(TransportError::Network(message)) => {
                tracing::warn!(error = %message, "backend unreachable");
                Ok(FetchOutcome::ServerError(format!(
                    "Could not reach the backend. Please retry later. ({})",
                    message
                )))
            }
            Err(TransportError::Status { status, body }) => {
                tracing::warn!(status, body = %body, "backend returned non-JSON error");
                Ok(FetchOutcome::ServerError(format!(
                    "Backend request failed with HTTP status {}",
                    status
                )))
            }
            Err(e @ TransportError::InvalidBody(_)) => {
                Ok(FetchOutcome::ProtocolError(e.to_string()))
            }
        }
    }
}

/// Classify a decoded JSON response
///
/// A payload carrying all of [`REQUIRED_RESULT_FIELDS`] is a result; a JSON
/// string, `{"message": ...}` or `{"error": {"message": ...}}` is a backend
/// error; anything else is a protocol error.
pub fn classify_response(value: Value) -> FetchOutcome {
    let is_result = value
        .as_object()
        .is_some_and(|obj| REQUIRED_RESULT_FIELDS.iter().all(|f| obj.contains_key(*f)));

    if is_result {
        return match serde_json::from_value::<QueryResult>(value) {
            Ok(result) => match result.continuation() {
                Ok(_) => FetchOutcome::Success(result),
                Err(reason) => FetchOutcome::ProtocolError(reason),
            },
            Err(e) => FetchOutcome::ProtocolError(format!("malformed result: {}", e)),
        };
    }

    if let Some(message) = error_message(&value) {
        return FetchOutcome::ServerError(message);
    }

    FetchOutcome::ProtocolError(describe_payload(&value))
}

fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => match (obj.get("message"), obj.get("error")) {
            (Some(Value::String(msg)), _) => Some(msg.clone()),
            (_, Some(Value::Object(inner))) => inner
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            (_, Some(Value::String(msg))) => Some(msg.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn describe_payload(value: &Value) -> String {
    match value {
        Value::Object(obj) => format!(
            "Details: {}",
            obj.iter()
                .map(|(k, v)| {
                    if v.is_null() {
                        format!("{}: no data", k)
                    } else {
                        format!("{}: {}", k, v)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        ),
        other => format!("Details: unexpected {} payload", json_type(other)),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
