//! Core types for bq-explorer

use crate::error::UserError;
use serde::{Deserialize, Deserializer, Serialize};

/// Column names of a result row, in CSV order
pub const COLUMNS: [&str; 7] = [
    "DateTime", "Name", "Language", "Size", "Homepage", "Login", "Owner",
];

/// One record of the GitHub activity dataset
///
/// Every column may be missing in a response; missing values render as an
/// empty string on export.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Row {
    /// Event timestamp, truncated to seconds
    #[serde(default)]
    pub date_time: Option<String>,
    /// Repository name
    #[serde(default)]
    pub name: Option<String>,
    /// Repository language
    #[serde(default)]
    pub language: Option<String>,
    /// Repository size (sent as a number or a string)
    #[serde(default, deserialize_with = "lenient_string")]
    pub size: Option<String>,
    /// Repository homepage
    #[serde(default)]
    pub homepage: Option<String>,
    /// Actor login
    #[serde(default)]
    pub login: Option<String>,
    /// Repository owner
    #[serde(default)]
    pub owner: Option<String>,
}

impl Row {
    /// Column values in [`COLUMNS`] order, missing values as ""
    pub fn fields(&self) -> [&str; 7] {
        [
            self.date_time.as_deref().unwrap_or(""),
            self.name.as_deref().unwrap_or(""),
            self.language.as_deref().unwrap_or(""),
            self.size.as_deref().unwrap_or(""),
            self.homepage.as_deref().unwrap_or(""),
            self.login.as_deref().unwrap_or(""),
            self.owner.as_deref().unwrap_or(""),
        ]
    }
}

/// Opaque pair of identifiers letting the backend resume a paused query
///
/// The values are passed through untouched; the pair is only ever taken
/// from the most recently cached page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    /// Backend job handle
    pub job_id: String,
    /// Page token issued with the last page
    pub page_token: String,
}

/// A successful backend response as decoded from the wire
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Records of this page, deduplicated by the backend
    pub rows: Vec<Row>,
    /// Whether the backend job finished
    pub job_complete: bool,
    /// Backend estimate of all matching rows
    #[serde(deserialize_with = "lenient_u64")]
    pub total_rows: u64,
    /// Rows returned before client-side trimming
    #[serde(deserialize_with = "lenient_u64")]
    pub returned_rows: u64,
    /// Bytes scanned by the backend
    #[serde(deserialize_with = "lenient_u64")]
    pub total_bytes_processed: u64,
    /// Present when more data is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    /// Paired with `page_token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl QueryResult {
    /// The continuation pair carried by this result
    ///
    /// Empty strings count as absent. Returns `Err` with a description when
    /// only one half of the pair is present.
    pub fn continuation(&self) -> std::result::Result<Option<Continuation>, String> {
        let token = self.page_token.as_deref().filter(|s| !s.is_empty());
        let job = self.job_id.as_deref().filter(|s| !s.is_empty());

        match (job, token) {
            (Some(job_id), Some(page_token)) => Ok(Some(Continuation {
                job_id: job_id.to_string(),
                page_token: page_token.to_string(),
            })),
            (None, None) => Ok(None),
            (job, token) => Err(format!(
                "inconsistent pagination data: jobId {}, pageToken {}",
                if job.is_some() { "present" } else { "absent" },
                if token.is_some() { "present" } else { "absent" },
            )),
        }
    }
}

/// One fetched unit of query results held in the page cache
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub(crate) index: usize,
    pub(crate) rows: Vec<Row>,
    pub(crate) returned_row_count: u64,
    pub(crate) total_row_count: u64,
    pub(crate) continuation: Option<Continuation>,
}

impl Page {
    /// Zero-based position among the pages of the current query
    pub fn index(&self) -> usize {
        self.index
    }

    /// Records of this page
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Row count the backend reported for this page (display only)
    pub fn returned_row_count(&self) -> u64 {
        self.returned_row_count
    }

    /// Backend estimate of rows matching the whole query
    pub fn total_row_count(&self) -> u64 {
        self.total_row_count
    }

    /// Continuation pair, present iff more pages are known to exist
    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    /// Opaque page token
    pub fn page_token(&self) -> Option<&str> {
        self.continuation.as_ref().map(|c| c.page_token.as_str())
    }

    /// Opaque job handle
    pub fn job_id(&self) -> Option<&str> {
        self.continuation.as_ref().map(|c| c.job_id.as_str())
    }

    /// Whether the backend offered another page after this one
    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}

/// Classified result of one fetch attempt
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    /// Well-formed result
    Success(QueryResult),
    /// No response before the deadline
    Timeout,
    /// Recognized failure payload (or transport failure), message as received
    ServerError(String),
    /// Unrecognized payload; detail for support
    ProtocolError(String),
}

/// How an auto-pagination run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationState {
    /// All requested pages were fetched and more data remains
    Finished,
    /// The backend has no more data for this query
    FinishedAllData,
    /// A fetch failed
    Failed,
    /// Stopped by the user at an iteration boundary
    Cancelled,
}

/// Event emitted by a query session
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A page request was sent
    FetchStarted {
        /// Whether the request starts a new query
        new_query: bool,
    },

    /// A page was added to the cache
    PageFetched {
        /// Index of the new page
        index: usize,
        /// Rows in the new page
        rows: usize,
        /// Backend estimate of all matching rows
        total_rows: u64,
    },

    /// A fetch failed; the error is the session's current error state
    FetchFailed {
        /// What to show the user
        error: UserError,
    },

    /// The displayed error was cleared
    ErrorCleared,

    /// The page shown to the user changed
    CurrentPageChanged {
        /// New current page index
        index: usize,
    },

    /// Auto-pagination progress
    PaginationProgress {
        /// Percentage of requested pages fetched (0 to 100)
        percent: u8,
    },

    /// Auto-pagination ended
    PaginationFinished {
        /// Terminal state
        state: PaginationState,
        /// Pages fetched in this run
        pages_fetched: u32,
    },

    /// CSV export progress
    ExportProgress {
        /// Percentage of pages written (0 to 100)
        percent: u8,
    },
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
