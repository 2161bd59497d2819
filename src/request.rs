//! Query request construction, validation and wire serialization
//!
//! A [`QueryRequest`] describes either a brand-new query or the continuation
//! of a cached one. Parameters are validated on the client before any
//! network call so a malformed request never reaches the backend.

use crate::error::{Error, Result};
use crate::types::Continuation;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Largest page size the backend accepts
pub const MAX_ROW_COUNT: u32 = 2000;

/// Longest query timeframe in days
pub const MAX_QUERY_DAYS: i64 = 7;

/// Extra day accepted on top of [`MAX_QUERY_DAYS`]
const QUERY_DAYS_GRACE: i64 = 1;

const MSG_INCONSISTENT_PAGINATION: &str =
    "Inconsistent pagination data, please contact Support.";

/// Parameters of one page request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    row_count: u32,
    name: Option<String>,
    language: Option<String>,
    continuation: Option<Continuation>,
}

impl QueryRequest {
    /// Request `row_count` rows per page for a single day
    pub fn new(start_date: NaiveDate, row_count: u32) -> Self {
        Self {
            start_date,
            end_date: None,
            row_count,
            name: None,
            language: None,
            continuation: None,
        }
    }

    /// Set the last day of the timeframe (defaults to the start day)
    #[must_use]
    pub fn with_end_date(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Filter by repository name prefix; blank values clear the filter
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = non_blank(name.into());
        self
    }

    /// Filter by repository language prefix; blank values clear the filter
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = non_blank(language.into());
        self
    }

    /// Turn this request into a continuation of the given backend job
    #[must_use]
    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = Some(continuation);
        self
    }

    /// Set the continuation pair from loose values
    ///
    /// Both values or neither must be given. A one-sided pair is a
    /// programming error and yields [`Error::Internal`].
    pub fn with_pagination(
        mut self,
        job_id: Option<String>,
        page_token: Option<String>,
    ) -> Result<Self> {
        let job_id = job_id.filter(|s| !s.is_empty());
        let page_token = page_token.filter(|s| !s.is_empty());

        self.continuation = match (job_id, page_token) {
            (Some(job_id), Some(page_token)) => Some(Continuation { job_id, page_token }),
            (None, None) => None,
            _ => return Err(Error::Internal(MSG_INCONSISTENT_PAGINATION.to_string())),
        };
        Ok(self)
    }

    /// Drop the continuation pair, turning this back into a new-query request
    #[must_use]
    pub fn without_continuation(mut self) -> Self {
        self.continuation = None;
        self
    }

    /// First day of the timeframe
    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Last day of the timeframe
    pub fn end_date(&self) -> NaiveDate {
        self.end_date.unwrap_or(self.start_date)
    }

    /// Rows per page
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Repository name prefix
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Repository language prefix
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Continuation pair, if this request resumes a query
    pub fn continuation(&self) -> Option<&Continuation> {
        self.continuation.as_ref()
    }

    /// Whether this request resumes a query
    pub fn is_continuation(&self) -> bool {
        self.continuation.is_some()
    }

    /// Check every parameter, naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.row_count == 0 || self.row_count > MAX_ROW_COUNT {
            return Err(invalid(
                "rowCount",
                format!("must be between 1 and {}", MAX_ROW_COUNT),
            ));
        }

        let end_date = self.end_date();
        if end_date < self.start_date {
            return Err(invalid("endDate", "must not precede startDate"));
        }
        if (end_date - self.start_date).num_days() > MAX_QUERY_DAYS + QUERY_DAYS_GRACE {
            return Err(invalid(
                "endDate",
                format!("query timeframe cannot exceed {} days", MAX_QUERY_DAYS),
            ));
        }

        if let Some(name) = &self.name
            && !name_pattern().is_match(name)
        {
            return Err(invalid(
                "name",
                "must be 1 to 32 letters, digits, '_', '.' or '-'",
            ));
        }

        if let Some(language) = &self.language
            && !language_pattern().is_match(language)
        {
            return Err(invalid(
                "language",
                "must be 1 to 64 letters, digits, '_', '.' or '+'",
            ));
        }

        Ok(())
    }

    /// Validate and convert to the JSON body sent to the backend
    pub fn to_wire(&self) -> Result<WireRequest> {
        self.validate()?;

        Ok(WireRequest {
            start_date: self.start_date.and_time(NaiveTime::MIN).and_utc(),
            end_date: end_of_day(self.end_date()),
            row_count: self.row_count,
            name: self.name.clone(),
            language: self.language.clone(),
            job_id: self.continuation.as_ref().map(|c| c.job_id.clone()),
            page_token: self.continuation.as_ref().map(|c| c.page_token.clone()),
        })
    }
}

/// JSON body of a fetch request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    /// Start of the first day, UTC
    pub start_date: DateTime<Utc>,
    /// End of the last day, UTC
    pub end_date: DateTime<Utc>,
    /// Rows per page
    pub row_count: u32,
    /// Repository name prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Repository language prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Opaque job handle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Opaque page token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last_milli = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
    date.and_time(last_milli).and_utc()
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> Error {
    Error::InvalidRequest {
        field,
        message: message.into(),
    }
}

#[allow(clippy::expect_used)]
fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.-]{1,32}$").expect("name pattern is valid")
    })
}

#[allow(clippy::expect_used)]
fn language_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.+]{1,64}$").expect("language pattern is valid")
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn field_of(result: Result<()>) -> &'static str {
        match result {
            Err(Error::InvalidRequest { field, .. }) => field,
            other => panic!("expected invalid request, got {:?}", other),
        }
    }

    #[test]
    fn end_date_defaults_to_start_date() {
        let req = QueryRequest::new(day("2012-03-25"), 100);
        assert_eq!(req.end_date(), day("2012-03-25"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_row_counts() {
        for count in [0, 2001, 1_000_000] {
            let req = QueryRequest::new(day("2012-03-25"), count);
            assert_eq!(field_of(req.validate()), "rowCount", "count {}", count);
        }
        assert!(QueryRequest::new(day("2012-03-25"), 2000).validate().is_ok());
    }

    #[test]
    fn rejects_end_date_before_start_date() {
        let req = QueryRequest::new(day("2012-03-25"), 10).with_end_date(day("2012-03-24"));
        assert_eq!(field_of(req.validate()), "endDate");
    }

    #[test]
    fn timeframe_allows_one_day_grace() {
        let start = day("2012-03-01");
        let ok = QueryRequest::new(start, 10).with_end_date(day("2012-03-09"));
        assert!(ok.validate().is_ok());

        let too_long = QueryRequest::new(start, 10).with_end_date(day("2012-03-10"));
        assert_eq!(field_of(too_long.validate()), "endDate");
    }

    #[test]
    fn validates_name_and_language_patterns() {
        let base = QueryRequest::new(day("2012-03-25"), 10);
        assert!(base.clone().with_name("ruby-on.rails_1").validate().is_ok());
        assert!(base.clone().with_language("C++").validate().is_ok());

        let bad_name = base.clone().with_name("has space");
        assert_eq!(field_of(bad_name.validate()), "name");

        let long_name = base.clone().with_name("a".repeat(33));
        assert_eq!(field_of(long_name.validate()), "name");

        let bad_language = base.clone().with_language("C#");
        assert_eq!(field_of(bad_language.validate()), "language");
    }

    #[test]
    fn non_ascii_letters_are_rejected() {
        let base = QueryRequest::new(day("2012-03-25"), 10);

        let name = base.clone().with_name("名前");
        assert_eq!(field_of(name.validate()), "name");

        let language = base.clone().with_language("Élixir");
        assert_eq!(field_of(language.validate()), "language");
    }

    #[test]
    fn blank_filters_are_absent() {
        let req = QueryRequest::new(day("2012-03-25"), 10)
            .with_name("   ")
            .with_language("");
        assert_eq!(req.name(), None);
        assert_eq!(req.language(), None);
    }

    #[test]
    fn one_sided_pagination_pair_is_internal_error() {
        let base = QueryRequest::new(day("2012-03-25"), 10);
        let result = base
            .clone()
            .with_pagination(Some("job1".into()), None);
        assert!(matches!(result, Err(Error::Internal(msg)) if msg.contains("Inconsistent")));

        let ok = base
            .with_pagination(Some("job1".into()), Some("tok1".into()))
            .unwrap();
        assert!(ok.is_continuation());
    }

    #[test]
    fn wire_body_omits_absent_optionals() {
        let req = QueryRequest::new(day("2012-03-25"), 100);
        let body = serde_json::to_value(req.to_wire().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({
                "startDate": "2012-03-25T00:00:00Z",
                "endDate": "2012-03-25T23:59:59.999Z",
                "rowCount": 100
            })
        );
    }

    #[test]
    fn wire_body_carries_continuation_pair() {
        let req = QueryRequest::new(day("2012-03-25"), 100)
            .with_name("linux")
            .with_continuation(Continuation {
                job_id: "job1".into(),
                page_token: "tok1".into(),
            });
        let body = serde_json::to_value(req.to_wire().unwrap()).unwrap();
        assert_eq!(body["name"], "linux");
        assert_eq!(body["jobId"], "job1");
        assert_eq!(body["pageToken"], "tok1");
        assert!(body.get("language").is_none());
    }

    #[test]
    fn to_wire_validates_first() {
        let req = QueryRequest::new(day("2012-03-25"), 0);
        assert!(matches!(
            req.to_wire(),
            Err(Error::InvalidRequest { field: "rowCount", .. })
        ));
    }
}
