//! Single page fetch: overlap guard, timeout race and outcome handling.

use super::{MSG_NO_CONTINUATION, QuerySession};
use crate::error::{Error, MSG_CACHE_REFUSED, Result, UserError};
use crate::request::QueryRequest;
use crate::types::{Event, FetchOutcome};
use std::sync::atomic::{AtomicBool, Ordering};

const MSG_INCOMPLETE_JOB: &str =
    "Cannot cache response data (incomplete job). Please contact Support.";

/// Marks the session as having a fetch in flight until dropped
///
/// Dropping the guard, including when the fetching future itself is
/// dropped, re-opens the session for the next fetch.
pub(crate) struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl QuerySession {
    /// Fetch one page and add it to the cache
    ///
    /// Returns `Ok(true)` when a page was cached. On failure the cache is
    /// left untouched, the reason is recorded as the session error and
    /// broadcast as [`Event::FetchFailed`], and `Ok(false)` is returned. A
    /// call made while another fetch is in flight is rejected without any
    /// network call.
    ///
    /// Unless `new_query` is set, `request` must carry exactly the
    /// continuation pair of the last cached page; anything else is an
    /// [`Error::Internal`] and nothing is sent.
    pub async fn fetch_one_page(&self, request: &QueryRequest, new_query: bool) -> Result<bool> {
        let Some(guard) = self.try_begin_fetch() else {
            self.report_error(UserError::overlap());
            return Ok(false);
        };
        self.fetch_guarded(&guard, request, new_query).await
    }

    pub(crate) fn try_begin_fetch(&self) -> Option<InFlightGuard<'_>> {
        InFlightGuard::acquire(&self.in_flight)
    }

    pub(crate) async fn fetch_guarded(
        &self,
        _guard: &InFlightGuard<'_>,
        request: &QueryRequest,
        new_query: bool,
    ) -> Result<bool> {
        if let Err(e) = request.validate() {
            self.report_error(UserError::from(&e));
            return Ok(false);
        }

        if !new_query {
            let cache = self.cache.read().await;
            let expected = cache.last_page().and_then(|p| p.continuation());
            if expected.is_none() || request.continuation() != expected {
                tracing::error!(
                    cached_pages = cache.page_count(),
                    "continuation does not match the last cached page"
                );
                return Err(Error::Internal(MSG_NO_CONTINUATION.to_string()));
            }
        }

        self.emit(Event::FetchStarted { new_query });

        let timeout = self.config.fetch_timeout;
        let cancel = self.shutdown.child_token();

        // Whichever settles first wins; the losing call is dropped, so a late
        // response can never reach the cache.
        let outcome = tokio::select! {
            result = self.client.fetch_page(request, &cancel) => result,
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                tracing::warn!(timeout_secs = timeout.as_secs_f64(), "page request timed out");
                Ok(FetchOutcome::Timeout)
            }
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => {
                tracing::info!("page request abandoned, session shutting down");
                return Ok(false);
            }
            Err(e) => {
                self.report_error(UserError::from(&e));
                return Ok(false);
            }
        };

        match outcome {
            FetchOutcome::Success(result) => {
                self.clear_error();

                if !result.job_complete {
                    self.report_error(UserError::internal(MSG_INCOMPLETE_JOB));
                    return Ok(false);
                }

                let rows = result.rows.len();
                let total_rows = result.total_rows;
                let index = {
                    let mut cache = self.cache.write().await;
                    if !cache.add_page(result) {
                        drop(cache);
                        self.report_error(UserError::internal(MSG_CACHE_REFUSED));
                        return Ok(false);
                    }
                    cache.page_count() - 1
                };

                if new_query {
                    {
                        let mut state = self.state();
                        state.current_page = index;
                        state.last_request = Some(request.clone().without_continuation());
                    }
                    self.emit(Event::CurrentPageChanged { index });
                }

                tracing::info!(
                    page_index = index,
                    rows,
                    total_rows,
                    new_query,
                    "page fetched"
                );
                self.emit(Event::PageFetched {
                    index,
                    rows,
                    total_rows,
                });
                Ok(true)
            }
            FetchOutcome::Timeout => {
                self.report_error(UserError::timeout());
                Ok(false)
            }
            FetchOutcome::ServerError(message) => {
                self.report_error(UserError::server(message));
                Ok(false)
            }
            FetchOutcome::ProtocolError(detail) => {
                self.report_error(UserError::protocol(detail));
                Ok(false)
            }
        }
    }
}
