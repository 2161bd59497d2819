//! Auto-pagination: fetch up to N pages back to back into the session cache

use crate::error::{Error, Result, UserError};
use crate::request::QueryRequest;
use crate::session::QuerySession;
use crate::types::{Event, PaginationState};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Result of one auto-pagination run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaginationReport {
    /// How the run ended
    pub state: PaginationState,
    /// Pages added to the cache by this run
    pub pages_fetched: u32,
    /// Rows added to the cache by this run
    pub rows_fetched: u64,
    /// Progress reached, 0..=100
    pub percent: u8,
    /// Error that ended a failed run
    pub error: Option<UserError>,
}

impl PaginationReport {
    /// Status line for the user
    pub fn message(&self) -> String {
        match self.state {
            PaginationState::Finished => "Finished.".to_string(),
            PaginationState::FinishedAllData => {
                "Finished. All query data has been received.".to_string()
            }
            PaginationState::Failed => match &self.error {
                Some(error) => format!("Auto-pagination failed. {}", error),
                None => "Auto-pagination failed.".to_string(),
            },
            PaginationState::Cancelled => "Auto-pagination stopped.".to_string(),
        }
    }
}

/// Drives repeated page fetches for one session
///
/// Stopping is cooperative: [`AutoPaginator::stop`] never interrupts the
/// fetch in flight, the loop observes it before starting the next one.
pub struct AutoPaginator {
    session: QuerySession,
    stop: Mutex<CancellationToken>,
}

impl AutoPaginator {
    /// Create a paginator filling `session`'s cache
    pub fn new(session: QuerySession) -> Self {
        Self {
            session,
            stop: Mutex::new(CancellationToken::new()),
        }
    }

    /// Session this paginator fetches for
    pub fn session(&self) -> &QuerySession {
        &self.session
    }

    /// Ask the running loop to stop at the next iteration boundary
    pub fn stop(&self) {
        self.stop_token().cancel();
    }

    /// Check a requested page count
    ///
    /// `pages` must lie in `1..=max_auto_paginate_pages`. When continuing a
    /// cached query it must also not exceed the estimated remaining pages
    /// by more than one.
    pub async fn validate_page_count(
        &self,
        pages: u32,
        request: &QueryRequest,
        new_query: bool,
    ) -> Result<()> {
        let max = self.session.config().max_auto_paginate_pages;
        if pages == 0 || pages > max {
            return Err(Error::InvalidRequest {
                field: "pageCount",
                message: format!("must be between 1 and {}", max),
            });
        }

        if !new_query
            && let Some(remaining) = self.session.remaining_pages(request.row_count()).await
            && u64::from(pages) > remaining + 1
        {
            return Err(Error::InvalidRequest {
                field: "pageCount",
                message: format!("at most {} pages remain", remaining + 1),
            });
        }

        Ok(())
    }

    /// Fetch up to `pages` pages
    ///
    /// A new query clears the cache first; otherwise the run continues the
    /// cached query and refuses to start once the cache is over its limit.
    /// The loop ends early when the backend has no more data, on the first
    /// failed fetch, or when stopped.
    ///
    /// Returns `Err` for invalid request parameters, an invalid page count or
    /// a broken continuation state. Fetch failures end the run with
    /// [`PaginationState::Failed`].
    pub async fn run(
        &self,
        request: &QueryRequest,
        pages: u32,
        new_query: bool,
    ) -> Result<PaginationReport> {
        request.validate()?;
        self.validate_page_count(pages, request, new_query).await?;

        let stop = {
            let mut token = self.stop_guard();
            *token = CancellationToken::new();
            token.clone()
        };

        let mut report = PaginationReport {
            state: PaginationState::Failed,
            pages_fetched: 0,
            rows_fetched: 0,
            percent: 0,
            error: None,
        };

        tracing::info!(pages, new_query, "auto-pagination started");
        let cache = self.session.cache();
        let mut new_query = new_query;

        loop {
            if !self.fetch_next(request, new_query).await? {
                report.state = PaginationState::Failed;
                report.error = self.session.error();
                break;
            }
            new_query = false;

            let (rows, has_more) = {
                let cache = cache.read().await;
                cache
                    .last_page()
                    .map_or((0, false), |p| (p.rows().len(), p.has_more()))
            };
            report.pages_fetched += 1;
            report.rows_fetched += rows as u64;
            report.percent = progress_percent(report.pages_fetched, pages);
            self.session.emit(Event::PaginationProgress {
                percent: report.percent,
            });

            if !has_more {
                report.state = PaginationState::FinishedAllData;
                break;
            }
            if report.pages_fetched >= pages {
                report.state = PaginationState::Finished;
                break;
            }
            if stop.is_cancelled() {
                report.state = PaginationState::Cancelled;
                break;
            }
        }

        Ok(self.finish(report))
    }

    /// One fetch: a new query clears the cache, a continuation is built
    /// from the last cached page once the session is reserved
    async fn fetch_next(&self, request: &QueryRequest, new_query: bool) -> Result<bool> {
        let Some(guard) = self.session.try_begin_fetch() else {
            self.session.report_error(UserError::overlap());
            return Ok(false);
        };
        let Some(request) = self
            .session
            .prepare_request(&guard, request, new_query)
            .await?
        else {
            return Ok(false);
        };
        self.session.fetch_guarded(&guard, &request, new_query).await
    }

    fn finish(&self, report: PaginationReport) -> PaginationReport {
        tracing::info!(
            state = ?report.state,
            pages_fetched = report.pages_fetched,
            rows_fetched = report.rows_fetched,
            "auto-pagination finished"
        );
        self.session.emit(Event::PaginationFinished {
            state: report.state,
            pages_fetched: report.pages_fetched,
        });
        report
    }

    fn stop_token(&self) -> CancellationToken {
        self.stop_guard().clone()
    }

    fn stop_guard(&self) -> MutexGuard<'_, CancellationToken> {
        self.stop.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Progress after `done` of `total` pages, floored
pub fn progress_percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = u64::from(done.min(total)) * 100 / u64::from(total);
    percent as u8
}
