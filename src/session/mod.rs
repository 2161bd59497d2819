//! Query session: owner of the page cache and the fetch orchestration
//!
//! The `QuerySession` struct and its methods are organized by concern:
//! - [`fetch`] - One page fetch: overlap guard, timeout race, outcome handling
//! - this module - Session state, new-query reset, continuation requests and
//!   the "current page" pointer used by the UI
//!
//! A session serves one query at a time. Starting a new query clears the
//! cache wholesale; continuations always take their pagination pair from
//! the last cached page. Failures are reported as [`UserError`]s on the
//! event channel and kept as the session's error state until cleared.

mod fetch;

use fetch::InFlightGuard;

use crate::cache::PageCache;
use crate::client::BackendClient;
use crate::config::Config;
use crate::error::{Error, Result, UserError};
use crate::request::QueryRequest;
use crate::types::Event;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;

const MSG_NO_CONTINUATION: &str =
    "Unexpected data request (no more data known to be available), please contact Support.";
const MSG_NO_CACHED_PAGE: &str = "Internal error in query session. Please contact Support";

/// Mutable UI-facing state of a session
#[derive(Debug, Default)]
struct SessionState {
    /// Page shown to the user
    current_page: usize,
    /// Request that started the cached query
    last_request: Option<QueryRequest>,
    /// Error currently displayed
    error: Option<UserError>,
}

/// Query session controller
///
/// Cloning is cheap; clones share the cache, the state and the event
/// channel. Only the session writes to the cache; readers such as the CSV
/// exporter take the shared read lock returned by [`QuerySession::cache`].
#[derive(Clone)]
pub struct QuerySession {
    config: Arc<Config>,
    client: BackendClient,
    cache: Arc<RwLock<PageCache>>,
    state: Arc<Mutex<SessionState>>,
    in_flight: Arc<AtomicBool>,
    event_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
}

impl QuerySession {
    /// Create a session fetching through `client`
    pub fn new(config: Config, client: BackendClient) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let cache = PageCache::new(config.row_limit);

        Ok(Self {
            config: Arc::new(config),
            client,
            cache: Arc::new(RwLock::new(cache)),
            state: Arc::new(Mutex::new(SessionState::default())),
            in_flight: Arc::new(AtomicBool::new(false)),
            event_tx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Create a session talking HTTP to the configured endpoint
    pub fn from_config(config: Config) -> Result<Self> {
        let client = BackendClient::from_config(&config)?;
        Self::new(config, client)
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Session configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the page cache
    pub fn cache(&self) -> Arc<RwLock<PageCache>> {
        Arc::clone(&self.cache)
    }

    /// Number of cached pages
    pub async fn page_count(&self) -> usize {
        self.cache.read().await.page_count()
    }

    /// Number of cached rows
    pub async fn row_count(&self) -> u64 {
        self.cache.read().await.row_count()
    }

    /// Whether the cache refuses further pages
    pub async fn is_over_limit(&self) -> bool {
        self.cache.read().await.is_over_limit()
    }

    /// Index of the page shown to the user
    pub fn current_page(&self) -> usize {
        self.state().current_page
    }

    /// Whether a fetch is outstanding
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Error currently displayed, if any
    pub fn error(&self) -> Option<UserError> {
        self.state().error.clone()
    }

    /// Request that started the cached query
    pub fn last_request(&self) -> Option<QueryRequest> {
        self.state().last_request.clone()
    }

    /// Clear the displayed error
    pub fn clear_error(&self) {
        let had_error = self.state().error.take().is_some();
        if had_error {
            self.emit(Event::ErrorCleared);
        }
    }

    /// Record `error` as the displayed error and broadcast it
    pub(crate) fn report_error(&self, error: UserError) {
        self.state().error = Some(error.clone());
        self.emit(Event::FetchFailed { error });
    }

    /// Report that the cache is over its row limit
    pub fn report_overlimit(&self) -> UserError {
        let error = UserError::overlimit();
        self.report_error(error.clone());
        error
    }

    /// Drop everything belonging to the previous query
    pub async fn reset_for_new_query(&self) {
        self.clear_error();
        self.cache.write().await.clear();
        {
            let mut state = self.state();
            state.last_request = None;
            state.current_page = 0;
        }
        self.emit(Event::CurrentPageChanged { index: 0 });
    }

    /// Fetch data for a new query or the next page of the cached one
    ///
    /// With `new_query` set the cache is cleared and `request` is sent as
    /// given. Otherwise the request is augmented with the last page's
    /// continuation pair; this is refused while an error is displayed and
    /// reported as overlimit when the cache is full.
    ///
    /// Returns `Ok(false)` for ordinary failures (reported on the event
    /// channel) and `Err` only for invariant violations.
    pub async fn perform_query(&self, request: &QueryRequest, new_query: bool) -> Result<bool> {
        if let Err(e) = request.validate() {
            self.report_error(UserError::from(&e));
            return Ok(false);
        }

        if !new_query && self.error().is_some() {
            tracing::info!("continuation fetch rejected while an error is displayed");
            return Ok(false);
        }

        let Some(guard) = self.try_begin_fetch() else {
            self.report_error(UserError::overlap());
            return Ok(false);
        };

        let Some(request) = self.prepare_request(&guard, request, new_query).await? else {
            return Ok(false);
        };

        self.fetch_guarded(&guard, &request, new_query).await
    }

    /// Request to send while holding `guard`
    ///
    /// A new query clears the cache. A continuation takes its pagination
    /// pair from the last cached page; `None` means the cache is over its
    /// limit, which has been reported.
    pub(crate) async fn prepare_request(
        &self,
        _guard: &InFlightGuard<'_>,
        request: &QueryRequest,
        new_query: bool,
    ) -> Result<Option<QueryRequest>> {
        if new_query {
            self.reset_for_new_query().await;
            return Ok(Some(request.clone().without_continuation()));
        }

        let cache = self.cache.read().await;
        if cache.is_over_limit() {
            drop(cache);
            self.report_overlimit();
            return Ok(None);
        }
        augment_request(&cache, request).map(Some)
    }

    /// Move the current-page pointer
    ///
    /// Moving one past the last cached page fetches the next page as a
    /// continuation of the last request when the backend offered one.
    /// Moving back clears a displayed error. Returns whether the pointer
    /// moved.
    pub async fn show_page(&self, index: usize) -> Result<bool> {
        let (page_count, has_more) = {
            let cache = self.cache.read().await;
            (
                cache.page_count(),
                cache.last_page().is_some_and(|p| p.has_more()),
            )
        };

        if index < page_count {
            let moved_back = {
                let mut state = self.state();
                let moved_back = index < state.current_page;
                state.current_page = index;
                moved_back
            };
            if moved_back {
                self.clear_error();
            }
            self.emit(Event::CurrentPageChanged { index });
            return Ok(true);
        }

        if index > page_count || page_count == 0 || !has_more || self.in_flight() {
            return Ok(false);
        }

        let Some(request) = self.last_request() else {
            return Ok(false);
        };

        if !self.perform_query(&request, false).await? {
            return Ok(false);
        }

        self.state().current_page = index;
        self.emit(Event::CurrentPageChanged { index });
        tracing::info!(page_index = index, "request for the next page completed");
        Ok(true)
    }

    /// Rows matching the query that are not cached yet
    ///
    /// Based on the first page's total row estimate; `None` when nothing is
    /// cached.
    pub async fn remaining_rows(&self) -> Option<u64> {
        let cache = self.cache.read().await;
        cache
            .page(0)
            .map(|first| first.total_row_count().saturating_sub(cache.row_count()))
    }

    /// Pages of `rows_per_page` rows still to fetch, per [`Self::remaining_rows`]
    pub async fn remaining_pages(&self, rows_per_page: u32) -> Option<u64> {
        if rows_per_page == 0 {
            return None;
        }
        self.remaining_rows()
            .await
            .map(|rows| rows.div_ceil(u64::from(rows_per_page)))
    }

    /// Abandon any outstanding fetch; later fetches fail immediately
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Build the continuation of `request` from the cache's last page
///
/// The caller must only continue a query the backend offered more data for;
/// an empty cache or a last page without a token is an invariant violation.
pub fn augment_request(cache: &PageCache, request: &QueryRequest) -> Result<QueryRequest> {
    let last_page = cache
        .last_page()
        .ok_or_else(|| Error::Internal(MSG_NO_CACHED_PAGE.to_string()))?;

    let continuation = last_page
        .continuation()
        .ok_or_else(|| Error::Internal(MSG_NO_CONTINUATION.to_string()))?;

    Ok(request.clone().with_continuation(continuation.clone()))
}
