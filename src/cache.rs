//! In-memory store of fetched result pages
//!
//! The cache holds the pages of exactly one query in fetch order. The only
//! form of backpressure is a row ceiling: once the accumulated row count is
//! over it, new pages are refused. Nothing is ever evicted; pages leave the
//! cache only when it is cleared for a new query.

use crate::types::{Page, QueryResult};

/// Ordered pages of the active query
#[derive(Debug)]
pub struct PageCache {
    pages: Vec<Page>,
    row_count: u64,
    row_limit: u64,
    generation: u64,
}

impl PageCache {
    /// Create an empty cache refusing pages once `row_limit` is exceeded
    pub fn new(row_limit: u64) -> Self {
        Self {
            pages: Vec::new(),
            row_count: 0,
            row_limit,
            generation: 0,
        }
    }

    /// Append a fetched result as the next page
    ///
    /// Returns `false` without touching the cache when the backend job is
    /// incomplete, when the continuation pair is one-sided, or when the cache
    /// is already over its limit. The limit is checked against the state
    /// before the append, so the page that crosses the ceiling is admitted
    /// and every page after it is refused.
    pub fn add_page(&mut self, result: QueryResult) -> bool {
        if !result.job_complete {
            tracing::warn!("refusing to cache result of incomplete backend job");
            return false;
        }

        if self.is_over_limit() {
            tracing::warn!(
                rows = self.row_count,
                limit = self.row_limit,
                "page cache is over its row limit"
            );
            return false;
        }

        let continuation = match result.continuation() {
            Ok(continuation) => continuation,
            Err(reason) => {
                tracing::warn!(%reason, "refusing to cache page");
                return false;
            }
        };

        let index = self.pages.len();
        let rows = result.rows.len() as u64;
        self.pages.push(Page {
            index,
            rows: result.rows,
            returned_row_count: result.returned_rows,
            total_row_count: result.total_rows,
            continuation,
        });
        self.row_count += rows;

        tracing::debug!(
            page_index = index,
            rows = rows,
            total_cached = self.row_count,
            "page cached"
        );
        true
    }

    /// Page at position `index`
    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    /// Most recently appended page
    pub fn last_page(&self) -> Option<&Page> {
        self.pages.last()
    }

    /// All pages in fetch order
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Number of cached pages
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of cached rows across all pages
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Configured row ceiling
    pub fn row_limit(&self) -> u64 {
        self.row_limit
    }

    /// Whether the cached rows exceed the ceiling
    pub fn is_over_limit(&self) -> bool {
        self.row_count > self.row_limit
    }

    /// Whether the cache holds no pages
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Query generation, bumped by every [`PageCache::clear`]
    ///
    /// Readers that release the lock between pages compare it to detect that
    /// a new query replaced the pages they were reading.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop every page; used only when a new query starts
    pub fn clear(&mut self) {
        self.pages.clear();
        self.row_count = 0;
        self.generation += 1;
    }
}
