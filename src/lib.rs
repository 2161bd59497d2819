//! # bq-explorer
//!
//! Client-side query core for exploring a large public dataset of
//! repository activity through a paginating backend service.
//!
//! ## Design Philosophy
//!
//! bq-explorer is designed to be:
//! - **Library-first** - No UI, purely the query/cache/export core a UI embeds
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Bounded** - One fetch in flight per session, a fixed fetch deadline
//!   and a row ceiling on the cache
//!
//! ## Quick Start
//!
//! ```no_run
//! use bq_explorer::{AutoPaginator, Config, CsvExporter, FileSink, QueryRequest, QuerySession};
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         endpoint: "https://explorer.example.com".parse()?,
//!         ..Default::default()
//!     };
//!     let quota = config.export_quota_bytes;
//!     let session = QuerySession::from_config(config)?;
//!
//!     // Subscribe to events
//!     let mut events = session.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let start = NaiveDate::from_ymd_opt(2012, 3, 25).ok_or("bad date")?;
//!     let request = QueryRequest::new(start, 100).with_language("Rust");
//!
//!     let report = AutoPaginator::new(session.clone())
//!         .run(&request, 10, true)
//!         .await?;
//!     println!("{}", report.message());
//!
//!     let mut sink = FileSink::create("export.csv", quota).await?;
//!     CsvExporter::for_session(&session).export_to(&mut sink).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Page cache with a row ceiling
pub mod cache;
/// Backend client, transport seam and response classification
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// CSV export pipeline and file sink
pub mod export;
/// Auto-pagination loop
pub mod paginate;
/// Query request construction and validation
pub mod request;
/// Query session: fetch orchestration and UI-facing state
pub mod session;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use cache::PageCache;
pub use client::{BackendClient, HttpTransport, Transport, TransportError, classify_response};
pub use config::Config;
pub use error::{Error, ErrorKind, Result, Severity, UserError};
pub use export::{AppendSink, CsvExporter, FileSink};
pub use paginate::{AutoPaginator, PaginationReport};
pub use request::QueryRequest;
pub use session::{QuerySession, augment_request};
pub use types::{
    Continuation, Event, FetchOutcome, Page, PaginationState, QueryResult, Row,
};
