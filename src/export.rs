//! CSV export of the cached query data
//!
//! Pages are rendered one at a time and handed to an [`AppendSink`] in
//! cache order, the header row going out with the first page only. The
//! cache read lock is taken per page; an export whose query is replaced by
//! a new one part way through fails instead of mixing the two.

use crate::cache::PageCache;
use crate::error::{Error, Result};
use crate::session::QuerySession;
use crate::types::{COLUMNS, Event};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;

const MSG_NO_PAGE: &str = "Internal error: no page to convert. Please contact Support.";
const MSG_CACHE_REPLACED: &str =
    "Query data was replaced during the export. Please export again.";

/// Destination of exported CSV chunks
///
/// Both operations report failure as `false`; either failing is terminal
/// for the export attempt.
#[async_trait]
pub trait AppendSink: Send {
    /// Append one chunk at the end
    async fn append(&mut self, chunk: Vec<u8>) -> bool;

    /// Discard everything appended so far
    async fn truncate(&mut self) -> bool;
}

type ProgressFn = Box<dyn Fn(u8) + Send + Sync>;

/// Streams the page cache out as CSV
pub struct CsvExporter {
    cache: Arc<RwLock<PageCache>>,
    chunk_delay: Duration,
    progress: Option<ProgressFn>,
}

impl CsvExporter {
    /// Create an exporter over `cache`, pausing `chunk_delay` between chunks
    pub fn new(cache: Arc<RwLock<PageCache>>, chunk_delay: Duration) -> Self {
        Self {
            cache,
            chunk_delay,
            progress: None,
        }
    }

    /// Exporter over the session's cache reporting [`Event::ExportProgress`]
    /// on the session's event channel
    pub fn for_session(session: &QuerySession) -> Self {
        let events = session.clone();
        Self::new(session.cache(), session.config().export_chunk_delay)
            .with_progress(move |percent| events.emit(Event::ExportProgress { percent }))
    }

    /// Call `progress` with the completed percentage after each chunk
    pub fn with_progress(mut self, progress: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Render page `index` as CSV text
    ///
    /// Page 0 starts with the header row. Missing values render as empty
    /// fields.
    pub async fn convert_page(&self, index: usize) -> Result<String> {
        let cache = self.cache.read().await;
        render_page(&cache, index)
    }

    /// Append every cached page to `sink` in order
    ///
    /// Returns `Ok(false)` as soon as the sink refuses a chunk; no further
    /// chunk is offered after a refusal. Fails with [`Error::Internal`] if a
    /// new query clears the cache before the last page is written.
    pub async fn perform_conversion(&self, sink: &mut dyn AppendSink) -> Result<bool> {
        let (page_count, generation) = {
            let cache = self.cache.read().await;
            (cache.page_count(), cache.generation())
        };

        for index in 0..page_count {
            let chunk = {
                let cache = self.cache.read().await;
                if cache.generation() != generation {
                    tracing::error!(
                        page_index = index,
                        "export aborted, cache was cleared for a new query"
                    );
                    return Err(Error::Internal(MSG_CACHE_REPLACED.to_string()));
                }
                render_page(&cache, index)?
            };

            if !sink.append(chunk.into_bytes()).await {
                tracing::error!(
                    page_index = index,
                    "data conversion failed, sink refused chunk"
                );
                return Ok(false);
            }

            let percent = ((index + 1) * 100 / page_count) as u8;
            if let Some(progress) = &self.progress {
                progress(percent);
            }

            tokio::time::sleep(self.chunk_delay).await;
        }

        tracing::info!(pages = page_count, "CSV conversion completed");
        Ok(true)
    }

    /// Truncate `sink`, then write the whole cache to it
    pub async fn export_to(&self, sink: &mut dyn AppendSink) -> Result<bool> {
        if !sink.truncate().await {
            tracing::error!("export aborted, sink could not be truncated");
            return Ok(false);
        }
        self.perform_conversion(sink).await
    }
}

fn render_page(cache: &PageCache, index: usize) -> Result<String> {
    let page = cache
        .page(index)
        .ok_or_else(|| Error::Internal(MSG_NO_PAGE.to_string()))?;

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    if index == 0 {
        writer.write_record(COLUMNS)?;
    }
    for row in page.rows() {
        writer.write_record(row.fields())?;
    }

    let bytes = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| Error::Internal(e.to_string()))
}

/// Staging file receiving an export
///
/// Appends that would grow the file beyond its quota are refused.
pub struct FileSink {
    path: PathBuf,
    file: File,
    written: u64,
    quota: u64,
}

impl FileSink {
    /// Create (or replace) the staging file at `path`
    pub async fn create(path: impl Into<PathBuf>, quota: u64) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;

        tracing::debug!(path = %path.display(), quota, "export file created");
        Ok(Self {
            path,
            file,
            written: 0,
            quota,
        })
    }

    /// Location of the staging file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Remove the staging file
    pub async fn delete(self) -> Result<()> {
        let Self { path, file, .. } = self;
        drop(file);
        tokio::fs::remove_file(&path).await?;
        tracing::debug!(path = %path.display(), "export file deleted");
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk).await?;
        self.file.flush().await
    }

    async fn reset(&mut self) -> std::io::Result<()> {
        self.file.set_len(0).await?;
        self.file.seek(std::io::SeekFrom::Start(0)).await?;
        Ok(())
    }
}

#[async_trait]
impl AppendSink for FileSink {
    async fn append(&mut self, chunk: Vec<u8>) -> bool {
        let len = chunk.len() as u64;
        if self.written.saturating_add(len) > self.quota {
            tracing::error!(
                written = self.written,
                chunk = len,
                quota = self.quota,
                "export file quota exceeded"
            );
            return false;
        }

        match self.write_chunk(&chunk).await {
            Ok(()) => {
                self.written += len;
                true
            }
            Err(e) => {
                tracing::error!(error = %e, path = %self.path.display(), "failed to append to export file");
                false
            }
        }
    }

    async fn truncate(&mut self) -> bool {
        match self.reset().await {
            Ok(()) => {
                self.written = 0;
                true
            }
            Err(e) => {
                tracing::error!(error = %e, path = %self.path.display(), "failed to truncate export file");
                false
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Reply, create_test_session, new_request, page_json};
    use crate::types::QueryResult;
    use serde_json::json;
    use std::sync::Mutex;

    /// Sink recording chunks, optionally refusing the `fail_at`-th append
    #[derive(Default)]
    struct RecordingSink {
        chunks: Vec<Vec<u8>>,
        attempts: usize,
        fail_at: Option<usize>,
        truncated: usize,
        refuse_truncate: bool,
    }

    #[async_trait]
    impl AppendSink for RecordingSink {
        async fn append(&mut self, chunk: Vec<u8>) -> bool {
            self.attempts += 1;
            if self.fail_at == Some(self.attempts) {
                return false;
            }
            self.chunks.push(chunk);
            true
        }

        async fn truncate(&mut self) -> bool {
            self.truncated += 1;
            self.chunks.clear();
            !self.refuse_truncate
        }
    }

    fn cache_with_pages(pages: usize) -> Arc<RwLock<PageCache>> {
        let mut cache = PageCache::new(200_000);
        for i in 0..pages {
            let token = format!("tok{}", i + 1);
            let result: QueryResult =
                serde_json::from_value(page_json(i * 3, 3, Some(&token))).unwrap();
            assert!(cache.add_page(result));
        }
        Arc::new(RwLock::new(cache))
    }

    fn text(chunk: &[u8]) -> &str {
        std::str::from_utf8(chunk).unwrap()
    }

    #[tokio::test]
    async fn header_only_in_first_chunk_and_pages_in_order() {
        let exporter = CsvExporter::new(cache_with_pages(3), Duration::ZERO);
        let mut sink = RecordingSink::default();

        assert!(exporter.perform_conversion(&mut sink).await.unwrap());

        assert_eq!(sink.chunks.len(), 3);
        let header = "DateTime,Name,Language,Size,Homepage,Login,Owner\n";
        assert!(text(&sink.chunks[0]).starts_with(header));
        assert!(!text(&sink.chunks[1]).contains("DateTime,"));
        assert!(!text(&sink.chunks[2]).contains("DateTime,"));

        let all: String = sink.chunks.iter().map(|c| text(c)).collect();
        let names: Vec<&str> = all
            .lines()
            .skip(1)
            .map(|line| line.split(',').nth(1).unwrap())
            .collect();
        let expected: Vec<String> = (0..9).map(|i| format!("repo-{}", i)).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn refused_append_stops_conversion() {
        let exporter = CsvExporter::new(cache_with_pages(4), Duration::ZERO);
        let mut sink = RecordingSink {
            fail_at: Some(2),
            ..Default::default()
        };

        assert!(!exporter.perform_conversion(&mut sink).await.unwrap());

        assert_eq!(sink.attempts, 2);
        assert_eq!(sink.chunks.len(), 1);
    }

    #[tokio::test]
    async fn progress_reports_floored_percentages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let exporter = CsvExporter::new(cache_with_pages(3), Duration::ZERO)
            .with_progress(move |percent| recorder.lock().unwrap().push(percent));

        let mut sink = RecordingSink::default();
        assert!(exporter.perform_conversion(&mut sink).await.unwrap());

        assert_eq!(*seen.lock().unwrap(), vec![33, 66, 100]);
    }

    #[tokio::test]
    async fn fields_are_quoted_and_missing_values_empty() {
        let result: QueryResult = serde_json::from_value(json!({
            "rows": [{
                "DateTime": "2012-03-25 10:00:00",
                "Name": "a,b",
                "Language": "Rust",
                "Size": "12",
                "Homepage": "say \"hi\"",
                "Login": "octocat"
            }],
            "jobComplete": true,
            "totalRows": "1",
            "returnedRows": "1",
            "totalBytesProcessed": "100"
        }))
        .unwrap();
        let mut cache = PageCache::new(100);
        assert!(cache.add_page(result));
        let exporter = CsvExporter::new(Arc::new(RwLock::new(cache)), Duration::ZERO);

        let csv = exporter.convert_page(0).await.unwrap();

        let line = csv.lines().nth(1).unwrap();
        assert_eq!(
            line,
            r#"2012-03-25 10:00:00,"a,b",Rust,12,"say ""hi""",octocat,"#
        );
    }

    #[tokio::test]
    async fn missing_page_is_internal_error() {
        let exporter = CsvExporter::new(cache_with_pages(1), Duration::ZERO);
        let err = exporter.convert_page(1).await.unwrap_err();
        assert!(matches!(err, Error::Internal(msg) if msg == MSG_NO_PAGE));
    }

    /// Sink that starts a new query on the session after its first chunk
    struct RequeryingSink {
        session: QuerySession,
        chunks: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl AppendSink for RequeryingSink {
        async fn append(&mut self, chunk: Vec<u8>) -> bool {
            self.chunks.push(chunk);
            if self.chunks.len() == 1 {
                assert!(
                    self.session
                        .perform_query(&new_request(), true)
                        .await
                        .unwrap()
                );
            }
            true
        }

        async fn truncate(&mut self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn new_query_during_export_aborts_instead_of_mixing_queries() {
        let (session, _transport) = create_test_session(vec![
            Reply::Json(page_json(0, 2, Some("tok1"))),
            Reply::Json(page_json(2, 2, None)),
            Reply::Json(page_json(900, 2, Some("tok1"))),
            Reply::Json(page_json(902, 2, None)),
        ]);
        assert!(session.perform_query(&new_request(), true).await.unwrap());
        assert!(session.show_page(1).await.unwrap());
        assert_eq!(session.page_count().await, 2);

        let exporter = CsvExporter::for_session(&session);
        let mut sink = RequeryingSink {
            session: session.clone(),
            chunks: Vec::new(),
        };

        let err = exporter.export_to(&mut sink).await.unwrap_err();

        assert!(matches!(err, Error::Internal(msg) if msg == MSG_CACHE_REPLACED));
        assert_eq!(sink.chunks.len(), 1);
        assert!(text(&sink.chunks[0]).contains("repo-0"));
        assert_eq!(session.page_count().await, 1);
    }

    #[tokio::test]
    async fn export_truncates_before_writing() {
        let exporter = CsvExporter::new(cache_with_pages(2), Duration::ZERO);
        let mut sink = RecordingSink {
            chunks: vec![b"stale".to_vec()],
            ..Default::default()
        };

        assert!(exporter.export_to(&mut sink).await.unwrap());
        assert_eq!(sink.truncated, 1);
        assert_eq!(sink.chunks.len(), 2);

        let mut refusing = RecordingSink {
            refuse_truncate: true,
            ..Default::default()
        };
        assert!(!exporter.export_to(&mut refusing).await.unwrap());
        assert_eq!(refusing.attempts, 0);
    }

    #[tokio::test]
    async fn empty_cache_exports_nothing() {
        let exporter = CsvExporter::new(cache_with_pages(0), Duration::ZERO);
        let mut sink = RecordingSink::default();
        assert!(exporter.perform_conversion(&mut sink).await.unwrap());
        assert!(sink.chunks.is_empty());
    }

    #[tokio::test]
    async fn file_sink_enforces_quota_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut sink = FileSink::create(&path, 10).await.unwrap();

        assert!(sink.append(b"123456".to_vec()).await);
        assert!(!sink.append(b"12345".to_vec()).await);
        assert_eq!(sink.written(), 6);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"123456");

        assert!(sink.truncate().await);
        assert!(sink.append(b"abc".to_vec()).await);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abc");

        sink.delete().await.unwrap();
        assert!(!path.exists());
    }
}
