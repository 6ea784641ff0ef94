//! Harvest run executor.
//!
//! This module provides the [`HarvestPipeline`] coordinator that runs one
//! harvest against one endpoint (Listing → Extraction → Indexing, page by
//! page) with:
//! - Async listing via a [`RecordSource`]
//! - Configurable timeouts per stage
//! - Structured logging via `tracing`
//! - Per-record isolation of extraction failures
//! - One index commit per listing page

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

use crate::harvest::formats;
use crate::harvest::traits::{HarvestRequest, ListCursor, ListOutcome, ProtocolError, RecordSource};
use crate::index::{IndexError, IndexWriter, Indexer};
use crate::model::{NormalizedRecord, RawRecord, HOSTNAME_FIELD};
use crate::traits::MetadataFormat;

/// The index writer shared by every harvest of a process.
pub type SharedWriter = Arc<Mutex<IndexWriter>>;

// ============================================================================
// Pipeline Types
// ============================================================================

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The endpoint had no records for the request. Nothing was written.
    Empty,

    /// The listing was followed to its end.
    Completed,

    /// The run stopped early. Pages committed before the failure stay
    /// committed.
    Aborted(PipelineError),
}

/// A record that could not be extracted or indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub identifier: String,
    pub reason: String,
}

/// Statistics about one run.
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    /// Listing pages received
    pub pages: usize,

    /// Records listed, including deleted ones
    pub records_seen: usize,

    /// Documents written
    pub indexed: usize,

    /// Deleted records applied to the index
    pub removed: usize,

    /// Records skipped because of a failure
    pub failed: usize,

    /// Total time spent on the run (milliseconds)
    pub total_duration_ms: u64,
}

/// Result of one run, handed to the run bookkeeping.
#[derive(Debug)]
pub struct HarvestReport {
    pub endpoint: String,

    /// Host tagged onto every record; `None` when the endpoint URL is unusable
    pub hostname: Option<String>,

    pub outcome: RunOutcome,

    /// One line per indexed or removed record, then a total line
    pub logs: Vec<String>,

    pub failures: Vec<RecordFailure>,

    pub stats: HarvestStats,
}

impl HarvestReport {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            hostname: None,
            outcome: RunOutcome::Completed,
            logs: Vec::new(),
            failures: Vec::new(),
            stats: HarvestStats::default(),
        }
    }

    /// Whether the run touched the index at all.
    pub fn has_work(&self) -> bool {
        !self.logs.is_empty()
    }

    fn abort(&mut self, error: PipelineError) {
        warn!(endpoint = %self.endpoint, error = %error, "Harvest aborted");
        self.outcome = RunOutcome::Aborted(error);
    }
}

/// A record ready for the indexer.
struct PreparedRecord {
    identifier: String,
    deleted: bool,
    fields: NormalizedRecord,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that end a run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Endpoint URL has no usable host
    #[error("Invalid endpoint URL '{0}'")]
    InvalidEndpoint(String),

    /// Listing failed
    #[error("Listing failed: {0}")]
    Protocol(#[from] ProtocolError),

    /// Stage execution exceeded timeout
    #[error("Stage '{stage}' timed out after {timeout_secs}s")]
    StageTimeout { stage: String, timeout_secs: u64 },

    /// Extraction task could not run to completion
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Index commit failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Harvest coordinator for one endpoint at a time.
///
/// Every listing page goes through:
/// 1. **Listing**: one call to the [`RecordSource`], with timeout
/// 2. **Extraction**: raw records → [`NormalizedRecord`] on the blocking
///    pool, with timeout; failing records are reported and skipped
/// 3. **Indexing**: under the shared writer lock, followed by a commit
///
/// # Thread Safety
///
/// The pipeline is `Send + Sync`; one instance can run harvests for many
/// endpoints concurrently. Writes are serialized by the [`SharedWriter`].
///
/// # Example
///
/// ```ignore
/// let pipeline = HarvestPipeline::new(OaiClient::new("agent", timeout)?, Indexer::default())
///     .with_timeout(Duration::from_secs(60));
/// let writer = Arc::new(Mutex::new(index.writer()?));
/// let report = pipeline.execute(&request, &writer).await;
/// ```
pub struct HarvestPipeline<S>
where
    S: RecordSource,
{
    /// Listing transport
    source: S,

    /// Record → document conversion
    indexer: Indexer,

    /// Timeout for each stage (default: 5 minutes)
    stage_timeout: Duration,
}

impl<S> HarvestPipeline<S>
where
    S: RecordSource,
{
    /// Creates a new pipeline with a 5 minute timeout per stage.
    pub fn new(source: S, indexer: Indexer) -> Self {
        Self {
            source,
            indexer,
            stage_timeout: Duration::from_secs(300),
        }
    }

    /// Sets the timeout for each pipeline stage.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Runs one harvest.
    ///
    /// Never fails as a whole: protocol and transport failures end the run
    /// and are reported in [`HarvestReport::outcome`].
    pub async fn execute(&self, request: &HarvestRequest, writer: &SharedWriter) -> HarvestReport {
        let start = Instant::now();
        let mut report = HarvestReport::new(&request.endpoint);

        let hostname = match hostname_of(&request.endpoint) {
            Ok(hostname) => hostname,
            Err(e) => {
                report.abort(e);
                return report;
            }
        };
        report.hostname = Some(hostname.clone());

        let format: Arc<dyn MetadataFormat> = Arc::from(formats::for_kind(request.metadata_format));
        let mut cursor = request.start_cursor();

        info!(
            source = self.source.source_name(),
            endpoint = %request.endpoint,
            format = %request.metadata_format,
            from = ?request.from,
            set = ?request.set,
            "Starting harvest"
        );

        loop {
            // ================================================================
            // Stage 1: Listing
            // ================================================================

            let listing = timeout(
                self.stage_timeout,
                self.source.list_records(&request.endpoint, &cursor),
            )
            .await
            .unwrap_or_else(|_| {
                ListOutcome::Failed(ProtocolError::Timeout(self.stage_timeout.as_secs()))
            });

            let page = match listing {
                ListOutcome::Empty if cursor.is_start() => {
                    info!(endpoint = %request.endpoint, "No records match");
                    report.outcome = RunOutcome::Empty;
                    break;
                }
                ListOutcome::Empty => break,
                ListOutcome::Failed(e) => {
                    report.abort(e.into());
                    break;
                }
                ListOutcome::Page(page) => page,
            };
            report.stats.pages += 1;
            report.stats.records_seen += page.records.len();

            // ================================================================
            // Stage 2: Extraction
            // ================================================================

            let (prepared, failures) =
                match self.extract_page(page.records, &format, &hostname).await {
                    Ok(extracted) => extracted,
                    Err(e) => {
                        report.abort(e);
                        break;
                    }
                };
            report.stats.failed += failures.len();
            report.failures.extend(failures);

            // ================================================================
            // Stage 3: Indexing
            // ================================================================

            if let Err(e) = self.index_page(prepared, writer, &mut report).await {
                report.abort(e);
                break;
            }
            debug!(
                pages = report.stats.pages,
                lines = report.logs.len(),
                "Committed page"
            );

            match page.resumption_token {
                Some(token) => cursor = ListCursor::Resume(token),
                None => break,
            }
        }

        if report.has_work() {
            let total = format!("Total indexed: {}", report.logs.len());
            report.logs.push(total);
        }
        report.stats.total_duration_ms = start.elapsed().as_millis() as u64;

        info!(
            endpoint = %request.endpoint,
            pages = report.stats.pages,
            indexed = report.stats.indexed,
            removed = report.stats.removed,
            failed = report.stats.failed,
            duration_ms = report.stats.total_duration_ms,
            "Harvest finished"
        );
        report
    }

    async fn extract_page(
        &self,
        records: Vec<RawRecord>,
        format: &Arc<dyn MetadataFormat>,
        hostname: &str,
    ) -> Result<(Vec<PreparedRecord>, Vec<RecordFailure>), PipelineError> {
        let format = Arc::clone(format);
        let hostname = hostname.to_string();

        timeout(self.stage_timeout, async move {
            tokio::task::spawn_blocking(move || extract_records(records, format.as_ref(), &hostname))
                .await
        })
        .await
        .map_err(|_| PipelineError::StageTimeout {
            stage: "extraction".to_string(),
            timeout_secs: self.stage_timeout.as_secs(),
        })?
        .map_err(|e| PipelineError::ExtractionFailed(format!("Task join error: {}", e)))
    }

    /// Indexes one page under the writer lock and commits it.
    ///
    /// Log lines and counters reach the report only once the commit went
    /// through; a failed commit leaves the report as it was before the page.
    async fn index_page(
        &self,
        prepared: Vec<PreparedRecord>,
        writer: &SharedWriter,
        report: &mut HarvestReport,
    ) -> Result<(), PipelineError> {
        let mut writer = writer.lock().await;
        let mut page = PageTally::default();

        for record in prepared {
            match self.indexer.index_record(
                &mut writer,
                &record.fields,
                &record.identifier,
                record.deleted,
            ) {
                Ok(line) => {
                    if record.deleted {
                        page.removed += 1;
                    } else {
                        page.indexed += 1;
                    }
                    page.logs.push(line);
                }
                Err(e) => {
                    warn!(identifier = %record.identifier, error = %e, "Skipping record");
                    report.stats.failed += 1;
                    report.failures.push(RecordFailure {
                        identifier: record.identifier,
                        reason: e.to_string(),
                    });
                }
            }
        }

        writer.commit()?;
        report.stats.indexed += page.indexed;
        report.stats.removed += page.removed;
        report.logs.extend(page.logs);
        Ok(())
    }
}

/// What one page contributes to the report once committed.
#[derive(Default)]
struct PageTally {
    logs: Vec<String>,
    indexed: usize,
    removed: usize,
}

/// Extracts every record of a page. Deleted records are passed through
/// without extraction.
fn extract_records(
    records: Vec<RawRecord>,
    format: &dyn MetadataFormat,
    hostname: &str,
) -> (Vec<PreparedRecord>, Vec<RecordFailure>) {
    let mut prepared = Vec::with_capacity(records.len());
    let mut failures = Vec::new();

    for record in records {
        if record.deleted {
            prepared.push(PreparedRecord {
                identifier: record.identifier,
                deleted: true,
                fields: NormalizedRecord::new(),
            });
            continue;
        }

        match format.extract(&record) {
            Ok(mut fields) => {
                fields.set(HOSTNAME_FIELD, vec![hostname.to_string()]);
                prepared.push(PreparedRecord {
                    identifier: record.identifier,
                    deleted: false,
                    fields,
                });
            }
            Err(e) => {
                warn!(
                    identifier = %record.identifier,
                    datestamp = record.datestamp.as_deref().unwrap_or("-"),
                    sets = ?record.set_specs,
                    error = %e,
                    "Skipping record"
                );
                failures.push(RecordFailure {
                    identifier: record.identifier,
                    reason: e.to_string(),
                });
            }
        }
    }
    (prepared, failures)
}

/// Host part of an endpoint URL, as tagged onto every harvested record.
pub fn hostname_of(endpoint: &str) -> Result<String, PipelineError> {
    Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .ok_or_else(|| PipelineError::InvalidEndpoint(endpoint.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
