use crate::harvest::pipeline::{HarvestPipeline, HarvestReport, SharedWriter};
use crate::harvest::traits::{HarvestRequest, RecordSource};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Semaphore error: {0}")]
    Semaphore(String),
    #[error("Harvest task failed: {0}")]
    Join(String),
}

/// Runs harvests of several endpoints concurrently, bounded by a semaphore.
///
/// Fetching and extraction overlap freely; index writes are serialized by
/// the [`SharedWriter`] every run receives.
#[derive(Clone)]
pub struct HarvestExecutor {
    semaphore: Arc<Semaphore>,
}

impl HarvestExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    #[instrument(skip(self, pipeline, request, writer), fields(endpoint = %request.endpoint))]
    pub async fn execute<S>(
        &self,
        pipeline: Arc<HarvestPipeline<S>>,
        request: HarvestRequest,
        writer: SharedWriter,
    ) -> Result<HarvestReport, ExecutorError>
    where
        S: RecordSource + 'static,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ExecutorError::Semaphore(e.to_string()))?;

        info!("Starting harvest for endpoint: {}", request.endpoint);
        let report = pipeline.execute(&request, &writer).await;
        info!(
            lines = report.logs.len(),
            "Finished harvest for endpoint: {}", request.endpoint
        );

        Ok(report)
    }

    /// Harvests every request; reports come back in request order.
    pub async fn execute_all<S>(
        &self,
        pipeline: Arc<HarvestPipeline<S>>,
        requests: Vec<HarvestRequest>,
        writer: SharedWriter,
    ) -> Vec<Result<HarvestReport, ExecutorError>>
    where
        S: RecordSource + 'static,
    {
        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let executor = self.clone();
                let pipeline = Arc::clone(&pipeline);
                let writer = Arc::clone(&writer);
                tokio::spawn(async move { executor.execute(pipeline, request, writer).await })
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            reports.push(match handle.await {
                Ok(report) => report,
                Err(e) => Err(ExecutorError::Join(e.to_string())),
            });
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::pipeline::RunOutcome;
    use crate::harvest::traits::{ListCursor, ListOutcome, RecordPage};
    use crate::harvest::xml::XmlElement;
    use crate::harvest::hostname_of;
    use crate::index::{Indexer, SearchIndex};
    use crate::model::RawRecord;
    use crate::traits::MetadataFormatKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    // One record per endpoint, named after the endpoint's host; tracks how
    // many listings run at once.
    struct HostSource {
        active: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RecordSource for HostSource {
        async fn list_records(&self, endpoint: &str, _cursor: &ListCursor) -> ListOutcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let host = hostname_of(endpoint).unwrap_or_default();
            ListOutcome::Page(RecordPage {
                records: vec![RawRecord {
                    identifier: format!("oai:{host}:1"),
                    deleted: false,
                    datestamp: None,
                    set_specs: vec![],
                    metadata: vec![XmlElement::new("metadata").with_child(
                        XmlElement::new("dc").with_child(XmlElement::new("title").with_text(host)),
                    )],
                }],
                resumption_token: None,
            })
        }

        fn source_name(&self) -> &'static str {
            "host_source"
        }
    }

    #[tokio::test]
    async fn test_execute_all_bounds_concurrency_and_keeps_order() {
        let peak = Arc::new(AtomicUsize::new(0));
        let source = HostSource {
            active: AtomicUsize::new(0),
            peak: Arc::clone(&peak),
        };
        let pipeline = Arc::new(HarvestPipeline::new(source, Indexer::default()));
        let index = SearchIndex::in_memory().unwrap();
        let writer = Arc::new(Mutex::new(index.writer().unwrap()));

        let requests: Vec<HarvestRequest> = (0..5)
            .map(|i| {
                HarvestRequest::new(
                    format!("https://site{i}.example.org/oai"),
                    MetadataFormatKind::DublinCore,
                )
            })
            .collect();

        let executor = HarvestExecutor::new(2);
        let reports = executor
            .execute_all(Arc::clone(&pipeline), requests, writer)
            .await;

        assert_eq!(reports.len(), 5);
        for (i, report) in reports.iter().enumerate() {
            let report = report.as_ref().unwrap();
            assert!(matches!(report.outcome, RunOutcome::Completed));
            assert_eq!(
                report.hostname.as_deref(),
                Some(format!("site{i}.example.org").as_str())
            );
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(index.reader().doc_count(), 5);
    }
}
