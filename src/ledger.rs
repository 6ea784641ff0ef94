//! Harvest run bookkeeping.
//!
//! Per site, the ledger keeps the start time of the last run that changed
//! the index (the next run's `from` bound) and the log of every such run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::harvest::{HarvestReport, RunOutcome};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestRun {
    pub started_at: DateTime<Utc>,
    pub logs: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteHistory {
    pub last_harvested: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runs: Vec<HarvestRun>,
}

/// JSON-file ledger keyed by site title.
#[derive(Debug, Default)]
pub struct HarvestLedger {
    path: PathBuf,
    sites: BTreeMap<String, SiteHistory>,
}

impl HarvestLedger {
    /// Loads the ledger at `path`; a missing file is an empty ledger.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let sites = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, sites })
    }

    pub fn last_harvested(&self, site: &str) -> Option<DateTime<Utc>> {
        self.sites.get(site).and_then(|h| h.last_harvested)
    }

    pub fn runs(&self, site: &str) -> &[HarvestRun] {
        self.sites
            .get(site)
            .map(|h| h.runs.as_slice())
            .unwrap_or(&[])
    }

    /// Records a run that changed the index. A completed run also advances
    /// the site's `last_harvested` to its start time; an aborted one keeps
    /// the old bound so the next run picks up the missing records.
    pub fn record_run(
        &mut self,
        site: &str,
        started_at: DateTime<Utc>,
        logs: &[String],
        completed: bool,
    ) {
        let history = self.sites.entry(site.to_string()).or_default();
        if completed {
            history.last_harvested = Some(started_at);
        }
        history.runs.push(HarvestRun {
            started_at,
            logs: logs.join("\n"),
        });
    }

    /// Forgets the site's `last_harvested`, so its next run lists
    /// everything. Run history is kept.
    pub fn reset_bound(&mut self, site: &str) {
        if let Some(history) = self.sites.get_mut(site) {
            history.last_harvested = None;
        }
    }

    /// Books one finished run of `site` started at `started_at`.
    ///
    /// - a run with no log lines leaves no entry and keeps the bound
    /// - a run with lines is always recorded
    /// - the bound advances only when the run was not aborted
    ///
    /// Returns whether the run completed.
    pub fn apply_report(
        &mut self,
        site: &str,
        started_at: DateTime<Utc>,
        report: &HarvestReport,
    ) -> bool {
        let completed = !matches!(report.outcome, RunOutcome::Aborted(_));
        if report.has_work() {
            self.record_run(site, started_at, &report.logs, completed);
        }
        completed
    }

    pub fn save(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&self.sites)?)?;
        debug!(path = %self.path.display(), sites = self.sites.len(), "Saved ledger");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{HarvestStats, PipelineError};
    use chrono::TimeZone;

    fn report(outcome: RunOutcome, logs: &[&str]) -> HarvestReport {
        HarvestReport {
            endpoint: "https://lib.example.org/oai".to_string(),
            hostname: Some("lib.example.org".to_string()),
            outcome,
            logs: logs.iter().map(|l| l.to_string()).collect(),
            failures: vec![],
            stats: HarvestStats::default(),
        }
    }

    #[test]
    fn test_record_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ledger.json");
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let mut ledger = HarvestLedger::load(&path).unwrap();
        assert_eq!(ledger.last_harvested("Library"), None);
        ledger.record_run(
            "Library",
            started,
            &["Indexing Qa:1".to_string(), "Total indexed: 1".to_string()],
            true,
        );
        ledger.save().unwrap();

        let reloaded = HarvestLedger::load(&path).unwrap();
        assert_eq!(reloaded.last_harvested("Library"), Some(started));
        assert_eq!(reloaded.runs("Library").len(), 1);
        assert_eq!(
            reloaded.runs("Library")[0].logs,
            "Indexing Qa:1\nTotal indexed: 1"
        );
        assert!(reloaded.runs("Archive").is_empty());
    }

    #[test]
    fn test_later_run_advances_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = HarvestLedger::load(dir.path().join("ledger.json")).unwrap();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        ledger.record_run("Library", first, &["a".to_string()], true);
        ledger.record_run("Library", second, &["b".to_string()], true);

        assert_eq!(ledger.last_harvested("Library"), Some(second));
        assert_eq!(ledger.runs("Library").len(), 2);
    }

    #[test]
    fn test_aborted_run_keeps_previous_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = HarvestLedger::load(dir.path().join("ledger.json")).unwrap();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        ledger.record_run("Library", first, &["a".to_string()], true);
        ledger.record_run("Library", second, &["b".to_string()], false);

        assert_eq!(ledger.last_harvested("Library"), Some(first));
        assert_eq!(ledger.runs("Library").len(), 2);
    }

    #[test]
    fn test_apply_report_books_each_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = HarvestLedger::load(dir.path().join("ledger.json")).unwrap();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let third = Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap();

        let completed = report(RunOutcome::Completed, &["Indexing Qa:1", "Total indexed: 1"]);
        assert!(ledger.apply_report("Library", first, &completed));
        assert_eq!(ledger.last_harvested("Library"), Some(first));
        assert_eq!(ledger.runs("Library").len(), 1);

        assert!(ledger.apply_report("Library", second, &report(RunOutcome::Empty, &[])));
        assert_eq!(ledger.last_harvested("Library"), Some(first));
        assert_eq!(ledger.runs("Library").len(), 1);

        let aborted = report(
            RunOutcome::Aborted(PipelineError::InvalidEndpoint("x".to_string())),
            &["Indexing Qa:2", "Total indexed: 1"],
        );
        assert!(!ledger.apply_report("Library", third, &aborted));
        assert_eq!(ledger.last_harvested("Library"), Some(first));
        assert_eq!(ledger.runs("Library").len(), 2);
        assert_eq!(ledger.runs("Library")[1].started_at, third);

        let aborted_early = report(
            RunOutcome::Aborted(PipelineError::InvalidEndpoint("x".to_string())),
            &[],
        );
        assert!(!ledger.apply_report("Archive", third, &aborted_early));
        assert!(ledger.runs("Archive").is_empty());
    }

    #[test]
    fn test_reset_bound_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut ledger = HarvestLedger::load(dir.path().join("ledger.json")).unwrap();
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        ledger.record_run("Library", started, &["a".to_string()], true);
        ledger.reset_bound("Library");
        ledger.reset_bound("Unknown");

        assert_eq!(ledger.last_harvested("Library"), None);
        assert_eq!(ledger.runs("Library").len(), 1);
    }
}
