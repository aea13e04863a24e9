//! Batch feeder: pushes deduplicated records into a [`Catalog`].
//!
//! Records are split into fixed-size batches purely to bound request size.
//! Batches go out one at a time, and a progress report is emitted after
//! each one. Per-record problems are tallied; a connection-level
//! [`CatalogError`] stops the run and is recorded in the returned
//! [`FeedReport`] instead of being raised, so the caller can always print
//! a summary of the work completed.
//!
//! # Strategies
//!
//! | Strategy | Per batch |
//! |----------|-----------|
//! | [`FeedStrategy::Bulk`] | one [`Catalog::insert_many`] call |
//! | [`FeedStrategy::PreCheck`] | [`Catalog::find`] then [`Catalog::insert_one`] per record |
//!
//! Both strategies produce the same final catalog state for the same input.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::catalog::{Catalog, CatalogError, InsertOutcome};
use crate::models::InstitutionRecord;

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// How the feeder talks to the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStrategy {
    /// Unordered bulk insert per batch; the catalog resolves conflicts.
    #[default]
    Bulk,
    /// Look up each id first and insert only when absent.
    PreCheck,
}

impl fmt::Display for FeedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedStrategy::Bulk => f.write_str("bulk"),
            FeedStrategy::PreCheck => f.write_str("precheck"),
        }
    }
}

impl FromStr for FeedStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "bulk" => Ok(FeedStrategy::Bulk),
            "precheck" => Ok(FeedStrategy::PreCheck),
            other => bail!("Unknown import strategy: '{}'. Must be bulk or precheck.", other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeedOptions {
    pub batch_size: usize,
    pub strategy: FeedStrategy,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            strategy: FeedStrategy::default(),
        }
    }
}

/// Added / skipped / failed counters for one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportBatchResult {
    pub added: u64,
    /// Already present in the catalog.
    pub skipped: u64,
    pub failed: u64,
}

impl ImportBatchResult {
    pub fn record(&mut self, outcome: &InsertOutcome) {
        match outcome {
            InsertOutcome::Added => self.added += 1,
            InsertOutcome::Duplicate => self.skipped += 1,
            InsertOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.added + self.skipped + self.failed
    }
}

/// Progress snapshot emitted after every batch and at completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub processed: u64,
    pub total: u64,
    pub added_count: u64,
    pub duplicate_count: u64,
    pub error_count: u64,
    /// Milliseconds since the feed started.
    #[serde(rename = "elapsedTime")]
    pub elapsed_ms: u64,
}

/// Receives progress reports from the feeder.
pub trait ProgressSink: Send + Sync {
    fn report(&self, report: &ProgressReport);
}

/// Final outcome of [`feed_records`].
#[derive(Debug, Clone, Default)]
pub struct FeedReport {
    pub result: ImportBatchResult,
    /// Records handed to the catalog and accounted for.
    pub processed: u64,
    pub total: u64,
    pub elapsed: Duration,
    /// Ids of records that created a new site, in feed order.
    pub added_ids: Vec<i64>,
    /// Set when a connection-level error aborted the run.
    pub fatal: Option<String>,
    /// Set when the run stopped early on request.
    pub cancelled: bool,
}

impl FeedReport {
    pub fn progress(&self) -> ProgressReport {
        ProgressReport {
            processed: self.processed,
            total: self.total,
            added_count: self.result.added,
            duplicate_count: self.result.skipped,
            error_count: self.result.failed,
            elapsed_ms: self.elapsed.as_millis() as u64,
        }
    }

    /// Every record was processed without a fatal error.
    pub fn is_complete(&self) -> bool {
        self.fatal.is_none() && !self.cancelled && self.processed == self.total
    }
}

/// Feed `records` into `catalog` batch by batch.
///
/// `cancel` is checked before each batch; once set, no further batches are
/// submitted. Work already committed is kept. Re-running the same input is
/// safe because the catalog skips ids it already holds.
pub async fn feed_records(
    catalog: &dyn Catalog,
    records: &[InstitutionRecord],
    options: &FeedOptions,
    progress: &dyn ProgressSink,
    cancel: &AtomicBool,
) -> FeedReport {
    let started = Instant::now();
    let batch_size = options.batch_size.max(1);
    let mut report = FeedReport {
        total: records.len() as u64,
        ..FeedReport::default()
    };

    for (index, batch) in records.chunks(batch_size).enumerate() {
        if cancel.load(Ordering::SeqCst) {
            warn!(batch = index, "import cancelled between batches");
            report.cancelled = true;
            break;
        }

        let outcome = match options.strategy {
            FeedStrategy::Bulk => feed_bulk(catalog, batch, &mut report).await,
            FeedStrategy::PreCheck => feed_prechecked(catalog, batch, &mut report).await,
        };

        report.elapsed = started.elapsed();
        progress.report(&report.progress());

        if let Err(e) = outcome {
            error!(batch = index, error = %e, "import aborted");
            report.fatal = Some(e.to_string());
            break;
        }
        debug!(batch = index, size = batch.len(), "batch committed");
    }

    report.elapsed = started.elapsed();
    report
}

async fn feed_bulk(
    catalog: &dyn Catalog,
    batch: &[InstitutionRecord],
    report: &mut FeedReport,
) -> Result<(), CatalogError> {
    let outcomes = match catalog.insert_many(batch).await {
        Ok(outcomes) => outcomes,
        Err(e) if !e.is_fatal() => {
            warn!(error = %e, records = batch.len(), "batch rejected; records counted as failed");
            vec![InsertOutcome::Failed(e.to_string()); batch.len()]
        }
        Err(e) => return Err(e),
    };

    if outcomes.len() != batch.len() {
        warn!(
            expected = batch.len(),
            got = outcomes.len(),
            "catalog returned a short outcome list; missing records counted as failed"
        );
    }

    for (i, record) in batch.iter().enumerate() {
        let outcome = outcomes
            .get(i)
            .cloned()
            .unwrap_or_else(|| InsertOutcome::Failed("no outcome reported".to_string()));
        apply(report, record, &outcome);
    }
    Ok(())
}

async fn feed_prechecked(
    catalog: &dyn Catalog,
    batch: &[InstitutionRecord],
    report: &mut FeedReport,
) -> Result<(), CatalogError> {
    for record in batch {
        let outcome = match catalog.find(record.id).await {
            Ok(Some(_)) => InsertOutcome::Duplicate,
            Ok(None) => match catalog.insert_one(record).await {
                Ok(outcome) => outcome,
                Err(e) if !e.is_fatal() => InsertOutcome::Failed(e.to_string()),
                Err(e) => return Err(e),
            },
            Err(e) if !e.is_fatal() => InsertOutcome::Failed(e.to_string()),
            Err(e) => return Err(e),
        };
        apply(report, record, &outcome);
    }
    Ok(())
}

fn apply(report: &mut FeedReport, record: &InstitutionRecord, outcome: &InsertOutcome) {
    match outcome {
        InsertOutcome::Added => report.added_ids.push(record.id),
        InsertOutcome::Failed(reason) => {
            warn!(site_id = record.id, reason = %reason, "record rejected by catalog");
        }
        InsertOutcome::Duplicate => {}
    }
    report.result.record(outcome);
    report.processed += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::InMemoryCatalog;
    use crate::models::Site;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        reports: Mutex<Vec<ProgressReport>>,
    }

    impl ProgressSink for Recorder {
        fn report(&self, report: &ProgressReport) {
            self.reports.lock().unwrap().push(*report);
        }
    }

    /// Catalog that goes away after a fixed number of successful calls.
    struct FlakyCatalog {
        inner: InMemoryCatalog,
        calls_left: AtomicUsize,
    }

    #[async_trait]
    impl Catalog for FlakyCatalog {
        async fn insert_many(
            &self,
            records: &[InstitutionRecord],
        ) -> Result<Vec<InsertOutcome>, CatalogError> {
            if self.calls_left.load(Ordering::SeqCst) == 0 {
                return Err(CatalogError::Unavailable("connection refused".to_string()));
            }
            self.calls_left.fetch_sub(1, Ordering::SeqCst);
            self.inner.insert_many(records).await
        }

        async fn find(&self, site_id: i64) -> Result<Option<Site>, CatalogError> {
            self.inner.find(site_id).await
        }
    }

    /// Catalog that refuses any write touching one id.
    struct PickyCatalog {
        inner: InMemoryCatalog,
        refused: i64,
    }

    #[async_trait]
    impl Catalog for PickyCatalog {
        async fn insert_many(
            &self,
            records: &[InstitutionRecord],
        ) -> Result<Vec<InsertOutcome>, CatalogError> {
            if records.iter().any(|r| r.id == self.refused) {
                return Err(CatalogError::Rejected(format!("id {} refused", self.refused)));
            }
            self.inner.insert_many(records).await
        }

        async fn find(&self, site_id: i64) -> Result<Option<Site>, CatalogError> {
            self.inner.find(site_id).await
        }
    }

    fn records(n: i64) -> Vec<InstitutionRecord> {
        (1..=n)
            .map(|i| InstitutionRecord::new(i, format!("Bank {}", i), ""))
            .collect()
    }

    fn opts(batch_size: usize, strategy: FeedStrategy) -> FeedOptions {
        FeedOptions {
            batch_size,
            strategy,
        }
    }

    #[tokio::test]
    async fn test_feed_twice_is_idempotent() {
        let catalog = InMemoryCatalog::new();
        let recs = records(25);
        let cancel = AtomicBool::new(false);
        let sink = Recorder::default();

        let first = feed_records(&catalog, &recs, &opts(10, FeedStrategy::Bulk), &sink, &cancel).await;
        assert_eq!(first.result.added, 25);
        assert_eq!(first.result.skipped, 0);
        assert!(first.is_complete());

        let second = feed_records(&catalog, &recs, &opts(10, FeedStrategy::Bulk), &sink, &cancel).await;
        assert_eq!(second.result.added, 0);
        assert_eq!(second.result.skipped, 25);
        assert_eq!(second.processed, 25);
        assert_eq!(catalog.len(), 25);
    }

    #[tokio::test]
    async fn test_batch_size_does_not_change_final_state() {
        let recs = records(37);
        let cancel = AtomicBool::new(false);
        let mut snapshots = Vec::new();

        for size in [1, 7, 500] {
            for strategy in [FeedStrategy::Bulk, FeedStrategy::PreCheck] {
                let catalog = InMemoryCatalog::new();
                let report = feed_records(&catalog, &recs, &opts(size, strategy), &Recorder::default(), &cancel).await;
                assert_eq!(report.result.added, 37);
                let ids: Vec<(i64, String)> =
                    catalog.sites().into_iter().map(|s| (s.site_id, s.name)).collect();
                snapshots.push(ids);
            }
        }

        assert!(snapshots.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_progress_after_each_batch() {
        let catalog = InMemoryCatalog::new();
        let sink = Recorder::default();
        let cancel = AtomicBool::new(false);
        feed_records(&catalog, &records(12), &opts(5, FeedStrategy::Bulk), &sink, &cancel).await;

        let reports = sink.reports.lock().unwrap();
        let processed: Vec<u64> = reports.iter().map(|r| r.processed).collect();
        assert_eq!(processed, vec![5, 10, 12]);
        assert!(reports.iter().all(|r| r.total == 12));
    }

    #[tokio::test]
    async fn test_rejections_counted_not_fatal() {
        let recs = vec![
            InstitutionRecord::new(1, "Good", ""),
            InstitutionRecord::new(2, "", ""),
            InstitutionRecord::new(3, "Also good", ""),
        ];
        let cancel = AtomicBool::new(false);

        for strategy in [FeedStrategy::Bulk, FeedStrategy::PreCheck] {
            let catalog = InMemoryCatalog::new();
            let report = feed_records(&catalog, &recs, &opts(500, strategy), &Recorder::default(), &cancel).await;
            assert_eq!(report.result.added, 2);
            assert_eq!(report.result.failed, 1);
            assert!(report.fatal.is_none());
            assert_eq!(report.added_ids, vec![1, 3]);
            assert_eq!(catalog.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_rejected_call_is_not_fatal_for_either_strategy() {
        let cancel = AtomicBool::new(false);

        // Batches of two: [1, 2] [3, 4] [5]. The whole [3, 4] call is refused.
        let catalog = PickyCatalog {
            inner: InMemoryCatalog::new(),
            refused: 3,
        };
        let report = feed_records(&catalog, &records(5), &opts(2, FeedStrategy::Bulk), &Recorder::default(), &cancel).await;
        assert!(report.fatal.is_none());
        assert!(report.is_complete());
        assert_eq!(report.result.added, 3);
        assert_eq!(report.result.failed, 2);
        assert_eq!(report.added_ids, vec![1, 2, 5]);

        let catalog = PickyCatalog {
            inner: InMemoryCatalog::new(),
            refused: 3,
        };
        let report = feed_records(&catalog, &records(5), &opts(2, FeedStrategy::PreCheck), &Recorder::default(), &cancel).await;
        assert!(report.fatal.is_none());
        assert!(report.is_complete());
        assert_eq!(report.result.added, 4);
        assert_eq!(report.result.failed, 1);
        assert_eq!(report.added_ids, vec![1, 2, 4, 5]);
    }

    #[tokio::test]
    async fn test_unavailable_catalog_aborts_with_partial_summary() {
        let catalog = FlakyCatalog {
            inner: InMemoryCatalog::new(),
            calls_left: AtomicUsize::new(2),
        };
        let cancel = AtomicBool::new(false);
        let report = feed_records(&catalog, &records(30), &opts(10, FeedStrategy::Bulk), &Recorder::default(), &cancel).await;

        assert_eq!(report.result.added, 20);
        assert_eq!(report.processed, 20);
        assert_eq!(report.total, 30);
        assert!(report.fatal.as_deref().unwrap().contains("unavailable"));
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_batch() {
        let catalog = InMemoryCatalog::new();
        let cancel = AtomicBool::new(true);
        let report = feed_records(&catalog, &records(10), &FeedOptions::default(), &Recorder::default(), &cancel).await;
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let catalog = InMemoryCatalog::new();
        let cancel = AtomicBool::new(false);
        let report = feed_records(&catalog, &[], &FeedOptions::default(), &Recorder::default(), &cancel).await;
        assert_eq!(report.result, ImportBatchResult::default());
        assert!(report.is_complete());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("bulk".parse::<FeedStrategy>().unwrap(), FeedStrategy::Bulk);
        assert_eq!("precheck".parse::<FeedStrategy>().unwrap(), FeedStrategy::PreCheck);
        assert!("parallel".parse::<FeedStrategy>().is_err());
    }

    #[test]
    fn test_progress_report_json_shape() {
        let report = ProgressReport {
            processed: 5,
            total: 10,
            added_count: 4,
            duplicate_count: 1,
            error_count: 0,
            elapsed_ms: 120,
        };
        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["addedCount"], 4);
        assert_eq!(json["duplicateCount"], 1);
        assert_eq!(json["errorCount"], 0);
        assert_eq!(json["elapsedTime"], 120);
    }
}
