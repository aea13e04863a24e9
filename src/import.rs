//! `sites analyze` and `sites import`.
//!
//! Both commands read a raw text dump, run the extraction pipeline, and
//! print what was found. `import` then feeds the records into the SQLite
//! catalog batch by batch. [`import_content`] is shared with the HTTP
//! import endpoint.

use std::collections::HashSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use site_catalog_core::catalog::memory::InMemoryCatalog;
use site_catalog_core::catalog::Catalog;
use site_catalog_core::dedup::{extract_institutions, Extraction};
use site_catalog_core::feed::{feed_records, FeedOptions, FeedReport, FeedStrategy};
use site_catalog_core::models::InstitutionRecord;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::progress::{format_number, NoProgress, ProgressMode};
use crate::sqlite_catalog::SqliteCatalog;
use crate::stats::percent;

/// Records shown in the sample listing.
const SAMPLE_SIZE: usize = 10;

/// Command-line options for `sites import`.
#[derive(Debug, Clone)]
pub struct ImportArgs {
    pub path: PathBuf,
    /// Overrides `[import] batch_size`.
    pub batch_size: Option<usize>,
    /// Overrides `[import] strategy`.
    pub strategy: Option<FeedStrategy>,
    pub dry_run: bool,
    /// Delete every site before importing.
    pub replace: bool,
    /// Skip the `--replace` confirmation prompt.
    pub yes: bool,
    pub progress: ProgressMode,
}

/// JSON written by `sites analyze --output`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParsedInstitutions<'a> {
    total_found: usize,
    institutions: &'a [InstitutionRecord],
}

/// Outcome of running the pipeline and the feeder over one input.
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub extraction: Extraction,
    pub report: FeedReport,
}

impl ImportOutcome {
    /// Records that created a new site, in source order.
    pub fn added_records(&self) -> Vec<InstitutionRecord> {
        let added: HashSet<i64> = self.report.added_ids.iter().copied().collect();
        self.extraction
            .records
            .iter()
            .filter(|r| added.contains(&r.id))
            .cloned()
            .collect()
    }
}

/// Read a source file as UTF-8, replacing invalid sequences.
pub fn read_source(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    if matches!(text, std::borrow::Cow::Owned(_)) {
        warn!(file = %path.display(), "input contains invalid UTF-8; bad bytes replaced");
    }
    Ok(text.into_owned())
}

/// Extract records from `content` and feed them into `catalog`.
///
/// Extraction is CPU-bound on large dumps, so it runs on the blocking pool.
pub async fn import_content(
    catalog: &dyn Catalog,
    content: String,
    options: &FeedOptions,
) -> Result<ImportOutcome> {
    let extraction = tokio::task::spawn_blocking(move || extract_institutions(&content)).await?;
    let cancel = AtomicBool::new(false);
    let report = feed_records(catalog, &extraction.records, options, &NoProgress, &cancel).await;
    Ok(ImportOutcome { extraction, report })
}

/// Run extraction only and print what was found.
pub fn run_analyze(path: &Path, output: Option<&Path>, limit: usize) -> Result<()> {
    let text = read_source(path)?;
    let extraction = extract_institutions(&text);

    print_extraction(path, &text, &extraction);
    print_sample(&extraction.records, limit);

    if let Some(out) = output {
        let json = serde_json::to_string_pretty(&ParsedInstitutions {
            total_found: extraction.records.len(),
            institutions: &extraction.records,
        })?;
        std::fs::write(out, json)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        println!();
        println!("Saved {} records to {}", extraction.records.len(), out.display());
    }

    Ok(())
}

/// Extract and feed one file into the configured catalog.
pub async fn run_import(config: &Config, args: &ImportArgs) -> Result<()> {
    let text = read_source(&args.path)?;
    let extraction = extract_institutions(&text);
    print_extraction(&args.path, &text, &extraction);

    if extraction.records.is_empty() {
        bail!("No institutions found in {}", args.path.display());
    }

    let mut options = config.import.feed_options();
    if let Some(batch_size) = args.batch_size {
        if batch_size == 0 {
            bail!("--batch-size must be > 0");
        }
        options.batch_size = batch_size;
    }
    if let Some(strategy) = args.strategy {
        options.strategy = strategy;
    }

    if args.dry_run {
        return dry_run(&extraction, &options).await;
    }

    migrate::run_migrations(config).await?;
    let catalog = SqliteCatalog::new(db::connect(config).await?);

    if args.replace {
        if !args.yes && !confirm_replace()? {
            catalog.close().await;
            bail!("Import aborted: --replace was not confirmed");
        }
        let removed = catalog.delete_all_sites().await?;
        info!(removed, "cleared catalog before import");
        println!("Removed {} existing sites", format_number(removed));
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupt received; stopping after the current batch...");
                cancel.store(true, Ordering::SeqCst);
            }
        })
    };

    info!(
        records = extraction.records.len(),
        batch_size = options.batch_size,
        strategy = %options.strategy,
        "starting import"
    );
    let sink = args.progress.sink();
    let report = feed_records(&catalog, &extraction.records, &options, sink.as_ref(), &cancel).await;
    watcher.abort();

    print_report(&report);
    catalog.close().await;

    if let Some(fatal) = &report.fatal {
        bail!(
            "Import aborted after {} of {} records: {}",
            report.processed,
            report.total,
            fatal
        );
    }
    if report.cancelled {
        bail!(
            "Import cancelled after {} of {} records; re-run to continue",
            report.processed,
            report.total
        );
    }

    Ok(())
}

async fn dry_run(extraction: &Extraction, options: &FeedOptions) -> Result<()> {
    let scratch = InMemoryCatalog::new();
    let outcome_report = feed_records(
        &scratch,
        &extraction.records,
        options,
        &NoProgress,
        &AtomicBool::new(false),
    )
    .await;

    print_sample(&extraction.records, SAMPLE_SIZE);
    println!();
    println!(
        "Dry run: {} records would be sent in {} batches of up to {} ({} strategy); {} rejected by validation.",
        format_number(outcome_report.result.added),
        extraction.records.len().div_ceil(options.batch_size.max(1)),
        options.batch_size,
        options.strategy,
        outcome_report.result.failed,
    );
    println!("No changes were written.");
    Ok(())
}

/// Ask on stdin for a literal `yes`. EOF counts as no.
fn confirm_replace() -> Result<bool> {
    eprintln!("--replace will delete ALL existing sites before importing.");
    eprint!("Type 'yes' to continue: ");
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

fn print_extraction(path: &Path, text: &str, extraction: &Extraction) {
    let stats = &extraction.stats;
    let with_url = extraction.with_url() as i64;
    let unique = stats.unique as i64;

    println!("Source:        {} ({} chars)", path.display(), format_number(text.chars().count() as u64));
    println!("Fragments:     {}", format_number(stats.fragments as u64));
    println!("Unterminated:  {}", stats.unterminated);
    println!("Malformed:     {}", stats.malformed);
    println!("Duplicates:    {}", format_number(stats.duplicates as u64));
    println!("Unique:        {}", format_number(stats.unique as u64));
    println!(
        "With URL:      {} / {} ({}%)",
        format_number(with_url as u64),
        format_number(unique as u64),
        percent(with_url, unique)
    );
}

fn print_sample(records: &[InstitutionRecord], limit: usize) {
    if records.is_empty() || limit == 0 {
        return;
    }
    println!();
    println!("First {} records:", limit.min(records.len()));
    for record in records.iter().take(limit) {
        let url = if record.url.is_empty() {
            "(no url)"
        } else {
            record.url.as_str()
        };
        println!("  {:>8}  {}  {}", record.id, record.name, url);
    }
}

fn print_report(report: &FeedReport) {
    println!();
    if report.is_complete() {
        println!("Import complete");
    } else if report.fatal.is_some() {
        println!("Import aborted");
    } else {
        println!("Import cancelled");
    }
    println!("  Processed:   {} / {}", format_number(report.processed), format_number(report.total));
    println!("  Added:       {}", format_number(report.result.added));
    println!("  Skipped:     {} (already present)", format_number(report.result.skipped));
    println!("  Failed:      {}", format_number(report.result.failed));
    println!("  Elapsed:     {:.1}s", report.elapsed.as_secs_f64());
    if let Some(fatal) = &report.fatal {
        println!("  Fatal:       {}", fatal);
    }
}
