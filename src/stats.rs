//! Catalog statistics.
//!
//! `sites stats` prints per-status counts, URL coverage and database size.
//! [`StatsCache`] memoizes the counts for `GET /api/stats/cached` so that a
//! dashboard polling every second does not hit SQLite on every request.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

use site_catalog_core::models::{CatalogStats, SiteStatus};

use crate::config::Config;
use crate::db;
use crate::sqlite_catalog::SqliteCatalog;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let catalog = SqliteCatalog::new(db::connect(config).await?);

    let stats = catalog.stats().await?;
    let with_url = catalog.url_coverage().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Site Catalog — Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Sites:       {}", stats.total);
    for status in SiteStatus::ALL {
        println!("    {:<10} {:>8}", status.as_str(), stats.get(status));
    }
    println!(
        "  With URL:    {} / {} ({}%)",
        with_url,
        stats.total,
        percent(with_url, stats.total)
    );

    let prefixes = catalog.list_prefixes().await?;
    if !prefixes.is_empty() {
        let names: Vec<&str> = prefixes.iter().map(|p| p.name.as_str()).collect();
        println!("  Prefixes:    {}", names.join(", "));
    }
    println!();

    catalog.close().await;
    Ok(())
}

pub(crate) fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Time-bounded memo of the last [`CatalogStats`] answer.
///
/// Every invalidation bumps a generation counter. A reader takes the
/// generation before querying and hands it back to [`StatsCache::put`], so
/// counts computed before a write never land after it.
pub struct StatsCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    generation: u64,
    entry: Option<(Instant, CatalogStats)>,
}

impl StatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// The cached value if it is younger than the TTL.
    pub fn get(&self) -> Option<CatalogStats> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.entry {
            Some((at, stats)) if at.elapsed() < self.ttl => Some(stats),
            _ => None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).generation
    }

    /// Store `stats` computed at `generation`. Dropped if the cache was
    /// invalidated since.
    pub fn put(&self, stats: CatalogStats, generation: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.generation == generation {
            state.entry = Some((Instant::now(), stats));
        }
    }

    /// Drop the cached value. Called after every catalog write.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.generation = state.generation.wrapping_add(1);
        state.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CatalogStats {
        let mut stats = CatalogStats::default();
        stats.record(SiteStatus::General, 4);
        stats
    }

    #[test]
    fn test_cache_serves_until_invalidated() {
        let cache = StatsCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());

        cache.put(sample(), cache.generation());
        assert_eq!(cache.get().map(|s| s.total), Some(4));

        cache.invalidate();
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_counts_from_before_a_write_are_not_cached() {
        let cache = StatsCache::new(Duration::from_secs(60));

        let generation = cache.generation();
        // A write lands while the reader is still querying.
        cache.invalidate();
        cache.put(sample(), generation);
        assert!(cache.get().is_none());

        cache.put(sample(), cache.generation());
        assert!(cache.get().is_some());
    }

    #[test]
    fn test_cache_expires() {
        let cache = StatsCache::new(Duration::ZERO);
        cache.put(sample(), cache.generation());
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 4), 25);
        assert_eq!(percent(0, 0), 0);
    }
}
