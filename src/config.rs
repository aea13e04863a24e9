//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/sites.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:3000"
//! stats_cache_ttl_ms = 5000
//! page_size = 50
//!
//! [import]
//! batch_size = 500
//! strategy = "bulk"
//! ```
//!
//! Only `[db]` is required; every other section falls back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use site_catalog_core::feed::{FeedOptions, FeedStrategy, DEFAULT_BATCH_SIZE};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long `GET /api/stats/cached` may serve a memoized answer.
    #[serde(default = "default_stats_cache_ttl_ms")]
    pub stats_cache_ttl_ms: u64,
    /// Default page size for paginated site listings.
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            stats_cache_ttl_ms: default_stats_cache_ttl_ms(),
            page_size: default_page_size(),
        }
    }
}

impl ServerConfig {
    pub fn stats_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.stats_cache_ttl_ms)
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_stats_cache_ttl_ms() -> u64 {
    5000
}
fn default_page_size() -> i64 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub strategy: FeedStrategy,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            strategy: FeedStrategy::default(),
        }
    }
}

impl ImportConfig {
    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            batch_size: self.batch_size,
            strategy: self.strategy,
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Config {
    /// Config pointing at `db_path` with every other setting defaulted.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            server: ServerConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.import.batch_size == 0 {
        anyhow::bail!("import.batch_size must be > 0");
    }

    if config.server.page_size < 1 {
        anyhow::bail!("server.page_size must be >= 1");
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str("[db]\npath = \"/tmp/sites.sqlite\"\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.import.batch_size, 500);
        assert_eq!(cfg.import.strategy, FeedStrategy::Bulk);
        assert_eq!(cfg.server.page_size, 50);
        assert_eq!(cfg.server.stats_cache_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_strategy_from_toml() {
        let cfg: Config = toml::from_str(
            "[db]\npath = \"x.sqlite\"\n[import]\nbatch_size = 20\nstrategy = \"precheck\"\n",
        )
        .unwrap();
        assert_eq!(cfg.import.strategy, FeedStrategy::PreCheck);
        assert_eq!(cfg.import.feed_options().batch_size, 20);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let parsed: Result<Config, _> =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[import]\nstrategy = \"parallel\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let cfg: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[import]\nbatch_size = 0\n").unwrap();
        assert!(validate(&cfg).is_err());
    }
}
