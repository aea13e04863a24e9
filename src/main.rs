//! # Site Catalog CLI (`sites`)
//!
//! ## Usage
//!
//! ```bash
//! sites --config ./config/sites.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sites init` | Create the SQLite database, schema and default prefixes |
//! | `sites analyze <file>` | Run extraction only and report what was found |
//! | `sites import <file>` | Extract and load institutions into the catalog |
//! | `sites stats` | Per-status counts and URL coverage |
//! | `sites get <id>` | Print one site |
//! | `sites serve` | Start the REST API and live event stream |
//!
//! ## Examples
//!
//! ```bash
//! sites analyze ./dumps/institutions.txt --output parsed-institutions.json
//! sites import ./dumps/institutions.txt --progress json
//! sites import ./dumps/institutions.txt --replace --yes
//! sites serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use site_catalog::{config, get, import, migrate, server, stats};
use site_catalog::import::ImportArgs;
use site_catalog::progress::ProgressMode;
use site_catalog_core::feed::FeedStrategy;

/// Site Catalog: loads financial-institution records from raw text dumps
/// into a SQLite catalog and serves them to a browser UI.
#[derive(Parser)]
#[command(name = "sites", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sites.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and seed default prefixes.
    ///
    /// Idempotent: running it on an existing database is safe.
    Init,

    /// Extract institutions from a text dump without touching the database.
    Analyze {
        /// Source text file.
        file: PathBuf,

        /// Write parsed records as JSON `{ totalFound, institutions }`.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Number of sample records to print.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Extract institutions from a text dump and load them into the catalog.
    ///
    /// Ids already in the catalog are skipped, so re-running an interrupted
    /// import is safe.
    Import {
        /// Source text file.
        file: PathBuf,

        /// Records per catalog request. Overrides `[import] batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// `bulk` or `precheck`. Overrides `[import] strategy`.
        #[arg(long)]
        strategy: Option<String>,

        /// Extract and validate without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Delete every existing site before importing.
        #[arg(long)]
        replace: bool,

        /// Do not ask for confirmation with `--replace`.
        #[arg(long, short = 'y')]
        yes: bool,

        /// Progress on stderr: `human`, `json`, or `off`.
        /// Default: `human` when stderr is a TTY, `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show catalog statistics.
    Stats,

    /// Print one site by id.
    Get {
        /// Site id.
        id: i64,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let load_config = || config::load_config(&cli.config);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&load_config()?).await?;
            println!("Database initialized successfully.");
        }
        Commands::Analyze {
            file,
            output,
            limit,
        } => {
            import::run_analyze(&file, output.as_deref(), limit)?;
        }
        Commands::Import {
            file,
            batch_size,
            strategy,
            dry_run,
            replace,
            yes,
            progress,
        } => {
            let strategy = strategy.as_deref().map(str::parse::<FeedStrategy>).transpose()?;
            let progress = match progress.as_deref() {
                Some(mode) => mode.parse::<ProgressMode>()?,
                None => ProgressMode::default_for_tty(),
            };
            let args = ImportArgs {
                path: file,
                batch_size,
                strategy,
                dry_run,
                replace,
                yes,
                progress,
            };
            import::run_import(&load_config()?, &args).await?;
        }
        Commands::Stats => {
            stats::run_stats(&load_config()?).await?;
        }
        Commands::Get { id } => {
            get::run_get(&load_config()?, id).await?;
        }
        Commands::Serve => {
            server::run_server(&load_config()?).await?;
        }
    }

    Ok(())
}
