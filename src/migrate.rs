use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use site_catalog_core::models::default_prefixes;

use crate::config::Config;
use crate::db;

/// Create the catalog schema and seed default prefixes. Safe to run on an
/// existing database.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Timestamps are Unix milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            site_id INTEGER PRIMARY KEY CHECK (site_id > 0),
            name TEXT NOT NULL CHECK (length(name) > 0),
            url TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'general'
                CHECK (status IN ('general', '2fa', 'good', 'archive')),
            comment TEXT NOT NULL DEFAULT '',
            prefix TEXT NOT NULL DEFAULT '',
            login TEXT NOT NULL DEFAULT '',
            password TEXT NOT NULL DEFAULT '',
            date_added INTEGER NOT NULL,
            last_modified INTEGER NOT NULL,
            modified_by TEXT NOT NULL DEFAULT 'system'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prefixes (
            name TEXT PRIMARY KEY CHECK (length(name) > 0),
            color TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sites_status ON sites(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sites_status_date_added ON sites(status, date_added DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sites_name ON sites(name)")
        .execute(pool)
        .await?;

    // Seed defaults without clobbering colors an operator already changed.
    let mut seeded = 0u64;
    for prefix in default_prefixes() {
        let result = sqlx::query("INSERT OR IGNORE INTO prefixes (name, color) VALUES (?, ?)")
            .bind(&prefix.name)
            .bind(&prefix.color)
            .execute(pool)
            .await?;
        seeded += result.rows_affected();
    }
    if seeded > 0 {
        info!(count = seeded, "seeded default prefixes");
    }

    Ok(())
}
