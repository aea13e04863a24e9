//! Site lookup by id for `sites get`.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db;
use crate::sqlite_catalog::SqliteCatalog;

pub async fn run_get(config: &Config, site_id: i64) -> Result<()> {
    let catalog = SqliteCatalog::new(db::connect(config).await?);
    let site = catalog.get_site(site_id).await;
    catalog.close().await;

    let site = match site? {
        Some(site) => site,
        None => bail!("site not found: {}", site_id),
    };

    println!("--- Site ---");
    println!("site_id:       {}", site.site_id);
    println!("name:          {}", site.name);
    println!(
        "url:           {}",
        if site.url.is_empty() { "(none)" } else { &site.url }
    );
    println!("status:        {}", site.status);
    if !site.prefix.is_empty() {
        println!("prefix:        {}", site.prefix);
    }
    if !site.comment.is_empty() {
        println!("comment:       {}", site.comment);
    }
    if !site.credentials.login.is_empty() {
        println!("login:         {}", site.credentials.login);
    }
    if !site.credentials.password.is_empty() {
        println!("password:      ********");
    }
    println!("date_added:    {}", format_ts_iso(&site.date_added));
    println!("last_modified: {}", format_ts_iso(&site.last_modified));
    println!("modified_by:   {}", site.modified_by);

    Ok(())
}

fn format_ts_iso(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
