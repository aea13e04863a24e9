//! SQLite-backed site catalog.
//!
//! [`SqliteCatalog`] implements the core [`Catalog`] trait for the import
//! pipeline and adds the site and prefix management queries used by the
//! CLI and the HTTP server.
//!
//! Bulk inserts run inside one transaction per batch using
//! `ON CONFLICT(site_id) DO NOTHING`, so existing ids are skipped rather
//! than overwritten and a constraint failure on one row leaves the rest of
//! the batch intact.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use site_catalog_core::catalog::{Catalog, CatalogError, InsertOutcome};
use site_catalog_core::models::{
    CatalogStats, Credentials, InstitutionRecord, Prefix, Site, SiteStatus, DEFAULT_MODIFIED_BY,
};

const SITE_COLUMNS: &str = "site_id, name, url, status, comment, prefix, login, password, \
     date_added, last_modified, modified_by";

/// Filter and paging parameters for [`SqliteCatalog::page_sites`].
#[derive(Debug, Clone)]
pub struct SiteQuery {
    pub status: SiteStatus,
    /// 1-based.
    pub page: i64,
    pub limit: i64,
    /// Exact site id, or a case-insensitive substring of name or url.
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SitePage {
    pub sites: Vec<Site>,
    pub pagination: Pagination,
}

/// Partial site update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub status: Option<SiteStatus>,
    pub comment: Option<String>,
    pub prefix: Option<String>,
    pub credentials: Option<Credentials>,
    pub modified_by: Option<String>,
}

impl SiteUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.status.is_none()
            && self.comment.is_none()
            && self.prefix.is_none()
            && self.credentials.is_none()
    }

    /// Author recorded on the write. Blank or absent means `system`.
    fn author(&self) -> &str {
        self.modified_by
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_MODIFIED_BY)
    }
}

/// Result of a prefix create or rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixWrite {
    /// Written. Carries the stored prefix and how many sites were retagged.
    Done { prefix: Prefix, sites_updated: u64 },
    /// The prefix being renamed does not exist.
    Missing,
    /// Another prefix already uses the requested name.
    Taken,
}

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Cheap liveness probe for health checks.
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    // ============ Sites ============

    /// Every site, newest first.
    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sites ORDER BY date_added DESC, site_id ASC",
            SITE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(site_from_row).collect()
    }

    /// One page of sites in a single status bucket.
    pub async fn page_sites(&self, query: &SiteQuery) -> Result<SitePage> {
        let page = query.page.max(1);
        let limit = query.limit.max(1);
        let offset = (page - 1) * limit;

        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let (total, rows) = match search {
            Some(term) => {
                // Ids are positive, so 0 never matches a non-numeric term.
                let id = term.parse::<i64>().unwrap_or(0);
                let pattern = format!("%{}%", escape_like(term));
                let filter = "status = ? AND (site_id = ? \
                     OR name LIKE ? ESCAPE '\\' OR url LIKE ? ESCAPE '\\')";

                let total: i64 =
                    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM sites WHERE {}", filter))
                        .bind(query.status.as_str())
                        .bind(id)
                        .bind(&pattern)
                        .bind(&pattern)
                        .fetch_one(&self.pool)
                        .await?;

                let rows = sqlx::query(&format!(
                    "SELECT {} FROM sites WHERE {} \
                     ORDER BY date_added DESC, site_id ASC LIMIT ? OFFSET ?",
                    SITE_COLUMNS, filter
                ))
                .bind(query.status.as_str())
                .bind(id)
                .bind(&pattern)
                .bind(&pattern)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sites WHERE status = ?")
                    .bind(query.status.as_str())
                    .fetch_one(&self.pool)
                    .await?;

                let rows = sqlx::query(&format!(
                    "SELECT {} FROM sites WHERE status = ? \
                     ORDER BY date_added DESC, site_id ASC LIMIT ? OFFSET ?",
                    SITE_COLUMNS
                ))
                .bind(query.status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                (total, rows)
            }
        };

        let sites = rows.iter().map(site_from_row).collect::<Result<Vec<_>>>()?;
        let pages = (total + limit - 1) / limit;

        Ok(SitePage {
            sites,
            pagination: Pagination {
                total,
                page,
                limit,
                pages,
            },
        })
    }

    pub async fn get_site(&self, site_id: i64) -> Result<Option<Site>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sites WHERE site_id = ?",
            SITE_COLUMNS
        ))
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(site_from_row).transpose()
    }

    /// Apply `update` to a site and bump `last_modified`. Returns the
    /// updated site, or `None` when the id is unknown.
    ///
    /// Runs as a single statement: only the columns present in `update` are
    /// written, so concurrent updates to different fields both land. Values
    /// are stored as given.
    pub async fn update_site(&self, site_id: i64, update: &SiteUpdate) -> Result<Option<Site>> {
        let credentials = update.credentials.as_ref();

        let row = sqlx::query(&format!(
            r#"
            UPDATE sites
            SET name = COALESCE(?, name),
                url = COALESCE(?, url),
                status = COALESCE(?, status),
                comment = COALESCE(?, comment),
                prefix = COALESCE(?, prefix),
                login = COALESCE(?, login),
                password = COALESCE(?, password),
                last_modified = ?,
                modified_by = ?
            WHERE site_id = ?
            RETURNING {}
            "#,
            SITE_COLUMNS
        ))
        .bind(update.name.as_deref())
        .bind(update.url.as_deref())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.comment.as_deref())
        .bind(update.prefix.as_deref())
        .bind(credentials.map(|c| c.login.as_str()))
        .bind(credentials.map(|c| c.password.as_str()))
        .bind(Utc::now().timestamp_millis())
        .bind(update.author())
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(site_from_row).transpose()
    }

    /// Returns whether a site was deleted.
    pub async fn delete_site(&self, site_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sites WHERE site_id = ?")
            .bind(site_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every site. Prefixes are kept.
    pub async fn delete_all_sites(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sites").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // ============ Stats ============

    pub async fn stats(&self) -> Result<CatalogStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM sites GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = CatalogStats::default();
        for row in &rows {
            let status: String = row.get("status");
            let count: i64 = row.get("n");
            stats.record(status.parse()?, count);
        }
        Ok(stats)
    }

    /// Number of sites that carry a non-empty URL.
    pub async fn url_coverage(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM sites WHERE url != ''")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ============ Prefixes ============

    pub async fn list_prefixes(&self) -> Result<Vec<Prefix>> {
        let rows = sqlx::query("SELECT name, color FROM prefixes ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Prefix {
                name: row.get("name"),
                color: row.get("color"),
            })
            .collect())
    }

    pub async fn create_prefix(&self, prefix: &Prefix) -> Result<PrefixWrite> {
        let result = sqlx::query("INSERT OR IGNORE INTO prefixes (name, color) VALUES (?, ?)")
            .bind(&prefix.name)
            .bind(&prefix.color)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(PrefixWrite::Taken);
        }
        Ok(PrefixWrite::Done {
            prefix: prefix.clone(),
            sites_updated: 0,
        })
    }

    /// Rename and/or recolor a prefix. A rename is carried over to every
    /// site tagged with the old name.
    pub async fn update_prefix(
        &self,
        old_name: &str,
        new_name: Option<&str>,
        color: Option<&str>,
    ) -> Result<PrefixWrite> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT name, color FROM prefixes WHERE name = ?")
            .bind(old_name)
            .fetch_optional(&mut *tx)
            .await?;
        let existing = match existing {
            Some(row) => Prefix {
                name: row.get("name"),
                color: row.get("color"),
            },
            None => return Ok(PrefixWrite::Missing),
        };

        let updated = Prefix {
            name: new_name.unwrap_or(&existing.name).to_string(),
            color: color.unwrap_or(&existing.color).to_string(),
        };

        let renamed = updated.name != existing.name;
        if renamed {
            let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prefixes WHERE name = ?")
                .bind(&updated.name)
                .fetch_one(&mut *tx)
                .await?;
            if taken > 0 {
                return Ok(PrefixWrite::Taken);
            }
        }

        sqlx::query("UPDATE prefixes SET name = ?, color = ? WHERE name = ?")
            .bind(&updated.name)
            .bind(&updated.color)
            .bind(old_name)
            .execute(&mut *tx)
            .await?;

        let mut sites_updated = 0;
        if renamed {
            sites_updated = sqlx::query(
                "UPDATE sites SET prefix = ?, last_modified = ? WHERE prefix = ?",
            )
            .bind(&updated.name)
            .bind(Utc::now().timestamp_millis())
            .bind(old_name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;

        Ok(PrefixWrite::Done {
            prefix: updated,
            sites_updated,
        })
    }

    /// Delete a prefix and clear it from every site that used it. Returns
    /// `None` when the prefix does not exist, otherwise the number of sites
    /// that were untagged.
    pub async fn delete_prefix(&self, name: &str) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM prefixes WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Ok(None);
        }

        let cleared = sqlx::query("UPDATE sites SET prefix = '', last_modified = ? WHERE prefix = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(Some(cleared))
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn insert_many(
        &self,
        records: &[InstitutionRecord],
    ) -> Result<Vec<InsertOutcome>, CatalogError> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(classify)?;
        let mut outcomes = Vec::with_capacity(records.len());

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO sites (site_id, name, url, status, date_added, last_modified, modified_by)
                VALUES (?, ?, ?, 'general', ?, ?, ?)
                ON CONFLICT(site_id) DO NOTHING
                "#,
            )
            .bind(record.id)
            .bind(&record.name)
            .bind(&record.url)
            .bind(now)
            .bind(now)
            .bind(DEFAULT_MODIFIED_BY)
            .execute(&mut *tx)
            .await;

            let outcome = match result {
                Ok(done) if done.rows_affected() == 0 => InsertOutcome::Duplicate,
                Ok(_) => InsertOutcome::Added,
                // Constraint violations abort only the offending statement.
                Err(sqlx::Error::Database(e)) if !is_locked(&*e) => {
                    InsertOutcome::Failed(e.message().to_string())
                }
                Err(e) => return Err(classify(e)),
            };
            outcomes.push(outcome);
        }

        tx.commit().await.map_err(classify)?;
        Ok(outcomes)
    }

    async fn find(&self, site_id: i64) -> Result<Option<Site>, CatalogError> {
        self.get_site(site_id)
            .await
            .map_err(|e| match e.downcast::<sqlx::Error>() {
                Ok(e) => classify(e),
                Err(e) => CatalogError::Backend(e.to_string()),
            })
    }
}

/// Map a driver error onto the catalog error tiers.
///
/// A database that stays busy or locked past the connection's busy timeout
/// counts as unavailable, which aborts an import under either strategy.
fn classify(err: sqlx::Error) -> CatalogError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => CatalogError::Unavailable(err.to_string()),
        sqlx::Error::Database(e) if is_locked(&*e) => {
            CatalogError::Unavailable(e.message().to_string())
        }
        sqlx::Error::Database(e) => CatalogError::Rejected(e.message().to_string()),
        other => CatalogError::Backend(other.to_string()),
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including their extended codes.
fn is_locked(err: &dyn sqlx::error::DatabaseError) -> bool {
    sqlite_code_is_locked(err.code().as_deref())
}

fn sqlite_code_is_locked(code: Option<&str>) -> bool {
    code.and_then(|c| c.parse::<i32>().ok())
        .is_some_and(|c| matches!(c & 0xff, 5 | 6))
}

fn site_from_row(row: &SqliteRow) -> Result<Site> {
    let status: String = row.get("status");
    Ok(Site {
        site_id: row.get("site_id"),
        name: row.get("name"),
        url: row.get("url"),
        status: status.parse()?,
        comment: row.get("comment"),
        prefix: row.get("prefix"),
        credentials: Credentials {
            login: row.get("login"),
            password: row.get("password"),
        },
        date_added: from_millis(row.get("date_added"))?,
        last_modified: from_millis(row.get("last_modified"))?,
        modified_by: row.get("modified_by"),
    })
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

/// Escape `%`, `_` and the escape char itself for a `LIKE ... ESCAPE '\'`.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
