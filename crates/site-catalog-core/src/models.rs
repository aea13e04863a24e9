//! Core data models shared by the pipeline and the catalog.
//!
//! [`InstitutionRecord`] is what the extraction pipeline produces;
//! [`Site`] is what the catalog stores once a record has been accepted.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized institution scraped from the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
}

impl InstitutionRecord {
    pub fn new(id: i64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Bucket a site is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SiteStatus {
    #[default]
    #[serde(rename = "general")]
    General,
    #[serde(rename = "2fa")]
    TwoFactor,
    #[serde(rename = "good")]
    Good,
    #[serde(rename = "archive")]
    Archive,
}

impl SiteStatus {
    pub const ALL: [SiteStatus; 4] = [
        SiteStatus::General,
        SiteStatus::TwoFactor,
        SiteStatus::Good,
        SiteStatus::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::General => "general",
            SiteStatus::TwoFactor => "2fa",
            SiteStatus::Good => "good",
            SiteStatus::Archive => "archive",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "general" => Ok(SiteStatus::General),
            "2fa" => Ok(SiteStatus::TwoFactor),
            "good" => Ok(SiteStatus::Good),
            "archive" => Ok(SiteStatus::Archive),
            other => bail!(
                "invalid status: '{}'. Must be general, 2fa, good, or archive.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
}

/// A catalog entry. Serialized in camelCase to match the REST payloads
/// consumed by the browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub site_id: i64,
    pub name: String,
    pub url: String,
    pub status: SiteStatus,
    pub comment: String,
    pub prefix: String,
    pub credentials: Credentials,
    pub date_added: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub modified_by: String,
}

/// Value of `modified_by` for rows not touched by a named operator.
pub const DEFAULT_MODIFIED_BY: &str = "system";

impl Site {
    /// Build a fresh `general` site from an imported record.
    pub fn from_record(record: &InstitutionRecord, now: DateTime<Utc>) -> Self {
        Self {
            site_id: record.id,
            name: record.name.clone(),
            url: record.url.clone(),
            status: SiteStatus::General,
            comment: String::new(),
            prefix: String::new(),
            credentials: Credentials::default(),
            date_added: now,
            last_modified: now,
            modified_by: DEFAULT_MODIFIED_BY.to_string(),
        }
    }
}

/// A colored tag that can be attached to sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub name: String,
    pub color: String,
}

/// Prefixes seeded on first initialization.
pub fn default_prefixes() -> Vec<Prefix> {
    [
        ("Plaid", "#3498db"),
        ("Finicity", "#27ae60"),
        ("Yodlee", "#e74c3c"),
    ]
    .into_iter()
    .map(|(name, color)| Prefix {
        name: name.to_string(),
        color: color.to_string(),
    })
    .collect()
}

/// Per-bucket site counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total: i64,
    pub general: i64,
    #[serde(rename = "2fa")]
    pub two_factor: i64,
    pub good: i64,
    pub archive: i64,
}

impl CatalogStats {
    /// Add `count` sites to the given bucket and to the total.
    pub fn record(&mut self, status: SiteStatus, count: i64) {
        match status {
            SiteStatus::General => self.general += count,
            SiteStatus::TwoFactor => self.two_factor += count,
            SiteStatus::Good => self.good += count,
            SiteStatus::Archive => self.archive += count,
        }
        self.total += count;
    }

    pub fn get(&self, status: SiteStatus) -> i64 {
        match status {
            SiteStatus::General => self.general,
            SiteStatus::TwoFactor => self.two_factor,
            SiteStatus::Good => self.good,
            SiteStatus::Archive => self.archive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in SiteStatus::ALL {
            assert_eq!(status.as_str().parse::<SiteStatus>().unwrap(), status);
        }
        assert!("pending".parse::<SiteStatus>().is_err());
    }

    #[test]
    fn status_serializes_with_bucket_names() {
        let json = serde_json::to_string(&SiteStatus::TwoFactor).unwrap();
        assert_eq!(json, "\"2fa\"");
    }

    #[test]
    fn stats_record_updates_total() {
        let mut stats = CatalogStats::default();
        stats.record(SiteStatus::General, 3);
        stats.record(SiteStatus::TwoFactor, 2);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.get(SiteStatus::TwoFactor), 2);

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["2fa"], 2);
    }

    #[test]
    fn site_from_record_defaults_to_general() {
        let record = InstitutionRecord::new(42, "Acme Bank", "https://acme/login");
        let site = Site::from_record(&record, Utc::now());
        assert_eq!(site.status, SiteStatus::General);
        assert_eq!(site.site_id, 42);
        assert_eq!(site.modified_by, "system");
        let json = serde_json::to_value(&site).unwrap();
        assert_eq!(json["siteId"], 42);
    }
}
