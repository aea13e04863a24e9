//! In-memory [`Catalog`] implementation for tests and dry runs.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Applies the same record
//! validation as the SQLite schema (positive id, non-empty name) so that
//! rejection paths can be exercised without a database.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{InstitutionRecord, Site};

use super::{Catalog, CatalogError, InsertOutcome};

/// In-memory site catalog.
pub struct InMemoryCatalog {
    sites: RwLock<HashMap<i64, Site>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            sites: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sites.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all sites, ordered by id.
    pub fn sites(&self) -> Vec<Site> {
        let mut sites: Vec<Site> = self.sites.read().unwrap().values().cloned().collect();
        sites.sort_by_key(|s| s.site_id);
        sites
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(record: &InstitutionRecord) -> Option<String> {
    if record.id <= 0 {
        Some(format!("site id must be positive, got {}", record.id))
    } else if record.name.is_empty() {
        Some(format!("site {} has an empty name", record.id))
    } else {
        None
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn insert_many(
        &self,
        records: &[InstitutionRecord],
    ) -> Result<Vec<InsertOutcome>, CatalogError> {
        let now = Utc::now();
        let mut sites = self.sites.write().unwrap();
        let outcomes = records
            .iter()
            .map(|record| {
                if let Some(reason) = validate(record) {
                    return InsertOutcome::Failed(reason);
                }
                if sites.contains_key(&record.id) {
                    return InsertOutcome::Duplicate;
                }
                sites.insert(record.id, Site::from_record(record, now));
                InsertOutcome::Added
            })
            .collect();
        Ok(outcomes)
    }

    async fn find(&self, site_id: i64) -> Result<Option<Site>, CatalogError> {
        Ok(self.sites.read().unwrap().get(&site_id).cloned())
    }
}
