//! Catalog abstraction consumed by the batch feeder.
//!
//! The [`Catalog`] trait is the narrow write/lookup surface the import
//! pipeline needs from a site store. The SQLite store in the main crate
//! implements it; [`memory::InMemoryCatalog`] implements it for tests.
//!
//! Errors are split in two tiers: per-record outcomes travel inside
//! [`InsertOutcome`], while [`CatalogError`] is reserved for failures of
//! the call itself. Both feed strategies decide with
//! [`CatalogError::is_fatal`]: a [`CatalogError::Rejected`] call marks the
//! records it carried as failed and the import moves on, anything else
//! aborts it.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{InstitutionRecord, Site};

/// What happened to a single record submitted to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new site was created.
    Added,
    /// A site with this id already existed; nothing was written.
    Duplicate,
    /// The catalog refused the record (validation, constraint).
    Failed(String),
}

/// Errors from catalog calls.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The backing store cannot be reached, or stayed busy or locked past
    /// its timeout. Aborts an import.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    /// The catalog refused the call. Every record in it counts as failed.
    #[error("record rejected: {0}")]
    Rejected(String),
    /// Any other backend failure.
    #[error("catalog error: {0}")]
    Backend(String),
}

impl CatalogError {
    /// Whether an import should stop when it sees this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CatalogError::Rejected(_))
    }
}

/// Write and lookup operations the import pipeline needs from a site store.
///
/// Implementations must be `Send + Sync` so they can be shared with the
/// HTTP server behind an `Arc`.
///
/// | Method | Used by |
/// |--------|---------|
/// | [`insert_many`](Catalog::insert_many) | bulk strategy |
/// | [`find`](Catalog::find) | pre-check strategy |
/// | [`insert_one`](Catalog::insert_one) | pre-check strategy |
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Insert each record as a new `general` site, skipping ids that
    /// already exist. Returns one outcome per input record, in order.
    ///
    /// A failing record must not prevent the remaining records from being
    /// inserted. Return `Err` only when the call as a whole failed.
    async fn insert_many(
        &self,
        records: &[InstitutionRecord],
    ) -> Result<Vec<InsertOutcome>, CatalogError>;

    /// Look up a site by its id.
    async fn find(&self, site_id: i64) -> Result<Option<Site>, CatalogError>;

    /// Insert a single record. Defaults to a one-element [`insert_many`](Catalog::insert_many).
    async fn insert_one(&self, record: &InstitutionRecord) -> Result<InsertOutcome, CatalogError> {
        self.insert_many(std::slice::from_ref(record))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::Backend("insert_many returned no outcome".to_string()))
    }
}
