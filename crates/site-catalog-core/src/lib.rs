//! # Site Catalog Core
//!
//! Pure logic for Site Catalog: the institution extraction pipeline,
//! the catalog abstraction, and the batch feeder that connects them.
//!
//! This crate contains no tokio, sqlx, filesystem, or terminal I/O. The
//! only asynchronous surface is the [`catalog::Catalog`] trait, which the
//! feeder awaits once per batch.
//!
//! ```text
//! text ─▶ fragment ─▶ normalize ─▶ dedup ─▶ feed ─▶ Catalog
//! ```
//!
//! # Example
//!
//! ```rust
//! use site_catalog_core::dedup::extract_institutions;
//!
//! let text = r#"{"institution":{"id":42,"name":"Acme Bank","urlLogonApp":"https://acme/login"}}"#;
//! let extraction = extract_institutions(text);
//! assert_eq!(extraction.records.len(), 1);
//! assert_eq!(extraction.records[0].url, "https://acme/login");
//! ```

pub mod catalog;
pub mod dedup;
pub mod feed;
pub mod fragment;
pub mod models;
pub mod normalize;
