//! # Site Catalog
//!
//! Loads financial-institution records out of raw text dumps into a SQLite
//! catalog, and serves that catalog to a browser UI over a REST API with a
//! live event stream.
//!
//! The extraction pipeline and the batch feeder live in the
//! `site-catalog-core` crate; this crate adds the storage, the CLI
//! commands, and the HTTP server around them.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌──────────┐
//! │ text dump  │──▶│ extract + dedup  │──▶│  feeder  │
//! └────────────┘   │   (core crate)   │   └────┬─────┘
//!                  └──────────────────┘        ▼
//!                                        ┌──────────┐
//!                                        │  SQLite  │
//!                                        └────┬─────┘
//!                              ┌──────────────┤
//!                              ▼              ▼
//!                         ┌─────────┐   ┌───────────┐
//!                         │   CLI   │   │ HTTP + SSE│
//!                         │ (sites) │   │  (axum)   │
//!                         └─────────┘   └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation and prefix seeding |
//! | [`sqlite_catalog`] | SQLite implementation of the catalog |
//! | [`import`] | `analyze` / `import` commands |
//! | [`progress`] | Import progress reporters |
//! | [`stats`] | Catalog statistics and the stats cache |
//! | [`get`] | Single-site lookup |
//! | [`events`] | Change broadcast and SSE stream |
//! | [`server`] | REST API |

pub mod config;
pub mod db;
pub mod events;
pub mod get;
pub mod import;
pub mod migrate;
pub mod progress;
pub mod server;
pub mod sqlite_catalog;
pub mod stats;
