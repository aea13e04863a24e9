//! SQLite catalog driven through the core feeder.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tempfile::TempDir;

use site_catalog::config::Config;
use site_catalog::sqlite_catalog::{PrefixWrite, SiteQuery, SiteUpdate, SqliteCatalog};
use site_catalog::{db, migrate};
use site_catalog_core::catalog::{Catalog, InsertOutcome};
use site_catalog_core::feed::{feed_records, FeedOptions, FeedStrategy, ProgressReport, ProgressSink};
use site_catalog_core::models::{InstitutionRecord, Prefix, SiteStatus};

struct Quiet;

impl ProgressSink for Quiet {
    fn report(&self, _report: &ProgressReport) {}
}

async fn open_catalog(tmp: &TempDir) -> SqliteCatalog {
    let cfg = Config::with_db_path(tmp.path().join("data/sites.sqlite"));
    migrate::run_migrations(&cfg).await.unwrap();
    SqliteCatalog::new(db::connect(&cfg).await.unwrap())
}

fn records(n: i64) -> Vec<InstitutionRecord> {
    (1..=n)
        .map(|i| InstitutionRecord::new(i, format!("Bank {}", i), format!("https://bank{}.example", i)))
        .collect()
}

#[tokio::test]
async fn test_feed_is_idempotent_for_both_strategies() {
    for strategy in [FeedStrategy::Bulk, FeedStrategy::PreCheck] {
        let tmp = TempDir::new().unwrap();
        let catalog = open_catalog(&tmp).await;
        let recs = records(12);
        let options = FeedOptions {
            batch_size: 5,
            strategy,
        };
        let cancel = AtomicBool::new(false);

        let first = feed_records(&catalog, &recs, &options, &Quiet, &cancel).await;
        assert_eq!(first.result.added, 12, "{} first run", strategy);
        assert_eq!(first.result.skipped, 0);
        assert!(first.is_complete());

        let second = feed_records(&catalog, &recs, &options, &Quiet, &cancel).await;
        assert_eq!(second.result.added, 0, "{} second run", strategy);
        assert_eq!(second.result.skipped, 12);
        assert!(second.added_ids.is_empty());

        assert_eq!(catalog.stats().await.unwrap().general, 12);
    }
}

#[tokio::test]
async fn test_constraint_failure_does_not_sink_the_batch() {
    let tmp = TempDir::new().unwrap();
    let catalog = open_catalog(&tmp).await;

    let batch = vec![
        InstitutionRecord::new(1, "One", ""),
        InstitutionRecord::new(-5, "Negative", ""),
        InstitutionRecord::new(2, "", ""),
        InstitutionRecord::new(3, "Three", ""),
    ];
    let outcomes = catalog.insert_many(&batch).await.unwrap();

    assert_eq!(outcomes[0], InsertOutcome::Added);
    assert!(matches!(outcomes[1], InsertOutcome::Failed(_)));
    assert!(matches!(outcomes[2], InsertOutcome::Failed(_)));
    assert_eq!(outcomes[3], InsertOutcome::Added);
    assert_eq!(catalog.stats().await.unwrap().total, 2);
}

#[tokio::test]
async fn test_existing_site_is_not_overwritten() {
    let tmp = TempDir::new().unwrap();
    let catalog = open_catalog(&tmp).await;

    catalog
        .insert_one(&InstitutionRecord::new(42, "Acme Bank", "https://acme/login"))
        .await
        .unwrap();
    let update = SiteUpdate {
        status: Some(SiteStatus::Good),
        comment: Some("verified".to_string()),
        ..SiteUpdate::default()
    };
    catalog.update_site(42, &update).await.unwrap().unwrap();

    let outcome = catalog
        .insert_one(&InstitutionRecord::new(42, "Acme Renamed", ""))
        .await
        .unwrap();
    assert_eq!(outcome, InsertOutcome::Duplicate);

    let site = catalog.find(42).await.unwrap().unwrap();
    assert_eq!(site.name, "Acme Bank");
    assert_eq!(site.status, SiteStatus::Good);
    assert_eq!(site.comment, "verified");
    assert!(site.last_modified >= site.date_added);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_to_different_fields_both_land() {
    let tmp = TempDir::new().unwrap();
    let catalog = Arc::new(open_catalog(&tmp).await);
    catalog.insert_many(&records(50)).await.unwrap();

    for round in 1..=50 {
        let comment = SiteUpdate {
            comment: Some(format!("checked {}", round)),
            ..SiteUpdate::default()
        };
        let prefix = SiteUpdate {
            prefix: Some("Plaid".to_string()),
            ..SiteUpdate::default()
        };

        let a = tokio::spawn({
            let catalog = Arc::clone(&catalog);
            async move { catalog.update_site(round, &comment).await.unwrap() }
        });
        let b = tokio::spawn({
            let catalog = Arc::clone(&catalog);
            async move { catalog.update_site(round, &prefix).await.unwrap() }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let site = catalog.get_site(round).await.unwrap().unwrap();
        assert_eq!(site.comment, format!("checked {}", round), "site {}", round);
        assert_eq!(site.prefix, "Plaid", "site {}", round);
        assert_eq!(site.name, format!("Bank {}", round));
    }
}

#[tokio::test]
async fn test_update_returns_stored_row_and_keeps_values_verbatim() {
    let tmp = TempDir::new().unwrap();
    let catalog = open_catalog(&tmp).await;
    catalog
        .insert_one(&InstitutionRecord::new(5, "Five", "https://five"))
        .await
        .unwrap();

    let update = SiteUpdate {
        name: Some("  Five Bank ".to_string()),
        modified_by: Some("ops".to_string()),
        ..SiteUpdate::default()
    };
    let returned = catalog.update_site(5, &update).await.unwrap().unwrap();
    assert_eq!(returned.name, "  Five Bank ");
    assert_eq!(returned.url, "https://five");
    assert_eq!(returned.modified_by, "ops");
    assert_eq!(returned, catalog.get_site(5).await.unwrap().unwrap());

    assert!(catalog.update_site(404, &update).await.unwrap().is_none());
}

#[tokio::test]
async fn test_page_search_escapes_wildcards() {
    let tmp = TempDir::new().unwrap();
    let catalog = open_catalog(&tmp).await;
    catalog
        .insert_many(&[
            InstitutionRecord::new(1, "100% Bank", ""),
            InstitutionRecord::new(2, "Other Bank", ""),
        ])
        .await
        .unwrap();

    let page = catalog
        .page_sites(&SiteQuery {
            status: SiteStatus::General,
            page: 1,
            limit: 10,
            search: Some("%".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.sites[0].site_id, 1);
}

#[tokio::test]
async fn test_prefix_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let catalog = open_catalog(&tmp).await;
    catalog
        .insert_one(&InstitutionRecord::new(1, "One", ""))
        .await
        .unwrap();

    let custom = Prefix {
        name: "MX".to_string(),
        color: "#123456".to_string(),
    };
    assert!(matches!(
        catalog.create_prefix(&custom).await.unwrap(),
        PrefixWrite::Done { .. }
    ));
    assert_eq!(
        catalog.create_prefix(&custom).await.unwrap(),
        PrefixWrite::Taken
    );

    let tag = SiteUpdate {
        prefix: Some("MX".to_string()),
        ..SiteUpdate::default()
    };
    catalog.update_site(1, &tag).await.unwrap();

    assert_eq!(
        catalog.update_prefix("MX", Some("Plaid"), None).await.unwrap(),
        PrefixWrite::Taken
    );
    assert_eq!(
        catalog.update_prefix("Nope", Some("X"), None).await.unwrap(),
        PrefixWrite::Missing
    );

    match catalog.update_prefix("MX", Some("MX2"), None).await.unwrap() {
        PrefixWrite::Done {
            prefix,
            sites_updated,
        } => {
            assert_eq!(prefix.color, "#123456");
            assert_eq!(sites_updated, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(catalog.get_site(1).await.unwrap().unwrap().prefix, "MX2");

    assert_eq!(catalog.delete_prefix("MX2").await.unwrap(), Some(1));
    assert_eq!(catalog.get_site(1).await.unwrap().unwrap().prefix, "");
    assert_eq!(catalog.delete_prefix("MX2").await.unwrap(), None);
}

#[tokio::test]
async fn test_closed_pool_aborts_feed() {
    let tmp = TempDir::new().unwrap();
    let catalog = open_catalog(&tmp).await;
    catalog.close().await;

    let recs = records(3);
    let report = feed_records(
        &catalog,
        &recs,
        &FeedOptions::default(),
        &Quiet,
        &AtomicBool::new(false),
    )
    .await;

    assert!(report.fatal.is_some());
    assert_eq!(report.processed, 0);
    assert!(!report.is_complete());
}
