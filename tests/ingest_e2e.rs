//! End-to-end runs against a fake item API over HTTP

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{fail_item, null_item, start_fake_api, test_config};
use hn_dl::{CommitStrategy, Event, Ingester, ItemId, RunMode, run_with_shutdown};
use tempfile::tempdir;

#[tokio::test]
async fn test_run_from_upstream_max_item() {
    let server = start_fake_api(105).await;
    fail_item(&server, 101, 500).await;
    null_item(&server, 102).await;

    let dir = tempdir().unwrap();
    let config = test_config(&server, &dir.path().join("hn.db"), None, 100, 3);
    let ingester = Ingester::new(config).await.unwrap();

    let summary = ingester.run().await.unwrap();

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.attempted, 6);
    assert_eq!(summary.inserted, 4);
    assert_eq!(summary.fetch_failed, 2);
    assert_eq!(summary.missing, 1);
    assert_eq!(summary.write_failed, 0);
    assert!(!summary.cancelled);

    let db = &ingester.db;
    for id in [105, 104, 103, 100] {
        assert!(db.get_item(ItemId(id)).await.unwrap().is_some(), "item {id} missing");
    }
    assert!(db.get_item(ItemId(101)).await.unwrap().is_none());
    assert!(db.get_item(ItemId(102)).await.unwrap().is_none());

    let story = db.get_item(ItemId(104)).await.unwrap().unwrap();
    assert_eq!(story.kind.as_deref(), Some("story"));
    assert_eq!(story.title.as_deref(), Some("Story 104"));
    assert_eq!(story.parent, Some(0));
    assert_eq!(story.parts.as_deref(), Some(""));

    let comment = db.get_item(ItemId(105)).await.unwrap().unwrap();
    assert_eq!(comment.kind.as_deref(), Some("comment"));
    assert_eq!(comment.parent, Some(104));
    assert_eq!(comment.title.as_deref(), Some(""));

    let kids = db.get_kids(ItemId(104)).await.unwrap();
    let ordered: Vec<(i64, i64)> = kids.iter().map(|k| (k.kid.0, k.display_order)).collect();
    assert_eq!(ordered, vec![(1043, 0), (1041, 1), (1042, 2)]);

    // kids of stories 104 and 100 only
    assert_eq!(db.count_kids().await.unwrap(), 6);
}

#[tokio::test]
async fn test_rerun_leaves_store_unchanged() {
    let server = start_fake_api(60).await;
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("hn.db");

    let first = Ingester::new(test_config(&server, &db_path, Some(60), 51, 4))
        .await
        .unwrap();
    let summary = first.run().await.unwrap();
    assert_eq!(summary.inserted, 10);
    let items = first.db.count_items().await.unwrap();
    let kids = first.db.count_kids().await.unwrap();
    drop(first);

    let second = Ingester::new(test_config(&server, &db_path, Some(60), 51, 4))
        .await
        .unwrap();
    let summary = second.run().await.unwrap();

    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.already_present, 10);
    assert_eq!(second.db.count_items().await.unwrap(), items);
    assert_eq!(second.db.count_kids().await.unwrap(), kids);
}

#[tokio::test]
async fn test_fill_gaps_requests_only_missing_ids() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("hn.db");

    let flaky = start_fake_api(20).await;
    fail_item(&flaky, 17, 503).await;
    fail_item(&flaky, 12, 500).await;
    let first = Ingester::new(test_config(&flaky, &db_path, Some(20), 11, 5))
        .await
        .unwrap();
    assert_eq!(first.run().await.unwrap().fetch_failed, 2);
    drop(first);

    let healthy = start_fake_api(20).await;
    let second = Ingester::new(test_config(&healthy, &db_path, None, 11, 5))
        .await
        .unwrap();
    let summary = run_with_shutdown(second.clone(), RunMode::FillGaps)
        .await
        .unwrap();

    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.inserted, 2);
    assert_eq!(second.db.count_items().await.unwrap(), 10);

    let mut requested: Vec<String> = healthy
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    requested.sort();
    assert_eq!(requested, vec!["/v0/item/12.json", "/v0/item/17.json"]);
}

#[tokio::test]
async fn test_fill_gaps_does_not_request_ids_missing_upstream() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("hn.db");

    let sparse = start_fake_api(20).await;
    fail_item(&sparse, 18, 404).await;
    null_item(&sparse, 15).await;
    fail_item(&sparse, 13, 503).await;
    let first = Ingester::new(test_config(&sparse, &db_path, Some(20), 11, 5))
        .await
        .unwrap();
    let summary = first.run().await.unwrap();
    assert_eq!(summary.fetch_failed, 3);
    assert_eq!(summary.missing, 2);
    drop(first);

    let healthy = start_fake_api(20).await;
    let second = Ingester::new(test_config(&healthy, &db_path, Some(20), 11, 5))
        .await
        .unwrap();
    let summary = second.run_fill_gaps().await.unwrap();

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.inserted, 1);
    assert_eq!(second.db.count_known_missing().await.unwrap(), 2);
    assert!(second.db.get_item(ItemId(18)).await.unwrap().is_none());

    let requested: Vec<String> = healthy
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(requested, vec!["/v0/item/13.json"]);
}

#[tokio::test]
async fn test_per_item_commits_and_reports_progress() {
    let server = start_fake_api(40).await;
    fail_item(&server, 33, 404).await;

    let dir = tempdir().unwrap();
    let mut config = test_config(&server, &dir.path().join("hn.db"), Some(40), 31, 4);
    config.run.commit_strategy = CommitStrategy::PerItem;
    let ingester = Ingester::new(config).await.unwrap();
    let mut events = ingester.subscribe();

    let summary = run_with_shutdown(ingester.clone(), RunMode::Range)
        .await
        .unwrap();

    assert_eq!(summary.attempted, 10);
    assert_eq!(summary.fetch_failed, 1);
    assert_eq!(summary.missing, 1);
    assert_eq!(ingester.db.count_items().await.unwrap(), 9);
    assert!(ingester.db.is_known_missing(ItemId(33)).await.unwrap());

    let mut completed = 0;
    let mut batches_done = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::ItemCompleted { .. } => completed += 1,
            Event::BatchCompleted { .. } => batches_done += 1,
            _ => {}
        }
    }
    assert_eq!(completed, 10);
    assert_eq!(batches_done, 3);
}

#[tokio::test]
async fn test_unreachable_api_skips_items_without_failing_run() {
    let dir = tempdir().unwrap();
    let server = start_fake_api(5).await;
    let mut config = test_config(&server, &dir.path().join("hn.db"), Some(5), 1, 5);
    // nothing listens on port 9 of localhost
    config.api.base_url = "http://127.0.0.1:9/v0".to_string();

    let ingester = Ingester::new(config).await.unwrap();
    let summary = ingester.run().await.unwrap();

    assert_eq!(summary.attempted, 5);
    assert_eq!(summary.fetch_failed, 5);
    assert_eq!(ingester.db.count_items().await.unwrap(), 0);
}
