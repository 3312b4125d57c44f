// Integration tests for the timeline load test and the post cleanup
//
// These tests drive the full stack over the in-memory Datastore: timeline
// resolution, the load driver, console statistics and CSV export.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use timeline_bench::{
    cleanup::{delete_all_posts, DEFAULT_BATCH_SIZE},
    datastore::MemoryDatastore,
    error::LoadTestError,
    loadtest::{LoadDriver, LoadTestConfig, CSV_HEADER},
    models::POST_KIND,
    timeline::{FetchStrategy, TimelineResolver},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

/// Users `user1..=user{users}` all follow `celebrity`, who has `posts` posts
fn seeded_store(users: usize, posts: usize) -> MemoryDatastore {
    let store = MemoryDatastore::new();
    let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    for i in 1..=users {
        store.put_user(&format!("user{}", i), &["celebrity"]);
    }
    for i in 0..posts {
        store.put_post("celebrity", base + ChronoDuration::minutes(i as i64));
    }
    store
}

fn config(users: usize, requests: usize, iterations: usize, output: &Path) -> LoadTestConfig {
    LoadTestConfig {
        concurrent_users: users,
        requests_per_user: requests,
        output: output.to_path_buf(),
        iterations,
        iteration_pause: Duration::ZERO,
        ..Default::default()
    }
}

fn driver(store: MemoryDatastore, config: LoadTestConfig) -> LoadDriver {
    let resolver = TimelineResolver::new(Arc::new(store));
    LoadDriver::new(config, Arc::new(resolver))
}

fn csv_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

// ==================================================================================================
// Load test
// ==================================================================================================

#[tokio::test]
async fn test_all_requests_succeed() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("conc.csv");

    let outcomes = driver(seeded_store(3, 5), config(3, 2, 1, &output))
        .run()
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    let stats = outcomes[0].stats.as_ref().unwrap();
    assert_eq!(stats.total, 6);
    assert_eq!(stats.successful, 6);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.avg_posts, Some(5.0));
    assert!(stats.errors.is_empty());

    let lines = csv_lines(&output);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], CSV_HEADER);

    let fields: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(fields[0], "3");
    assert!(fields[1].ends_with("ms"));
    assert_eq!(fields[2], "1");
    assert_eq!(fields[3], "0");
}

#[tokio::test]
async fn test_failing_user_sets_failed_flag() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("conc.csv");

    // user2 has no User entity, so its follow set is just itself
    let store = MemoryDatastore::new().with_failing_authors(&["user2"]);
    store.put_user("user1", &[]);
    store.put_user("user3", &[]);

    let outcomes = driver(store, config(3, 2, 1, &output)).run().await.unwrap();

    let stats = outcomes[0].stats.as_ref().unwrap();
    assert_eq!(stats.successful, 4);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.errors.len(), 1);
    assert_eq!(stats.errors[0].count, 2);
    assert!(stats.errors[0].message.contains("user2"));

    let row = outcomes[0].exported.as_ref().unwrap();
    assert_eq!(row.failed, 1);
    assert!(csv_lines(&output)[1].ends_with(",1,1"));
}

#[tokio::test]
async fn test_all_requests_fail() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("conc.csv");

    let store = MemoryDatastore::new().with_failing_authors(&["user1", "user2"]);
    let outcomes = driver(store, config(2, 1, 1, &output)).run().await.unwrap();

    let stats = outcomes[0].stats.as_ref().unwrap();
    assert!(stats.all_failed());
    assert_eq!(stats.avg_time_ms, 0);
    assert_eq!(csv_lines(&output)[1], "2,0ms,1,1");
}

#[tokio::test]
async fn test_invalid_config_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("conc.csv");

    let result = driver(seeded_store(1, 1), config(0, 1, 3, &output)).run().await;

    assert!(matches!(result, Err(LoadTestError::InvalidInput(_))));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_run_index_across_invocations() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("conc.csv");

    for users in [2, 3, 2] {
        driver(seeded_store(users, 2), config(users, 1, 2, &output))
            .run()
            .await
            .unwrap();
    }

    let lines = csv_lines(&output);
    assert_eq!(lines.len(), 7);
    assert_eq!(lines.iter().filter(|l| l.as_str() == CSV_HEADER).count(), 1);

    let runs = |param: &str| -> Vec<String> {
        lines[1..]
            .iter()
            .map(|l| l.split(',').collect::<Vec<_>>())
            .filter(|f| f[0] == param)
            .map(|f| f[2].to_string())
            .collect()
    };
    assert_eq!(runs("2"), vec!["1", "2", "3", "4"]);
    assert_eq!(runs("3"), vec!["1", "2"]);
}

// ==================================================================================================
// Timeline resolution
// ==================================================================================================

#[tokio::test]
async fn test_resolver_falls_back_to_fan_out() {
    let store = MemoryDatastore::new().without_in_filter();
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    store.put_user("alice", &["bob", "carol"]);
    store.put_post("bob", base);
    store.put_post("carol", base + ChronoDuration::hours(2));
    store.put_post("alice", base + ChronoDuration::hours(1));
    store.put_post("dave", base + ChronoDuration::hours(3));

    let resolver = TimelineResolver::new(Arc::new(store));
    let timeline = resolver.resolve("alice", 10).await.unwrap();

    assert_eq!(timeline.strategy, Some(FetchStrategy::FanOut));
    let authors: Vec<_> = timeline
        .posts
        .iter()
        .map(|p| p.author.clone().unwrap_or_default())
        .collect();
    assert_eq!(authors, vec!["carol", "alice", "bob"]);
}

#[tokio::test]
async fn test_resolver_uses_in_filter_when_available() {
    let resolver = TimelineResolver::new(Arc::new(seeded_store(1, 4)));
    let timeline = resolver.resolve("user1", 3).await.unwrap();

    assert_eq!(timeline.strategy, Some(FetchStrategy::InFilter));
    assert_eq!(timeline.posts.len(), 3);
    assert!(timeline
        .posts
        .windows(2)
        .all(|w| w[0].created >= w[1].created));
}

// ==================================================================================================
// Cleanup
// ==================================================================================================

#[tokio::test]
async fn test_cleanup_deletes_every_post() {
    let store = seeded_store(2, 1200);

    let report = delete_all_posts(&store, DEFAULT_BATCH_SIZE).await.unwrap();

    assert_eq!(report.batches, vec![500, 500, 200]);
    assert_eq!(report.total(), 1200);
    assert_eq!(store.count(POST_KIND), 0);
    assert_eq!(store.count("User"), 2);
    assert_eq!(store.delete_log(), vec![500, 500, 200]);
}
