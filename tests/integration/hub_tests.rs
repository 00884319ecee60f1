use anyhow::Result;
use filecast::config::WatcherConfig;
use std::time::Duration;

use crate::helpers::test_harness::{expect_no_event, next_event, TestHarness};

#[tokio::test]
async fn test_subscribers_share_one_watcher_and_see_same_order() -> Result<()> {
    let harness = TestHarness::new()?;
    let mut a = harness.subscribe("a")?;
    let mut b = harness.subscribe("b")?;
    assert_eq!(harness.hub.active_roots(), vec![harness.path().to_path_buf()]);

    next_event(&mut a).await?;
    next_event(&mut b).await?;

    harness.create_file("one.txt", "1")?;
    harness.settle().await;
    harness.create_file("two.txt", "2")?;

    let mut seen_a = Vec::new();
    let mut seen_b = Vec::new();
    for _ in 0..4 {
        seen_a.push(next_event(&mut a).await?);
        seen_b.push(next_event(&mut b).await?);
    }

    let order = |events: &[(String, serde_json::Value)]| -> Vec<String> {
        events
            .iter()
            .map(|(name, body)| format!("{} {}", name, body["eventId"]))
            .collect()
    };
    // same events, same ids, same order
    assert_eq!(order(&seen_a), order(&seen_b));
    assert_eq!(seen_a[0].1["data"]["added"][0]["path"], "one.txt");
    assert_eq!(seen_a[2].1["data"]["added"][0]["path"], "two.txt");
    Ok(())
}

#[tokio::test]
async fn test_stalled_subscriber_is_dropped_without_affecting_others() -> Result<()> {
    let harness = TestHarness::with_config(WatcherConfig {
        channel_capacity: 2,
        ..WatcherConfig::default()
    })?;
    let mut stalled = harness.subscribe("stalled")?;
    let mut healthy = harness.subscribe("healthy")?;

    // healthy drains as it goes; stalled never reads until the end
    next_event(&mut healthy).await?;
    harness.create_file("a.txt", "a")?;

    let (event, _) = next_event(&mut healthy).await?;
    assert_eq!(event, "file_tree_diff");
    let (event, _) = next_event(&mut healthy).await?;
    assert_eq!(event, "file_content_diff");

    // stalled overflowed on the content diff: it keeps what it buffered, then ends
    let (event, _) = next_event(&mut stalled).await?;
    assert_eq!(event, "initial");
    let (event, _) = next_event(&mut stalled).await?;
    assert_eq!(event, "file_tree_diff");
    assert!(stalled.recv().await.is_none());

    assert!(!harness.hub.events().is_connected("stalled"));
    assert!(harness.hub.events().is_connected("healthy"));
    Ok(())
}

#[tokio::test]
async fn test_unsubscribed_client_receives_nothing_more() -> Result<()> {
    let harness = TestHarness::new()?;
    let mut keep = harness.subscribe("keep")?;
    let mut leave = harness.subscribe("leave")?;
    next_event(&mut keep).await?;
    next_event(&mut leave).await?;

    assert!(harness.hub.unsubscribe("leave"));
    harness.create_file("a.txt", "a")?;

    next_event(&mut keep).await?;
    assert!(leave.recv().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_watcher_stops_with_last_subscription() -> Result<()> {
    let harness = TestHarness::new()?;
    let sub = harness.subscribe("only")?;
    assert_eq!(harness.hub.subscriber_count(harness.path()), 1);

    drop(sub);
    assert!(harness.hub.active_roots().is_empty());

    // a fresh subscription starts a new watcher with a fresh snapshot
    harness.create_file("later.txt", "x")?;
    let mut again = harness.subscribe("only")?;
    let (event, body) = next_event(&mut again).await?;
    assert_eq!(event, "initial");
    assert_eq!(body["data"]["children"][0]["path"], "later.txt");
    expect_no_event(&mut again, Duration::from_millis(200)).await;
    Ok(())
}

#[tokio::test]
async fn test_last_event_id_tracks_delivery() -> Result<()> {
    let harness = TestHarness::new()?;
    let mut sub = harness.subscribe("client")?;
    let (_, body) = next_event(&mut sub).await?;

    let tracked = harness.hub.events().last_event_id("client").unwrap();
    assert_eq!(body["eventId"], tracked.to_string());

    // the cursor goes with the connection
    drop(sub);
    assert!(harness.hub.events().last_event_id("client").is_none());
    assert_eq!(harness.hub.events().cursor_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_debounce_collapses_burst_on_one_path() -> Result<()> {
    let harness = TestHarness::with_config(WatcherConfig {
        debounce_ms: 500,
        ..WatcherConfig::default()
    })?;
    std::fs::write(harness.path().join("burst.txt"), "0")?;
    let mut sub = harness.subscribe("client")?;
    next_event(&mut sub).await?;

    for i in 1..=5 {
        harness.overwrite_file("burst.txt", &i.to_string())?;
    }

    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_tree_diff");
    assert_eq!(body["data"]["modified"][0]["path"], "burst.txt");

    // the burst settles once, with the bytes of the last write
    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_content_diff");
    assert_eq!(body["data"]["content"], "5");

    expect_no_event(&mut sub, Duration::from_millis(300)).await;
    Ok(())
}
