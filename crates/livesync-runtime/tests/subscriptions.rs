//! Subscription lifecycle through the public client

mod common;

use common::{connected, messages, recorder, start, wait_for_status};
use livesync_core::ClientFrame;
use livesync_harness::MockTransportConfig;
use livesync_runtime::{args, QueryState, SyncConfig, SyncError, Version};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_same_query_shares_one_subscription() {
    let mut test = connected(SyncConfig::testing()).await;

    let mut first = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, name, args) = test.server.expect_subscribe().await;
    assert_eq!(name, "listMessages");
    assert!(args.is_empty());

    let mut second = test.client.watch("listMessages", args! {}).await.unwrap();
    test.server.assert_no_frame(Duration::from_millis(50)).await;

    test.server.query_result(id, 1, messages(&["hello"]));
    let a = first.wait_for(|s| !s.state.is_loading()).await.unwrap();
    let b = second.wait_for(|s| !s.state.is_loading()).await.unwrap();
    assert_eq!(a.state, QueryState::Loaded(messages(&["hello"])));
    assert_eq!(a, b);

    let status = test.client.status().await.unwrap();
    assert_eq!(status.subscriptions, 1);
    assert_eq!(status.listeners, 2);
}

#[tokio::test(start_paused = true)]
async fn test_last_unsubscribe_waits_for_grace_period() {
    let mut test = connected(SyncConfig::testing()).await;

    let first = test.client.watch("listMessages", args! {}).await.unwrap();
    let second = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;

    first.unsubscribe().await.unwrap();
    second.unsubscribe().await.unwrap();
    assert_eq!(test.client.status().await.unwrap().subscriptions, 1);

    // Grace period is 100ms in the testing preset.
    test.server.assert_no_frame(Duration::from_millis(50)).await;
    assert_eq!(test.server.expect_frame().await, ClientFrame::Unsubscribe { id });
    assert_eq!(test.client.status().await.unwrap().subscriptions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_within_grace_reuses_subscription() {
    let mut test = connected(SyncConfig::testing()).await;

    let mut original = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;
    test.server.query_result(id, 4, messages(&["a"]));
    original.wait_for(|s| !s.state.is_loading()).await.unwrap();
    original.unsubscribe().await.unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;
    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();

    // The late listener sees the cached result without a new round trip.
    let snapshot = query.current();
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["a"])));
    assert_eq!(snapshot.version, Version::server(4));
    test.server.assert_no_frame(Duration::from_millis(300)).await;

    test.server.query_result(id, 5, messages(&["b", "a"]));
    let snapshot = query.wait_for(|s| s.version == Version::server(5)).await.unwrap();
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["b", "a"])));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_query_is_released_after_grace() {
    let mut test = connected(SyncConfig::testing()).await;

    let query = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;
    drop(query);

    // Nothing goes out during the grace period, then exactly one Unsubscribe.
    test.server.assert_no_frame(Duration::from_millis(50)).await;
    assert_eq!(test.server.expect_frame().await, ClientFrame::Unsubscribe { id });
    test.server.assert_no_frame(Duration::from_secs(5)).await;

    let status = test.client.status().await.unwrap();
    assert_eq!(status.subscriptions, 0);
    assert_eq!(status.listeners, 0);
}

#[tokio::test]
async fn test_distinct_arguments_are_distinct_subscriptions() {
    let mut test = connected(SyncConfig::testing()).await;

    let _general = test
        .client
        .watch("count", args! { "channel" => "general" })
        .await
        .unwrap();
    let _random = test
        .client
        .watch("count", args! { "channel" => "random" })
        .await
        .unwrap();
    let (first, _, _) = test.server.expect_subscribe().await;
    let (second, _, _) = test.server.expect_subscribe().await;
    assert_ne!(first, second);
    assert_eq!(test.client.status().await.unwrap().subscriptions, 2);
}

#[tokio::test]
async fn test_outdated_results_are_discarded() {
    let mut test = connected(SyncConfig::testing()).await;

    let (seen, listener) = recorder();
    test.client
        .subscribe("listMessages", args! {}, listener)
        .await
        .unwrap();
    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;

    test.server.query_result(id, 5, messages(&["five"]));
    test.server.query_result(id, 3, messages(&["three"]));
    test.server.query_result(id, 5, messages(&["five again"]));
    test.server.query_result(id, 6, messages(&["six"]));

    let snapshot = query.wait_for(|s| s.version == Version::server(6)).await.unwrap();
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["six"])));

    let versions: Vec<_> = seen.lock().unwrap().iter().map(|u| u.version).collect();
    assert_eq!(versions, vec![Version::server(5), Version::server(6)]);
    assert_eq!(
        test.client.status().await.unwrap().stats.deliveries_discarded,
        2
    );
}

#[tokio::test]
async fn test_query_failure_is_delivered_as_state() {
    let mut test = connected(SyncConfig::testing()).await;
    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;

    test.server.push(livesync_core::ServerFrame::QueryFailed {
        id,
        version: 1,
        error: "table missing".into(),
    });
    let snapshot = query.wait_for(|s| !s.state.is_loading()).await.unwrap();
    assert_eq!(snapshot.state, QueryState::Failed("table missing".into()));
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn test_subscribe_while_disconnected_is_stale_until_result() {
    let mut test = start(SyncConfig::testing(), MockTransportConfig::default());

    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();
    let snapshot = query.current();
    assert!(snapshot.state.is_loading());
    assert!(snapshot.stale);
    assert_eq!(test.client.status().await.unwrap().buffered_frames, 1);

    test.client.connect().await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;
    test.server.query_result(id, 1, messages(&["hi"]));

    let snapshot = query.wait_for(|s| !s.state.is_loading()).await.unwrap();
    assert!(!snapshot.stale);
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["hi"])));
}

#[tokio::test]
async fn test_invalid_query_is_rejected() {
    let test = connected(SyncConfig::testing()).await;

    let result = test.client.watch("list messages", args! {}).await;
    assert!(matches!(result, Err(SyncError::InvalidQuery { .. })));

    let result = test
        .client
        .watch("listMessages", args! { "$id" => 1 })
        .await;
    assert!(matches!(result, Err(SyncError::InvalidQuery { .. })));
    assert_eq!(test.client.status().await.unwrap().subscriptions, 0);
}

#[tokio::test]
async fn test_unknown_handle_unsubscribe_is_ignored() {
    let test = connected(SyncConfig::testing()).await;
    let query = test.client.watch("listMessages", args! {}).await.unwrap();
    let handle = query.handle();

    test.client.unsubscribe(handle).await.unwrap();
    test.client.unsubscribe(handle).await.unwrap();
    wait_for_status(&test.client, |status| status.listeners == 0).await;
}

#[tokio::test]
async fn test_result_for_unknown_subscription_is_dropped() {
    let mut test = connected(SyncConfig::testing()).await;
    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;

    test.server
        .query_result(livesync_core::SubscriptionId::new(999), 1, messages(&["x"]));
    test.server.query_result(id, 1, messages(&["mine"]));

    let snapshot = query.wait_for(|s| !s.state.is_loading()).await.unwrap();
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["mine"])));
}
