//! Mutation round trips, optimistic updates and their rollback

mod common;

use common::{connected, messages, start, wait_for_status};
use livesync_harness::MockTransportConfig;
use livesync_runtime::{
    args, Args, ConnectionStatus, CorrelationId, OptimisticView, QueryState, SyncConfig,
    SyncError, Value, Version,
};
use std::time::Duration;

/// Prepend `body` to the cached `listMessages` result, if there is one
fn prepend_message(body: &'static str) -> impl Fn(&mut dyn OptimisticView) + Send + Sync {
    move |view: &mut dyn OptimisticView| {
        let args = Args::new();
        if let Some(Value::Array(list)) = view.get_query("listMessages", &args).cloned() {
            let mut list = list;
            list.insert(0, Value::from(body));
            view.set_query("listMessages", &args, Value::Array(list));
        }
    }
}

#[tokio::test]
async fn test_call_resolves_with_ack_value() {
    let mut test = connected(SyncConfig::testing()).await;

    let client = test.client.clone();
    let call = tokio::spawn(async move {
        client
            .call("sendMessage", args! { "author" => "User 1234", "body" => "hi" })
            .await
    });

    let (correlation_id, name, args) = test.server.expect_mutate().await;
    assert_eq!(name, "sendMessage");
    assert_eq!(args.get("body"), Some(&Value::from("hi")));

    test.server.ack(correlation_id, Value::from("msg-1"));
    assert_eq!(call.await.unwrap(), Ok(Value::from("msg-1")));

    let status = test.client.status().await.unwrap();
    assert_eq!(status.pending_mutations, 0);
    assert_eq!(status.stats.mutations_committed, 1);
}

#[tokio::test]
async fn test_stray_acks_leave_connection_and_pending_call_intact() {
    let mut test = connected(SyncConfig::testing()).await;

    let client = test.client.clone();
    let call = tokio::spawn(async move {
        client
            .call("sendMessage", args! { "author" => "User 1234", "body" => "hi" })
            .await
    });
    let (correlation_id, _, _) = test.server.expect_mutate().await;

    test.server.ack(CorrelationId::generate(), Value::from("not-ours"));
    test.server.reject(CorrelationId::generate(), "not ours either");
    test.server.ack(correlation_id, Value::from("msg-1"));
    assert_eq!(call.await.unwrap(), Ok(Value::from("msg-1")));

    let status = test.client.status().await.unwrap();
    assert_eq!(status.connection, ConnectionStatus::Connected);
    assert_eq!(status.pending_mutations, 0);
    assert_eq!(status.stats.mutations_committed, 1);
    assert_eq!(status.stats.mutations_rejected, 0);
    assert_eq!(status.stats.frames_malformed, 0);
    assert_eq!(test.server.opens(), 1);
    assert_eq!(test.server.recycles(), 0);
}

#[tokio::test]
async fn test_call_fails_with_backend_error() {
    let mut test = connected(SyncConfig::testing()).await;

    let client = test.client.clone();
    let call = tokio::spawn(async move { client.call("sendMessage", args! { "body" => "" }).await });

    let (correlation_id, _, _) = test.server.expect_mutate().await;
    test.server.reject(correlation_id, "body must not be empty");
    assert_eq!(
        call.await.unwrap(),
        Err(SyncError::rejected("body must not be empty"))
    );
}

#[tokio::test]
async fn test_invalid_mutation_is_rejected_locally() {
    let mut test = connected(SyncConfig::testing()).await;

    let result = test
        .client
        .call("sendMessage", args! { "ratio" => f64::NAN })
        .await;
    assert!(matches!(result, Err(SyncError::InvalidMutation { .. })));
    test.server.assert_no_frame(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_rejected_optimistic_update_rolls_back() {
    let mut test = connected(SyncConfig::testing()).await;
    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;
    test.server.query_result(id, 1, messages(&["first"]));
    query.wait_for(|s| !s.state.is_loading()).await.unwrap();

    let client = test.client.clone();
    let call = tokio::spawn(async move {
        client
            .call_with_optimistic_update(
                "sendMessage",
                args! { "body" => "second" },
                prepend_message("second"),
            )
            .await
    });

    let snapshot = query.wait_for(|s| s.version == Version::new(1, 1)).await.unwrap();
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["second", "first"])));

    let (correlation_id, _, _) = test.server.expect_mutate().await;
    test.server.reject(correlation_id, "rate limited");

    let snapshot = query.wait_for(|s| s.version == Version::new(1, 2)).await.unwrap();
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["first"])));
    assert_eq!(call.await.unwrap(), Err(SyncError::rejected("rate limited")));
}

#[tokio::test]
async fn test_committed_update_stays_until_authoritative_result() {
    let mut test = connected(SyncConfig::testing()).await;
    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;
    test.server.query_result(id, 1, messages(&["first"]));
    query.wait_for(|s| !s.state.is_loading()).await.unwrap();

    let client = test.client.clone();
    let call = tokio::spawn(async move {
        client
            .call_with_optimistic_update(
                "sendMessage",
                args! { "body" => "second" },
                prepend_message("second"),
            )
            .await
    });
    let (correlation_id, _, _) = test.server.expect_mutate().await;
    test.server.ack(correlation_id, Value::Null);
    assert_eq!(call.await.unwrap(), Ok(Value::Null));

    // Still showing the optimistic entry: nothing authoritative has replaced it yet.
    let snapshot = query.current();
    assert_eq!(snapshot.version, Version::new(1, 1));
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["second", "first"])));

    test.server
        .query_result(id, 2, messages(&["second (server)", "first"]));
    let snapshot = query.wait_for(|s| s.version == Version::server(2)).await.unwrap();
    assert_eq!(
        snapshot.state,
        QueryState::Loaded(messages(&["second (server)", "first"]))
    );

    // The retired layer is not replayed on later deliveries.
    test.server.query_result(id, 3, messages(&["first"]));
    let snapshot = query.wait_for(|s| s.version == Version::server(3)).await.unwrap();
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["first"])));
}

#[tokio::test]
async fn test_pending_layers_replay_over_new_results() {
    let mut test = connected(SyncConfig::testing()).await;
    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;
    test.server.query_result(id, 1, messages(&["first"]));
    query.wait_for(|s| !s.state.is_loading()).await.unwrap();

    let client = test.client.clone();
    let _call = tokio::spawn(async move {
        client
            .call_with_optimistic_update("sendMessage", args! {}, prepend_message("mine"))
            .await
    });
    test.server.expect_mutate().await;

    // Someone else's message lands before our ack: the layer applies on top.
    test.server
        .query_result(id, 2, messages(&["theirs", "first"]));
    let snapshot = query.wait_for(|s| s.version == Version::new(2, 1)).await.unwrap();
    assert_eq!(
        snapshot.state,
        QueryState::Loaded(messages(&["mine", "theirs", "first"]))
    );
}

#[tokio::test]
async fn test_update_without_subscribed_target_changes_nothing() {
    let mut test = connected(SyncConfig::testing()).await;

    let client = test.client.clone();
    let call = tokio::spawn(async move {
        client
            .call_with_optimistic_update("sendMessage", args! {}, prepend_message("x"))
            .await
    });
    let (correlation_id, _, _) = test.server.expect_mutate().await;
    test.server.ack(correlation_id, Value::from(1));
    assert_eq!(call.await.unwrap(), Ok(Value::Int64(1)));
    wait_for_status(&test.client, |status| status.pending_mutations == 0).await;
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_mutation_times_out() {
    let mut test = connected(SyncConfig::testing()).await;
    let mut query = test.client.watch("listMessages", args! {}).await.unwrap();
    let (id, _, _) = test.server.expect_subscribe().await;
    test.server.query_result(id, 1, messages(&["first"]));
    query.wait_for(|s| !s.state.is_loading()).await.unwrap();

    let client = test.client.clone();
    let call = tokio::spawn(async move {
        client
            .call_with_optimistic_update("sendMessage", args! {}, prepend_message("lost"))
            .await
    });
    let (correlation_id, _, _) = test.server.expect_mutate().await;

    // Ack timeout is 2s in the testing preset.
    let result = call.await.unwrap();
    assert_eq!(
        result,
        Err(SyncError::MutationTimeout {
            correlation_id,
            after: Duration::from_secs(2)
        })
    );
    let snapshot = query.wait_for(|s| s.version == Version::new(1, 2)).await.unwrap();
    assert_eq!(snapshot.state, QueryState::Loaded(messages(&["first"])));

    // A late ack is ignored.
    test.server.ack(correlation_id, Value::Null);
    let status = wait_for_status(&test.client, |status| status.stats.mutations_timed_out == 1).await;
    assert_eq!(status.pending_mutations, 0);
    assert_eq!(status.stats.mutations_committed, 0);
}

#[tokio::test]
async fn test_mutations_buffered_while_disconnected_are_sent_on_connect() {
    let mut test = start(SyncConfig::testing(), MockTransportConfig::default());

    let client = test.client.clone();
    let call = tokio::spawn(async move { client.call("sendMessage", args! { "n" => 1 }).await });
    wait_for_status(&test.client, |status| status.buffered_frames == 1).await;

    test.client.connect().await.unwrap();
    let (correlation_id, name, _) = test.server.expect_mutate().await;
    assert_eq!(name, "sendMessage");
    test.server.ack(correlation_id, Value::Null);
    assert_eq!(call.await.unwrap(), Ok(Value::Null));
}
