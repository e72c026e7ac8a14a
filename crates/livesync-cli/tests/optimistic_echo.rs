//! Chat flows against the in-memory backend

use livesync_cli::commands::render_snapshot;
use livesync_cli::message::{
    display_order, list_args, optimistic_echo, send_args, LIST_MESSAGES, SEND_MESSAGE,
};
use livesync_harness::{MockTransport, MockTransportConfig};
use livesync_runtime::{Endpoint, SyncConfig, SyncEngineBuilder, SyncError, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::timeout;

fn stored(id: &str, author: &str, body: &str) -> Value {
    let mut object = BTreeMap::new();
    object.insert("_id".to_string(), Value::from(id));
    object.insert("_creationTime".to_string(), Value::Float64(1_700_000_000_000.0));
    object.insert("author".to_string(), Value::from(author));
    object.insert("body".to_string(), Value::from(body));
    Value::Object(object)
}

#[tokio::test]
async fn test_echo_shown_until_settled() {
    let (transport, mut server) = MockTransport::new(MockTransportConfig::default());
    let mut engine = SyncEngineBuilder::new(Endpoint::new("ws://mock.test/sync"))
        .with_config(SyncConfig::testing())
        .with_transport(transport)
        .start()
        .unwrap();
    let client = engine.client();
    client.connect().await.unwrap();

    let mut query = client.watch(LIST_MESSAGES, list_args()).await.unwrap();
    let (id, _, _) = server.expect_subscribe().await;
    server.query_result(id, 1, Value::Array(vec![stored("m1", "Bob", "hey")]));
    query.wait_for(|s| !s.state.is_loading()).await.unwrap();

    // Rejected send: echo appears, then disappears.
    let rejected = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call_with_optimistic_update(
                    SEND_MESSAGE,
                    send_args("Ada", "first try"),
                    optimistic_echo("Ada", "first try"),
                )
                .await
        }
    });
    let (correlation_id, name, args) = server.expect_mutate().await;
    assert_eq!(name, SEND_MESSAGE);
    assert_eq!(args, send_args("Ada", "first try"));

    let snapshot = query
        .wait_for(|s| s.state.value().and_then(Value::as_array).map(Vec::len) == Some(2))
        .await
        .unwrap();
    let lines = render_snapshot(&snapshot).unwrap();
    assert_eq!(lines.last().unwrap(), "Ada: first try (sending)");

    server.reject(correlation_id, "rate limited");
    let result = timeout(Duration::from_secs(1), rejected).await.unwrap().unwrap();
    assert!(matches!(result, Err(SyncError::MutationRejected { .. })));
    let snapshot = query
        .wait_for(|s| s.state.value().and_then(Value::as_array).map(Vec::len) == Some(1))
        .await
        .unwrap();
    let messages = display_order(snapshot.state.value().unwrap()).unwrap();
    assert_eq!(messages[0].body, "hey");

    // Acknowledged send: the authoritative list replaces the echo.
    let sent = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call_with_optimistic_update(
                    SEND_MESSAGE,
                    send_args("Ada", "hello"),
                    optimistic_echo("Ada", "hello"),
                )
                .await
        }
    });
    let (correlation_id, _, _) = server.expect_mutate().await;
    server.ack(correlation_id, Value::from("m2"));
    assert_eq!(sent.await.unwrap(), Ok(Value::from("m2")));

    server.query_result(
        id,
        2,
        Value::Array(vec![stored("m2", "Ada", "hello"), stored("m1", "Bob", "hey")]),
    );
    let snapshot = query
        .wait_for(|s| s.version.server == 2 && s.version.local == 0)
        .await
        .unwrap();
    let messages = display_order(snapshot.state.value().unwrap()).unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| !m.is_pending()));
    assert_eq!(messages[1].to_string(), "Ada: hello");

    engine.shutdown().await.unwrap();
}
