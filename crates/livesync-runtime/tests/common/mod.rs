//! Shared setup for engine integration tests
#![allow(dead_code)]

use livesync_harness::{MockServer, MockTransport, MockTransportConfig};
use livesync_runtime::{
    ConnectionStatus, Endpoint, EngineStatus, QueryUpdate, SyncClient, SyncConfig, SyncEngine,
    SyncEngineBuilder, Value,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct TestEngine {
    pub engine: SyncEngine,
    pub client: SyncClient,
    pub server: MockServer,
}

pub fn start(config: SyncConfig, transport: MockTransportConfig) -> TestEngine {
    let (transport, server) = MockTransport::new(transport);
    let engine = SyncEngineBuilder::new(Endpoint::new("ws://mock.test/sync"))
        .with_config(config)
        .with_transport(transport)
        .start()
        .expect("Failed to start engine");
    let client = engine.client();
    TestEngine {
        engine,
        client,
        server,
    }
}

pub async fn connected(config: SyncConfig) -> TestEngine {
    let test = start(config, MockTransportConfig::default());
    test.client.connect().await.expect("Failed to connect");
    test
}

/// Poll the engine until its status satisfies `predicate`
pub async fn wait_for_status(
    client: &SyncClient,
    predicate: impl Fn(&EngineStatus) -> bool,
) -> EngineStatus {
    for _ in 0..200 {
        let status = client.status().await.expect("Engine stopped");
        if predicate(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("Engine never reached the expected status");
}

pub async fn wait_for_connection(client: &SyncClient, connection: ConnectionStatus) {
    wait_for_status(client, |status| status.connection == connection).await;
}

/// A `listMessages`-style result: message bodies, newest first
pub fn messages(bodies: &[&str]) -> Value {
    Value::Array(bodies.iter().map(|body| Value::from(*body)).collect())
}

/// Listener closure that records every update it sees
pub fn recorder() -> (
    Arc<Mutex<Vec<QueryUpdate>>>,
    impl FnMut(&QueryUpdate) + Send + 'static,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |update: &QueryUpdate| {
        sink.lock().unwrap().push(update.clone())
    })
}
