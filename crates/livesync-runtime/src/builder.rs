//! Engine Builder API
//!
//! Wires a transport to a new engine task and hands back a [`SyncEngine`] owning both.

use crate::client::SyncClient;
use crate::logic::SyncEngineTask;
use livesync_core::{
    create_app_event_channel, create_command_channel, create_effect_channel,
    create_event_channel, Endpoint, SyncConfig, SyncError, SyncResult, TransportTask,
};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long `shutdown` waits for the engine task to finish
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SyncEngineBuilder {
    endpoint: Endpoint,
    config: SyncConfig,
    transport: Option<Box<dyn TransportTask>>,
}

impl SyncEngineBuilder {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            config: SyncConfig::default(),
            transport: None,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport<T: TransportTask + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Spawn the transport and engine tasks on the current tokio runtime
    pub fn start(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;
        let mut transport = self
            .transport
            .ok_or_else(|| SyncError::config_error("no transport configured"))?;
        let runtime = Handle::try_current()
            .map_err(|_| SyncError::config_error("must be started inside a tokio runtime"))?;

        let channels = &self.config.channels;
        let (command_sender, command_receiver) = create_command_channel(channels);
        let (event_sender, event_receiver) = create_event_channel(channels);
        let (effect_sender, effect_receiver) = create_effect_channel();
        let (app_event_sender, _) = create_app_event_channel(channels);

        transport.attach_channels(event_sender, effect_receiver)?;
        let transport_name = transport.name();

        let engine = SyncEngineTask::new(
            self.endpoint.clone(),
            &self.config,
            command_receiver,
            event_receiver,
            effect_sender,
            app_event_sender.clone(),
        );

        let transport_handle = runtime.spawn(async move {
            let result = transport.run().await;
            if let Err(error) = &result {
                warn!(%error, "Transport task ended with error");
            }
            result
        });
        let engine_handle = runtime.spawn(engine.run());

        info!(endpoint = %self.endpoint, transport = transport_name, "Sync engine started");

        Ok(SyncEngine {
            client: SyncClient::new(command_sender, app_event_sender),
            engine_handle: Some(engine_handle),
            transport_handle: Some(transport_handle),
        })
    }
}

/// A running engine and its transport
pub struct SyncEngine {
    client: SyncClient,
    engine_handle: Option<JoinHandle<SyncResult<()>>>,
    transport_handle: Option<JoinHandle<SyncResult<()>>>,
}

impl SyncEngine {
    /// A new handle to the engine
    pub fn client(&self) -> SyncClient {
        self.client.clone()
    }

    pub fn is_running(&self) -> bool {
        self.engine_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Close the engine and wait for its tasks to stop
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync engine");
        self.client.close().await?;

        if let Some(handle) = self.engine_handle.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(result)) => result?,
                Ok(Err(join_error)) => {
                    return Err(SyncError::channel_error(format!(
                        "engine task failed: {join_error}"
                    )))
                }
                Err(_) => warn!("Engine task did not stop in time"),
            }
        }

        if let Some(mut handle) = self.transport_handle.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await.is_err() {
                warn!("Transport task did not stop in time, aborting");
                handle.abort();
            }
        }
        info!("Sync engine shut down");
        Ok(())
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.transport_handle.take() {
            handle.abort();
        }
    }
}
