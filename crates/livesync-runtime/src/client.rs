//! Client handle
//!
//! [`SyncClient`] is the public face of a running engine. It is cheap to clone and
//! every method is a command round trip to the engine task.

use crate::listener::{LiveQuery, WatchListener};
use livesync_core::channel::Reply;
use livesync_core::{
    AppEventReceiver, AppEventSender, Args, Command, CommandSender, EngineStatus,
    OptimisticView, QueryListener, SubscriptionHandle, SyncError, SyncResult, Value,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::trace;

#[derive(Clone)]
pub struct SyncClient {
    command_sender: CommandSender,
    app_event_sender: AppEventSender,
}

impl SyncClient {
    pub(crate) fn new(command_sender: CommandSender, app_event_sender: AppEventSender) -> Self {
        Self {
            command_sender,
            app_event_sender,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> SyncResult<T> {
        let (reply, response) = oneshot::channel();
        self.command_sender
            .send(build(reply))
            .await
            .map_err(|_| SyncError::Closed)?;
        response.await.map_err(|_| SyncError::Closed)?
    }

    /// Open the link, resolving once it is up
    ///
    /// Fails with `Connection` when reconnect attempts are exhausted or the session
    /// is disconnected before the link comes up.
    pub async fn connect(&self) -> SyncResult<()> {
        self.request(|reply| Command::Connect { reply }).await
    }

    /// Close the link but keep subscriptions and pending mutations for the next connect
    pub async fn disconnect(&self) -> SyncResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Shut the engine down; every pending call fails with `Closed`
    pub async fn close(&self) -> SyncResult<()> {
        match self.request(|reply| Command::Close { reply }).await {
            Err(SyncError::Closed) | Ok(()) => Ok(()),
            Err(error) => Err(error),
        }
    }

    pub async fn status(&self) -> SyncResult<EngineStatus> {
        self.request(|reply| Command::GetStatus { reply }).await
    }

    /// Register `listener` for the results of query `name(args)`
    pub async fn subscribe<L>(
        &self,
        name: impl Into<String>,
        args: Args,
        listener: L,
    ) -> SyncResult<SubscriptionHandle>
    where
        L: QueryListener,
    {
        let name = name.into();
        self.request(|reply| Command::Subscribe {
            name,
            args,
            listener: Box::new(listener),
            reply,
        })
        .await
    }

    /// Subscribe and read results by awaiting instead of through a callback
    pub async fn watch(&self, name: impl Into<String>, args: Args) -> SyncResult<LiveQuery> {
        let (listener, receiver) = WatchListener::new();
        let handle = self.subscribe(name, args, listener).await?;
        Ok(LiveQuery::new(handle, receiver, self.clone()))
    }

    /// Remove one listener; unknown handles are ignored
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()> {
        self.request(|reply| Command::Unsubscribe { handle, reply })
            .await
    }

    /// Queue an unsubscribe without waiting for the engine
    ///
    /// Used where awaiting is impossible. If the command queue is full the engine
    /// still drops the listener once it reports itself closed.
    pub(crate) fn release(&self, handle: SubscriptionHandle) {
        let (reply, _) = oneshot::channel();
        if let Err(error) = self
            .command_sender
            .try_send(Command::Unsubscribe { handle, reply })
        {
            trace!(%handle, %error, "Unsubscribe not queued");
        }
    }

    /// Run mutation `name(args)` and wait for the backend's acknowledgement
    pub async fn call(&self, name: impl Into<String>, args: Args) -> SyncResult<Value> {
        let name = name.into();
        self.request(|reply| Command::Mutate {
            name,
            args,
            optimistic: None,
            reply,
        })
        .await
    }

    /// Like [`SyncClient::call`], applying `update` to local results until the
    /// mutation settles
    pub async fn call_with_optimistic_update<F>(
        &self,
        name: impl Into<String>,
        args: Args,
        update: F,
    ) -> SyncResult<Value>
    where
        F: Fn(&mut dyn OptimisticView) + Send + Sync + 'static,
    {
        let name = name.into();
        self.request(|reply| Command::Mutate {
            name,
            args,
            optimistic: Some(Arc::new(update)),
            reply,
        })
        .await
    }

    /// Observe connection changes, resyncs and settled mutations
    pub fn app_events(&self) -> AppEventReceiver {
        self.app_event_sender.subscribe()
    }

    /// Whether the engine has stopped accepting commands
    pub fn is_closed(&self) -> bool {
        self.command_sender.is_closed()
    }
}
