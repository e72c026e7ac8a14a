//! Pull-style access to a live query
//!
//! [`LiveQuery`] adapts the callback interface of [`QueryListener`] to a
//! `tokio::sync::watch` channel so async code can await changes instead of
//! registering closures.

use crate::client::SyncClient;
use livesync_core::{
    QueryListener, QueryState, QueryUpdate, SubscriptionHandle, SyncError, SyncResult, Version,
};
use tokio::sync::watch;

/// Latest known state of a watched query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySnapshot {
    pub state: QueryState,
    pub version: Version,
    pub stale: bool,
    /// Set when the subscription was torn down by the engine
    pub error: Option<SyncError>,
}

pub(crate) struct WatchListener {
    sender: watch::Sender<QuerySnapshot>,
}

impl WatchListener {
    pub(crate) fn new() -> (Self, watch::Receiver<QuerySnapshot>) {
        let (sender, receiver) = watch::channel(QuerySnapshot::default());
        (Self { sender }, receiver)
    }
}

impl QueryListener for WatchListener {
    fn on_update(&mut self, update: &QueryUpdate) {
        self.sender.send_modify(|snapshot| {
            snapshot.state = update.state.clone();
            snapshot.version = update.version;
            snapshot.stale = update.stale;
        });
    }

    fn on_stale(&mut self, stale: bool) {
        self.sender.send_if_modified(|snapshot| {
            let changed = snapshot.stale != stale;
            snapshot.stale = stale;
            changed
        });
    }

    fn on_error(&mut self, error: &SyncError) {
        self.sender
            .send_modify(|snapshot| snapshot.error = Some(error.clone()));
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A subscription whose updates are read by awaiting
///
/// Dropping it releases the subscription like [`LiveQuery::unsubscribe`].
pub struct LiveQuery {
    handle: SubscriptionHandle,
    receiver: watch::Receiver<QuerySnapshot>,
    client: SyncClient,
    released: bool,
}

impl LiveQuery {
    pub(crate) fn new(
        handle: SubscriptionHandle,
        receiver: watch::Receiver<QuerySnapshot>,
        client: SyncClient,
    ) -> Self {
        Self {
            handle,
            receiver,
            client,
            released: false,
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Most recent snapshot, without waiting
    pub fn current(&self) -> QuerySnapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change and return it
    pub async fn changed(&mut self) -> SyncResult<QuerySnapshot> {
        self.receiver
            .changed()
            .await
            .map_err(|_| SyncError::Closed)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the snapshot satisfies `predicate`
    ///
    /// Returns immediately if the current snapshot already does. A torn-down
    /// subscription ends the wait with its error.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&QuerySnapshot) -> bool,
    ) -> SyncResult<QuerySnapshot> {
        let snapshot = self
            .receiver
            .wait_for(|snapshot| snapshot.error.is_some() || predicate(snapshot))
            .await
            .map_err(|_| SyncError::Closed)?
            .clone();
        match snapshot.error {
            Some(error) if !predicate(&snapshot) => Err(error),
            _ => Ok(snapshot),
        }
    }

    /// Drop interest in the query
    pub async fn unsubscribe(mut self) -> SyncResult<()> {
        self.released = true;
        self.client.unsubscribe(self.handle).await
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        if !self.released {
            self.client.release(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_core::{args, QueryKey, Value};

    fn update(n: i64, stale: bool) -> QueryUpdate {
        QueryUpdate {
            key: QueryKey::new("q", &args! {}),
            version: Version::server(n as u64),
            state: QueryState::Loaded(Value::from(n)),
            stale,
        }
    }

    #[test]
    fn test_watch_listener_tracks_updates() {
        let (mut listener, mut receiver) = WatchListener::new();
        assert!(receiver.borrow().state.is_loading());

        listener.on_update(&update(2, false));
        assert!(receiver.has_changed().unwrap());
        let snapshot = receiver.borrow_and_update().clone();
        assert_eq!(snapshot.state, QueryState::Loaded(Value::from(2)));
        assert_eq!(snapshot.version, Version::server(2));

        // Repeating the current stale flag is not a change.
        listener.on_stale(false);
        assert!(!receiver.has_changed().unwrap());
        listener.on_stale(true);
        assert!(receiver.borrow_and_update().stale);

        listener.on_error(&SyncError::Closed);
        assert_eq!(receiver.borrow().error, Some(SyncError::Closed));
    }

    #[test]
    fn test_pending_reader_woken_only_by_real_changes() {
        let (mut listener, mut receiver) = WatchListener::new();
        let mut changed = tokio_test::task::spawn(receiver.changed());
        tokio_test::assert_pending!(changed.poll());

        listener.on_stale(false);
        assert!(!changed.is_woken());
        tokio_test::assert_pending!(changed.poll());

        listener.on_update(&update(1, false));
        assert!(changed.is_woken());
        tokio_test::assert_ready_ok!(changed.poll());
    }

    #[test]
    fn test_watch_listener_closed_with_its_reader() {
        let (listener, receiver) = WatchListener::new();
        assert!(!listener.is_closed());
        drop(receiver);
        assert!(listener.is_closed());
    }
}
