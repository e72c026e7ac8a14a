//! Subscription registry
//!
//! Holds at most one [`QuerySubscription`] per canonical [`QueryKey`]. Each entry keeps
//! the authoritative result delivered by the backend (the *base*) and the result
//! visible to listeners, which is the base with every pending optimistic update
//! replayed on top. Listener callbacks run synchronously, in registration order.

use livesync_core::value::{validate_args, validate_function_name};
use livesync_core::{
    Args, ClientFrame, CorrelationId, OptimisticUpdate, OptimisticView, QueryKey, QueryListener,
    QueryState, QueryUpdate, RegistryConfig, SubscriptionHandle, SubscriptionId, SyncError,
    SyncResult, Value, Version,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::time::Instant;
use tracing::{debug, trace};

// ----------------------------------------------------------------------------
// Subscription entry
// ----------------------------------------------------------------------------

struct RegisteredListener {
    handle: SubscriptionHandle,
    listener: Box<dyn QueryListener>,
}

/// One live query and everything the client knows about it
pub struct QuerySubscription {
    id: SubscriptionId,
    key: QueryKey,
    name: String,
    args: Args,
    base: QueryState,
    base_version: u64,
    visible: QueryState,
    version: Version,
    listeners: Vec<RegisteredListener>,
    stale: bool,
    evict_at: Option<Instant>,
}

impl QuerySubscription {
    fn new(id: SubscriptionId, key: QueryKey, name: String, args: Args, stale: bool) -> Self {
        Self {
            id,
            key,
            name,
            args,
            base: QueryState::Loading,
            base_version: 0,
            visible: QueryState::Loading,
            version: Version::INITIAL,
            listeners: Vec::new(),
            stale,
            evict_at: None,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> &QueryState {
        &self.visible
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_pending_eviction(&self) -> bool {
        self.evict_at.is_some()
    }

    /// Frame that (re)establishes this subscription on the backend
    pub fn subscribe_frame(&self) -> ClientFrame {
        ClientFrame::Subscribe {
            id: self.id,
            name: self.name.clone(),
            args: self.args.clone(),
        }
    }

    pub fn snapshot(&self) -> QueryUpdate {
        QueryUpdate {
            key: self.key.clone(),
            version: self.version,
            state: self.visible.clone(),
            stale: self.stale,
        }
    }

    fn notify_update(&mut self) {
        let update = self.snapshot();
        for registered in &mut self.listeners {
            registered.listener.on_update(&update);
        }
    }

    fn notify_stale(&mut self) {
        let stale = self.stale;
        for registered in &mut self.listeners {
            registered.listener.on_stale(stale);
        }
    }

    fn notify_error(&mut self, error: &SyncError) {
        for registered in &mut self.listeners {
            registered.listener.on_error(error);
        }
    }
}

// ----------------------------------------------------------------------------
// Outcomes
// ----------------------------------------------------------------------------

/// Result of registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub handle: SubscriptionHandle,
    pub subscription: SubscriptionId,
    /// Whether a new subscription was created (and needs a `Subscribe` frame)
    pub created: bool,
}

/// What happened to an inbound query result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Newer version stored; views must be recomputed
    Applied,
    /// Same version re-delivered after a reconnect; only the stale flag was cleared
    Refreshed,
    /// Equal or older version
    Discarded,
    /// No subscription with this id
    Unknown,
}

/// Outcome of replaying optimistic layers
#[derive(Debug, Default)]
pub struct RecomputeReport {
    /// Keys each optimistic layer wrote to
    pub touched: HashMap<CorrelationId, HashSet<QueryKey>>,
    /// Subscriptions whose listeners were notified
    pub notified: usize,
}

/// Registry counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub subscriptions_created: u64,
    pub subscriptions_reused: u64,
    pub evictions: u64,
    pub deliveries_applied: u64,
    pub deliveries_discarded: u64,
}

// ----------------------------------------------------------------------------
// Optimistic scratch view
// ----------------------------------------------------------------------------

struct ScratchView {
    values: HashMap<QueryKey, QueryState>,
    touched: HashSet<QueryKey>,
}

impl OptimisticView for ScratchView {
    fn get_query(&self, name: &str, args: &Args) -> Option<&Value> {
        self.values
            .get(&QueryKey::new(name, args))
            .and_then(QueryState::value)
    }

    fn set_query(&mut self, name: &str, args: &Args, value: Value) -> bool {
        let key = QueryKey::new(name, args);
        match self.values.get_mut(&key) {
            Some(slot) => {
                *slot = QueryState::Loaded(value);
                self.touched.insert(key);
                true
            }
            None => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Subscription Registry
// ----------------------------------------------------------------------------

pub struct SubscriptionRegistry {
    config: RegistryConfig,
    /// Keyed by id; ids are allocated in increasing order, so iteration is creation order
    subscriptions: BTreeMap<SubscriptionId, QuerySubscription>,
    by_key: HashMap<QueryKey, SubscriptionId>,
    by_handle: HashMap<SubscriptionHandle, SubscriptionId>,
    next_subscription_id: u64,
    next_handle: u64,
    stats: RegistryStats,
}

impl SubscriptionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            subscriptions: BTreeMap::new(),
            by_key: HashMap::new(),
            by_handle: HashMap::new(),
            next_subscription_id: 1,
            next_handle: 1,
            stats: RegistryStats::default(),
        }
    }

    /// Reject malformed names or arguments before anything is registered
    pub fn validate(&self, name: &str, args: &Args) -> SyncResult<()> {
        validate_function_name(name).map_err(SyncError::invalid_query)?;
        validate_args(args, self.config.max_arg_depth).map_err(SyncError::invalid_query)
    }

    /// Register a listener, creating the subscription on first interest
    ///
    /// A reused subscription hands its current result (if loaded) and stale flag to
    /// the new listener before returning.
    pub fn subscribe(
        &mut self,
        name: String,
        args: Args,
        listener: Box<dyn QueryListener>,
        stale: bool,
    ) -> SyncResult<SubscribeOutcome> {
        self.validate(&name, &args)?;

        let key = QueryKey::new(&name, &args);
        let handle = SubscriptionHandle::new(self.next_handle);
        self.next_handle += 1;
        let mut registered = RegisteredListener { handle, listener };

        let existing = self.by_key.get(&key).copied();
        if let Some(sub) = existing.and_then(|id| self.subscriptions.get_mut(&id)) {
            if sub.evict_at.take().is_some() {
                debug!(subscription = %sub.id, key = %sub.key, "Eviction cancelled by new listener");
            }
            if !sub.visible.is_loading() {
                registered.listener.on_update(&sub.snapshot());
            }
            if sub.stale {
                registered.listener.on_stale(true);
            }
            sub.listeners.push(registered);
            self.by_handle.insert(handle, sub.id);
            self.stats.subscriptions_reused += 1;
            return Ok(SubscribeOutcome {
                handle,
                subscription: sub.id,
                created: false,
            });
        }

        let id = SubscriptionId::new(self.next_subscription_id);
        self.next_subscription_id += 1;
        let mut sub = QuerySubscription::new(id, key.clone(), name, args, stale);
        if stale {
            registered.listener.on_stale(true);
        }
        sub.listeners.push(registered);
        debug!(subscription = %id, key = %key, "Subscription created");

        self.by_key.insert(key, id);
        self.by_handle.insert(handle, id);
        self.subscriptions.insert(id, sub);
        self.stats.subscriptions_created += 1;

        Ok(SubscribeOutcome {
            handle,
            subscription: id,
            created: true,
        })
    }

    /// Remove a listener; an entry left without listeners enters its grace period
    ///
    /// Returns `false` for unknown (or already removed) handles.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle, now: Instant) -> bool {
        let Some(id) = self.by_handle.remove(&handle) else {
            return false;
        };
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.listeners.retain(|registered| registered.handle != handle);
            if sub.listeners.is_empty() {
                sub.evict_at = Some(now + self.config.unsubscribe_grace);
                debug!(
                    subscription = %id,
                    grace_ms = self.config.unsubscribe_grace.as_millis() as u64,
                    "Last listener removed, eviction scheduled"
                );
            }
        }
        true
    }

    /// Remove every listener whose reader has gone away
    ///
    /// Entries left without listeners enter their grace period exactly as after
    /// [`SubscriptionRegistry::unsubscribe`]. Returns how many listeners were removed.
    pub fn prune_closed(&mut self, now: Instant) -> usize {
        let closed: Vec<SubscriptionHandle> = self
            .subscriptions
            .values()
            .flat_map(|sub| sub.listeners.iter())
            .filter(|registered| registered.listener.is_closed())
            .map(|registered| registered.handle)
            .collect();
        for handle in &closed {
            debug!(%handle, "Listener reader dropped, unsubscribing");
            self.unsubscribe(*handle, now);
        }
        closed.len()
    }

    /// Earliest pending eviction deadline
    pub fn next_eviction(&self) -> Option<Instant> {
        self.subscriptions
            .values()
            .filter_map(|sub| sub.evict_at)
            .min()
    }

    /// Remove and return every entry whose grace period has ended
    pub fn take_due_evictions(&mut self, now: Instant) -> Vec<QuerySubscription> {
        let due: Vec<SubscriptionId> = self
            .subscriptions
            .values()
            .filter(|sub| sub.evict_at.is_some_and(|at| at <= now))
            .map(|sub| sub.id)
            .collect();
        let evicted: Vec<_> = due.into_iter().filter_map(|id| self.remove(id)).collect();
        self.stats.evictions += evicted.len() as u64;
        evicted
    }

    /// Tear a subscription down and report `error` to its listeners
    pub fn fail_subscription(&mut self, id: SubscriptionId, error: &SyncError) -> bool {
        match self.remove(id) {
            Some(mut sub) => {
                sub.notify_error(error);
                true
            }
            None => false,
        }
    }

    /// Tear everything down, reporting `error` to every listener
    pub fn fail_all(&mut self, error: &SyncError) {
        for sub in self.subscriptions.values_mut() {
            sub.notify_error(error);
        }
        self.subscriptions.clear();
        self.by_key.clear();
        self.by_handle.clear();
    }

    fn remove(&mut self, id: SubscriptionId) -> Option<QuerySubscription> {
        let sub = self.subscriptions.remove(&id)?;
        self.by_key.remove(&sub.key);
        for registered in &sub.listeners {
            self.by_handle.remove(&registered.handle);
        }
        Some(sub)
    }

    /// Store an authoritative result if it is newer than what we have
    ///
    /// An accepted delivery only updates the base; the caller recomputes views with
    /// [`SubscriptionRegistry::recompute`] so that optimistic layers are reapplied.
    pub fn deliver(&mut self, id: SubscriptionId, server_version: u64, state: QueryState) -> Delivery {
        let Some(sub) = self.subscriptions.get_mut(&id) else {
            return Delivery::Unknown;
        };
        if server_version > sub.base_version {
            sub.base = state;
            sub.base_version = server_version;
            self.stats.deliveries_applied += 1;
            Delivery::Applied
        } else if server_version == sub.base_version && sub.stale {
            sub.stale = false;
            sub.notify_stale();
            Delivery::Refreshed
        } else {
            trace!(
                subscription = %id,
                incoming = server_version,
                current = sub.base_version,
                "Discarding outdated result"
            );
            self.stats.deliveries_discarded += 1;
            Delivery::Discarded
        }
    }

    /// Replay `layers` on top of the authoritative results and notify changed views
    ///
    /// `delivered` names a subscription that just received an authoritative result;
    /// its listeners are notified even if the visible value did not change.
    pub fn recompute(
        &mut self,
        layers: &[(CorrelationId, OptimisticUpdate)],
        delivered: Option<SubscriptionId>,
    ) -> RecomputeReport {
        let mut view = ScratchView {
            values: self
                .subscriptions
                .values()
                .map(|sub| (sub.key.clone(), sub.base.clone()))
                .collect(),
            touched: HashSet::new(),
        };
        let mut report = RecomputeReport::default();

        for (correlation_id, update) in layers {
            let target: &mut dyn OptimisticView = &mut view;
            update(target);
            if !view.touched.is_empty() {
                report
                    .touched
                    .insert(*correlation_id, std::mem::take(&mut view.touched));
            }
        }

        let layered: HashSet<&QueryKey> = report.touched.values().flatten().collect();
        let mut values = view.values;

        for sub in self.subscriptions.values_mut() {
            let next = values.remove(&sub.key).unwrap_or_default();
            let is_delivery = delivered == Some(sub.id);

            if is_delivery {
                let local = u64::from(layered.contains(&sub.key));
                sub.version = Version::new(sub.base_version, local);
            } else if next != sub.visible {
                sub.version = sub.version.bump_local();
            } else {
                continue;
            }

            sub.visible = next;
            if is_delivery && sub.stale {
                sub.stale = false;
                sub.notify_stale();
            }
            sub.notify_update();
            report.notified += 1;
        }

        report
    }

    /// Tag every subscription stale, returning how many changed
    pub fn mark_stale(&mut self) -> usize {
        let mut changed = 0;
        for sub in self.subscriptions.values_mut().filter(|sub| !sub.stale) {
            sub.stale = true;
            sub.notify_stale();
            changed += 1;
        }
        changed
    }

    /// `Subscribe` frames for every registered subscription, in creation order
    pub fn resync_frames(&self) -> Vec<(SubscriptionId, ClientFrame)> {
        self.subscriptions
            .values()
            .map(|sub| (sub.id, sub.subscribe_frame()))
            .collect()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&QuerySubscription> {
        self.subscriptions.get(&id)
    }

    pub fn find(&self, key: &QueryKey) -> Option<&QuerySubscription> {
        self.by_key.get(key).and_then(|id| self.subscriptions.get(id))
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.by_handle.len()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_core::args;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Update(Version, QueryState),
        Stale(bool),
        Error(SyncError),
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Seen>>>);

    impl Recorder {
        fn take(&self) -> Vec<Seen> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl QueryListener for Recorder {
        fn on_update(&mut self, update: &QueryUpdate) {
            self.0
                .lock()
                .unwrap()
                .push(Seen::Update(update.version, update.state.clone()));
        }

        fn on_stale(&mut self, stale: bool) {
            self.0.lock().unwrap().push(Seen::Stale(stale));
        }

        fn on_error(&mut self, error: &SyncError) {
            self.0.lock().unwrap().push(Seen::Error(error.clone()));
        }
    }

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(
            RegistryConfig::default().with_unsubscribe_grace(Duration::from_secs(1)),
        )
    }

    fn loaded(n: i64) -> QueryState {
        QueryState::Loaded(Value::from(n))
    }

    #[test]
    fn test_same_key_is_shared() {
        let mut registry = registry();
        let first = registry
            .subscribe("listMessages".into(), args! {}, Box::new(Recorder::default()), false)
            .unwrap();
        let second = registry
            .subscribe("listMessages".into(), args! {}, Box::new(Recorder::default()), false)
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.subscription, second.subscription);
        assert_ne!(first.handle, second.handle);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.listener_count(), 2);
    }

    #[test]
    fn test_invalid_query_registers_nothing() {
        let mut registry = registry();
        let result = registry.subscribe(
            "".into(),
            args! {},
            Box::new(Recorder::default()),
            false,
        );
        assert!(matches!(result, Err(SyncError::InvalidQuery { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_late_listener_gets_current_result() {
        let mut registry = registry();
        let outcome = registry
            .subscribe("q".into(), args! {}, Box::new(Recorder::default()), false)
            .unwrap();
        assert_eq!(registry.deliver(outcome.subscription, 3, loaded(7)), Delivery::Applied);
        registry.recompute(&[], Some(outcome.subscription));

        let late = Recorder::default();
        registry
            .subscribe("q".into(), args! {}, Box::new(late.clone()), false)
            .unwrap();
        assert_eq!(late.take(), vec![Seen::Update(Version::server(3), loaded(7))]);
    }

    #[test]
    fn test_version_rule() {
        let mut registry = registry();
        let recorder = Recorder::default();
        let id = registry
            .subscribe("q".into(), args! {}, Box::new(recorder.clone()), false)
            .unwrap()
            .subscription;

        assert_eq!(registry.deliver(id, 2, loaded(1)), Delivery::Applied);
        registry.recompute(&[], Some(id));
        assert_eq!(registry.deliver(id, 2, loaded(9)), Delivery::Discarded);
        assert_eq!(registry.deliver(id, 1, loaded(9)), Delivery::Discarded);
        assert_eq!(registry.deliver(SubscriptionId::new(99), 5, loaded(9)), Delivery::Unknown);

        assert_eq!(recorder.take(), vec![Seen::Update(Version::server(2), loaded(1))]);
        assert_eq!(registry.stats().deliveries_discarded, 2);
    }

    #[test]
    fn test_grace_period_eviction() {
        let mut registry = registry();
        let now = Instant::now();
        let outcome = registry
            .subscribe("q".into(), args! {}, Box::new(Recorder::default()), false)
            .unwrap();

        assert!(registry.unsubscribe(outcome.handle, now));
        assert!(!registry.unsubscribe(outcome.handle, now));
        assert_eq!(registry.next_eviction(), Some(now + Duration::from_secs(1)));
        assert!(registry.take_due_evictions(now).is_empty());

        let evicted = registry.take_due_evictions(now + Duration::from_secs(1));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id(), outcome.subscription);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resubscribe_cancels_eviction() {
        let mut registry = registry();
        let now = Instant::now();
        let outcome = registry
            .subscribe("q".into(), args! {}, Box::new(Recorder::default()), false)
            .unwrap();
        registry.unsubscribe(outcome.handle, now);

        let again = registry
            .subscribe("q".into(), args! {}, Box::new(Recorder::default()), false)
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.subscription, outcome.subscription);
        assert_eq!(registry.next_eviction(), None);
        assert!(registry
            .take_due_evictions(now + Duration::from_secs(5))
            .is_empty());
    }

    #[test]
    fn test_stale_marking_and_refresh() {
        let mut registry = registry();
        let recorder = Recorder::default();
        let id = registry
            .subscribe("q".into(), args! {}, Box::new(recorder.clone()), false)
            .unwrap()
            .subscription;
        registry.deliver(id, 1, loaded(1));
        registry.recompute(&[], Some(id));
        recorder.take();

        assert_eq!(registry.mark_stale(), 1);
        assert_eq!(registry.mark_stale(), 0);
        assert!(registry.get(id).unwrap().is_stale());

        // Same version after reconnect: fresh again, value untouched.
        assert_eq!(registry.deliver(id, 1, loaded(1)), Delivery::Refreshed);
        assert_eq!(recorder.take(), vec![Seen::Stale(true), Seen::Stale(false)]);
        assert!(!registry.get(id).unwrap().is_stale());
    }

    #[test]
    fn test_optimistic_layer_and_rollback() {
        let mut registry = registry();
        let recorder = Recorder::default();
        let id = registry
            .subscribe("count".into(), args! {}, Box::new(recorder.clone()), false)
            .unwrap()
            .subscription;
        registry.deliver(id, 4, loaded(10));
        registry.recompute(&[], Some(id));

        let correlation_id = CorrelationId::generate();
        let increment: OptimisticUpdate = Arc::new(|view: &mut dyn OptimisticView| {
            let args = Args::new();
            let current = view.get_query("count", &args).and_then(Value::as_i64).unwrap_or(0);
            view.set_query("count", &args, Value::from(current + 1));
        });

        let report = registry.recompute(&[(correlation_id, increment)], None);
        assert_eq!(report.notified, 1);
        assert!(report.touched[&correlation_id].contains(&QueryKey::new("count", &args! {})));
        assert_eq!(registry.get(id).unwrap().state(), &loaded(11));

        // Rejection: replay without the layer.
        registry.recompute(&[], None);
        assert_eq!(registry.get(id).unwrap().state(), &loaded(10));

        assert_eq!(
            recorder.take(),
            vec![
                Seen::Update(Version::server(4), loaded(10)),
                Seen::Update(Version::new(4, 1), loaded(11)),
                Seen::Update(Version::new(4, 2), loaded(10)),
            ]
        );
    }

    #[test]
    fn test_unsubscribed_keys_are_not_written() {
        let mut registry = registry();
        let update: OptimisticUpdate = Arc::new(|view: &mut dyn OptimisticView| {
            assert!(!view.set_query("other", &Args::new(), Value::Null));
        });
        let report = registry.recompute(&[(CorrelationId::generate(), update)], None);
        assert!(report.touched.is_empty());
        assert_eq!(report.notified, 0);
    }

    #[test]
    fn test_fail_subscription_notifies_error() {
        let mut registry = registry();
        let recorder = Recorder::default();
        let outcome = registry
            .subscribe("q".into(), args! {}, Box::new(recorder.clone()), true)
            .unwrap();
        assert_eq!(recorder.take(), vec![Seen::Stale(true)]);

        let error = SyncError::Backpressure { capacity: 1 };
        assert!(registry.fail_subscription(outcome.subscription, &error));
        assert_eq!(recorder.take(), vec![Seen::Error(error)]);
        assert!(registry.is_empty());
        assert!(!registry.unsubscribe(outcome.handle, Instant::now()));
    }

    struct Detachable(Arc<std::sync::atomic::AtomicBool>);

    impl QueryListener for Detachable {
        fn on_update(&mut self, _update: &QueryUpdate) {}

        fn is_closed(&self) -> bool {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[test]
    fn test_closed_listeners_are_pruned_into_grace() {
        let mut registry = registry();
        let gone = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let outcome = registry
            .subscribe("q".into(), args! {}, Box::new(Detachable(Arc::clone(&gone))), false)
            .unwrap();
        registry
            .subscribe("other".into(), args! {}, Box::new(Recorder::default()), false)
            .unwrap();

        let now = Instant::now();
        assert_eq!(registry.prune_closed(now), 0);
        assert!(registry.next_eviction().is_none());

        gone.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(registry.prune_closed(now), 1);
        assert_eq!(registry.listener_count(), 1);
        assert!(registry.get(outcome.subscription).unwrap().is_pending_eviction());
        assert_eq!(registry.next_eviction(), Some(now + Duration::from_secs(1)));

        let evicted = registry.take_due_evictions(now + Duration::from_secs(1));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id(), outcome.subscription);
        assert_eq!(registry.len(), 1);
    }

    proptest::proptest! {
        #[test]
        fn prop_listeners_see_increasing_versions(versions in proptest::collection::vec(1u64..50, 1..40)) {
            let mut registry = registry();
            let recorder = Recorder::default();
            let id = registry
                .subscribe("q".into(), args! {}, Box::new(recorder.clone()), false)
                .unwrap()
                .subscription;

            for version in &versions {
                if registry.deliver(id, *version, loaded(*version as i64)) == Delivery::Applied {
                    registry.recompute(&[], Some(id));
                }
            }

            let seen: Vec<Version> = recorder
                .take()
                .into_iter()
                .filter_map(|seen| match seen {
                    Seen::Update(version, _) => Some(version),
                    _ => None,
                })
                .collect();
            proptest::prop_assert!(seen.windows(2).all(|pair| pair[0].server < pair[1].server));

            let max = versions.iter().copied().max().unwrap();
            proptest::prop_assert_eq!(seen.last().map(|v| v.server), Some(max));
            proptest::prop_assert_eq!(registry.get(id).unwrap().state(), &loaded(max as i64));
        }
    }
}
