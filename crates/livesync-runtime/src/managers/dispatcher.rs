//! Mutation dispatcher
//!
//! Tracks every submitted mutation from submission until it is acknowledged, rejected
//! or timed out. Entries are kept in submission order so that a resync replays the
//! unacknowledged ones exactly as they were issued, with their original correlation
//! ids. A successfully acknowledged mutation with an optimistic update stays in the
//! table as a *committed layer* until an authoritative result for one of the queries
//! it touched supersedes it.

use livesync_core::channel::Reply;
use livesync_core::value::{validate_args, validate_function_name};
use livesync_core::{
    Args, ClientFrame, CorrelationId, MutationConfig, OptimisticUpdate, QueryKey, SyncError,
    SyncResult, Value,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tokio::time::Instant;
use tracing::debug;

// ----------------------------------------------------------------------------
// Pending mutation
// ----------------------------------------------------------------------------

/// Completion state of a tracked mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    /// Waiting for an acknowledgement; replayed on resync
    Pending,
    /// Acknowledged; only its optimistic layer is still alive
    Committed,
    /// Rejected, timed out or dropped locally
    Failed,
}

pub struct PendingMutation {
    correlation_id: CorrelationId,
    sequence: u64,
    name: String,
    args: Args,
    optimistic: Option<OptimisticUpdate>,
    status: MutationStatus,
    submitted_at: Instant,
    deadline: Instant,
    send_count: u32,
    touched: HashSet<QueryKey>,
    reply: Option<Reply<Value>>,
}

impl PendingMutation {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> MutationStatus {
        self.status
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn send_count(&self) -> u32 {
        self.send_count
    }

    pub fn has_optimistic_update(&self) -> bool {
        self.optimistic.is_some()
    }

    pub fn frame(&self) -> ClientFrame {
        ClientFrame::Mutate {
            correlation_id: self.correlation_id,
            name: self.name.clone(),
            args: self.args.clone(),
        }
    }

    fn resolve(&mut self, result: SyncResult<Value>) {
        if let Some(reply) = self.reply.take() {
            // The caller may have dropped its future; the result is simply discarded.
            if reply.send(result).is_err() {
                debug!(correlation_id = %self.correlation_id, "Mutation caller went away");
            }
        }
    }
}

impl fmt::Debug for PendingMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingMutation")
            .field("correlation_id", &self.correlation_id)
            .field("sequence", &self.sequence)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("send_count", &self.send_count)
            .field("optimistic", &self.optimistic.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Outcomes and statistics
// ----------------------------------------------------------------------------

/// Result of matching an acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// No mutation with this correlation id is in flight
    Unknown,
    /// Acknowledged before; the repeated ack is ignored
    Duplicate,
    /// Success; `layer_retained` tells whether its optimistic layer is still applied
    Committed { layer_retained: bool },
    /// Failure; `had_layer` tells whether views must be recomputed
    Rejected { had_layer: bool },
}

/// Dispatcher counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub committed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub failed_locally: u64,
    pub layers_retired: u64,
}

// ----------------------------------------------------------------------------
// Mutation Dispatcher
// ----------------------------------------------------------------------------

pub struct MutationDispatcher {
    config: MutationConfig,
    max_arg_depth: usize,
    next_sequence: u64,
    entries: BTreeMap<u64, PendingMutation>,
    sequences: HashMap<CorrelationId, u64>,
    stats: DispatcherStats,
}

impl MutationDispatcher {
    pub fn new(config: MutationConfig, max_arg_depth: usize) -> Self {
        Self {
            config,
            max_arg_depth,
            next_sequence: 0,
            entries: BTreeMap::new(),
            sequences: HashMap::new(),
            stats: DispatcherStats::default(),
        }
    }

    pub fn validate(&self, name: &str, args: &Args) -> SyncResult<()> {
        validate_function_name(name).map_err(SyncError::invalid_mutation)?;
        validate_args(args, self.max_arg_depth).map_err(SyncError::invalid_mutation)
    }

    /// Start tracking a validated mutation; its deadline runs from `now`
    pub fn submit(
        &mut self,
        name: String,
        args: Args,
        optimistic: Option<OptimisticUpdate>,
        reply: Reply<Value>,
        now: Instant,
    ) -> CorrelationId {
        let correlation_id = CorrelationId::generate();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.entries.insert(
            sequence,
            PendingMutation {
                correlation_id,
                sequence,
                name,
                args,
                optimistic,
                status: MutationStatus::Pending,
                submitted_at: now,
                deadline: now + self.config.ack_timeout,
                send_count: 0,
                touched: HashSet::new(),
                reply: Some(reply),
            },
        );
        self.sequences.insert(correlation_id, sequence);
        self.stats.submitted += 1;
        correlation_id
    }

    pub fn get(&self, correlation_id: &CorrelationId) -> Option<&PendingMutation> {
        self.sequences
            .get(correlation_id)
            .and_then(|seq| self.entries.get(seq))
    }

    fn get_mut(&mut self, correlation_id: &CorrelationId) -> Option<&mut PendingMutation> {
        self.sequences
            .get(correlation_id)
            .and_then(|seq| self.entries.get_mut(seq))
    }

    fn remove(&mut self, correlation_id: &CorrelationId) -> Option<PendingMutation> {
        let seq = self.sequences.remove(correlation_id)?;
        self.entries.remove(&seq)
    }

    /// Record that the mutation's frame was handed to the transport or buffer
    pub fn mark_sent(&mut self, correlation_id: &CorrelationId) -> bool {
        match self.get_mut(correlation_id) {
            Some(entry) => {
                entry.send_count += 1;
                true
            }
            None => false,
        }
    }

    /// Match an acknowledgement and complete the caller's future
    pub fn acknowledge(
        &mut self,
        correlation_id: &CorrelationId,
        outcome: Result<Value, String>,
    ) -> AckOutcome {
        let Some(entry) = self.get_mut(correlation_id) else {
            return AckOutcome::Unknown;
        };
        if entry.status != MutationStatus::Pending {
            return AckOutcome::Duplicate;
        }

        let result = match outcome {
            Ok(value) => {
                entry.resolve(Ok(value));
                entry.status = MutationStatus::Committed;
                AckOutcome::Committed {
                    layer_retained: entry.optimistic.is_some() && !entry.touched.is_empty(),
                }
            }
            Err(reason) => {
                entry.status = MutationStatus::Failed;
                entry.resolve(Err(SyncError::rejected(reason)));
                AckOutcome::Rejected {
                    had_layer: entry.optimistic.is_some(),
                }
            }
        };

        match result {
            AckOutcome::Committed { layer_retained } => {
                self.stats.committed += 1;
                if !layer_retained {
                    self.remove(correlation_id);
                }
            }
            AckOutcome::Rejected { .. } => {
                self.stats.rejected += 1;
                self.remove(correlation_id);
            }
            AckOutcome::Unknown | AckOutcome::Duplicate => {}
        }
        result
    }

    /// Fail one mutation locally (e.g. dropped by backpressure)
    ///
    /// Returns whether it carried an optimistic layer.
    pub fn fail(&mut self, correlation_id: &CorrelationId, error: SyncError) -> Option<bool> {
        let mut entry = self.remove(correlation_id)?;
        entry.status = MutationStatus::Failed;
        entry.resolve(Err(error));
        self.stats.failed_locally += 1;
        Some(entry.optimistic.is_some())
    }

    /// Fail every tracked mutation, committed layers included
    pub fn fail_all(&mut self, error: &SyncError) {
        for (_, mut entry) in std::mem::take(&mut self.entries) {
            entry.status = MutationStatus::Failed;
            entry.resolve(Err(error.clone()));
        }
        self.sequences.clear();
    }

    /// Time out every pending mutation whose deadline has passed
    ///
    /// Returns the expired correlation ids and whether any of them had a layer.
    pub fn expire(&mut self, now: Instant) -> (Vec<CorrelationId>, bool) {
        let expired: Vec<CorrelationId> = self
            .entries
            .values()
            .filter(|entry| entry.status == MutationStatus::Pending && entry.deadline <= now)
            .map(|entry| entry.correlation_id)
            .collect();

        let mut had_layer = false;
        for correlation_id in &expired {
            if let Some(mut entry) = self.remove(correlation_id) {
                had_layer |= entry.optimistic.is_some();
                entry.status = MutationStatus::Failed;
                entry.resolve(Err(SyncError::MutationTimeout {
                    correlation_id: *correlation_id,
                    after: self.config.ack_timeout,
                }));
                self.stats.timed_out += 1;
            }
        }
        (expired, had_layer)
    }

    /// Earliest ack deadline among pending mutations
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|entry| entry.status == MutationStatus::Pending)
            .map(|entry| entry.deadline)
            .min()
    }

    /// `Mutate` frames for every unacknowledged mutation, in submission order
    pub fn resync_frames(&self) -> Vec<(CorrelationId, ClientFrame)> {
        self.entries
            .values()
            .filter(|entry| entry.status == MutationStatus::Pending)
            .map(|entry| (entry.correlation_id, entry.frame()))
            .collect()
    }

    /// Optimistic updates still in effect, in submission order
    pub fn optimistic_layers(&self) -> Vec<(CorrelationId, OptimisticUpdate)> {
        self.entries
            .values()
            .filter_map(|entry| {
                entry
                    .optimistic
                    .as_ref()
                    .map(|update| (entry.correlation_id, update.clone()))
            })
            .collect()
    }

    /// Store which query keys each layer wrote during the last recomputation
    ///
    /// Committed layers that no longer touch anything are retired.
    pub fn record_touched(&mut self, mut touched: HashMap<CorrelationId, HashSet<QueryKey>>) -> usize {
        for entry in self.entries.values_mut().filter(|e| e.optimistic.is_some()) {
            entry.touched = touched.remove(&entry.correlation_id).unwrap_or_default();
        }
        self.retire_where(|entry| entry.touched.is_empty())
    }

    /// Retire committed layers superseded by an authoritative result for `key`
    pub fn retire_layers_touching(&mut self, key: &QueryKey) -> usize {
        self.retire_where(|entry| entry.touched.contains(key))
    }

    fn retire_where(&mut self, predicate: impl Fn(&PendingMutation) -> bool) -> usize {
        let retired: Vec<CorrelationId> = self
            .entries
            .values()
            .filter(|entry| entry.status == MutationStatus::Committed && predicate(entry))
            .map(|entry| entry.correlation_id)
            .collect();
        for correlation_id in &retired {
            self.remove(correlation_id);
        }
        self.stats.layers_retired += retired.len() as u64;
        retired.len()
    }

    /// Mutations still awaiting an acknowledgement
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.status == MutationStatus::Pending)
            .count()
    }

    /// Tracked entries, committed layers included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }
}
