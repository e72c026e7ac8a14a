//! Centralized Configuration Management
//!
//! All tunables of the sync engine live here. Every struct has a `Default`, named
//! presets, `with_*` builders and a `validate()` that the runtime calls before
//! spawning anything.

use crate::errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for CSP channel buffer sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (client handle → engine)
    pub command_buffer_size: usize,
    /// Buffer size for Event channels (transport → engine)
    pub event_buffer_size: usize,
    /// Buffer size for AppEvent broadcast (engine → observers)
    pub app_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 64,
            event_buffer_size: 256, // server pushes can be bursty
            app_event_buffer_size: 64,
        }
    }
}

impl ChannelConfig {
    /// Smaller buffers for memory constrained devices
    pub fn low_memory() -> Self {
        Self {
            command_buffer_size: 16,
            event_buffer_size: 64,
            app_event_buffer_size: 16,
        }
    }

    pub fn testing() -> Self {
        Self {
            command_buffer_size: 16,
            event_buffer_size: 32,
            app_event_buffer_size: 64,
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.command_buffer_size == 0
            || self.event_buffer_size == 0
            || self.app_event_buffer_size == 0
        {
            return Err(SyncError::config_error("channel buffer sizes must be non-zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Registry Configuration
// ----------------------------------------------------------------------------

/// Configuration for the subscription registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long an entry without listeners is kept before it is unsubscribed
    pub unsubscribe_grace: Duration,
    /// Maximum nesting depth accepted in query and mutation arguments
    pub max_arg_depth: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            unsubscribe_grace: Duration::from_secs(5),
            max_arg_depth: 64,
        }
    }
}

impl RegistryConfig {
    pub fn with_unsubscribe_grace(mut self, grace: Duration) -> Self {
        self.unsubscribe_grace = grace;
        self
    }

    pub fn with_max_arg_depth(mut self, depth: usize) -> Self {
        self.max_arg_depth = depth;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.max_arg_depth == 0 {
            return Err(SyncError::config_error("max_arg_depth must be at least 1"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Mutation Configuration
// ----------------------------------------------------------------------------

/// Configuration for the mutation dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Deadline for an acknowledgement, measured from submission
    pub ack_timeout: Duration,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(30),
        }
    }
}

impl MutationConfig {
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.ack_timeout.is_zero() {
            return Err(SyncError::config_error("ack_timeout must be non-zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Outbound Buffer Configuration
// ----------------------------------------------------------------------------

/// Configuration for the frame buffer used while the link is down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Maximum number of frames held while not connected
    pub buffer_capacity: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
        }
    }
}

impl OutboundConfig {
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.buffer_capacity == 0 {
            return Err(SyncError::config_error("outbound buffer capacity must be non-zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Backoff Configuration
// ----------------------------------------------------------------------------

/// Exponential backoff with jitter for connection attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Relative jitter in `[0, 1]` applied symmetrically around the delay
    pub jitter: f64,
    /// Failed attempts allowed per connect cycle; 0 means unlimited
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: 10,
        }
    }
}

impl BackoffConfig {
    /// Fast, deterministic retries for tests
    pub fn testing() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 3,
        }
    }

    /// Patient retries for devices that move in and out of coverage
    pub fn mobile() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 1.5,
            jitter: 0.3,
            max_attempts: 0,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.initial_delay > self.max_delay {
            return Err(SyncError::config_error(
                "backoff initial_delay must not exceed max_delay",
            ));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(SyncError::config_error("backoff multiplier must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(SyncError::config_error("backoff jitter must be within [0, 1]"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Sync Engine Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of one sync engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub channels: ChannelConfig,
    pub registry: RegistryConfig,
    pub mutations: MutationConfig,
    pub outbound: OutboundConfig,
    pub reconnect: BackoffConfig,
}

impl SyncConfig {
    /// Short timers and small buffers so tests finish quickly
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            registry: RegistryConfig::default().with_unsubscribe_grace(Duration::from_millis(100)),
            mutations: MutationConfig::default().with_ack_timeout(Duration::from_secs(2)),
            outbound: OutboundConfig::default().with_buffer_capacity(16),
            reconnect: BackoffConfig::testing(),
        }
    }

    /// Tolerant timers for flaky mobile networks
    pub fn mobile() -> Self {
        Self {
            channels: ChannelConfig::low_memory(),
            registry: RegistryConfig::default().with_unsubscribe_grace(Duration::from_secs(10)),
            mutations: MutationConfig::default().with_ack_timeout(Duration::from_secs(60)),
            outbound: OutboundConfig::default().with_buffer_capacity(128),
            reconnect: BackoffConfig::mobile(),
        }
    }

    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_mutations(mut self, mutations: MutationConfig) -> Self {
        self.mutations = mutations;
        self
    }

    pub fn with_outbound(mut self, outbound: OutboundConfig) -> Self {
        self.outbound = outbound;
        self
    }

    pub fn with_reconnect(mut self, reconnect: BackoffConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        self.channels.validate()?;
        self.registry.validate()?;
        self.mutations.validate()?;
        self.outbound.validate()?;
        self.reconnect.validate()?;
        Ok(())
    }
}
