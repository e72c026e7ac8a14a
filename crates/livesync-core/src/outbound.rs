//! Bounded FIFO of frames produced while the link is down
//!
//! Every buffered frame remembers the call that produced it so that, when the buffer
//! overflows, the engine can fail exactly that call with `Backpressure`.

use crate::frame::ClientFrame;
use crate::types::{CorrelationId, SubscriptionId};
use std::collections::VecDeque;

/// The caller-visible operation a buffered frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameOrigin {
    Subscription(SubscriptionId),
    Mutation(CorrelationId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferedFrame {
    pub frame: ClientFrame,
    pub origin: FrameOrigin,
}

/// Counters for buffer activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundStats {
    pub frames_buffered: u64,
    pub frames_evicted: u64,
    pub high_water_mark: usize,
}

#[derive(Debug)]
pub struct OutboundBuffer {
    capacity: usize,
    frames: VecDeque<BufferedFrame>,
    stats: OutboundStats,
}

impl OutboundBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
            stats: OutboundStats::default(),
        }
    }

    /// Append a frame, returning the oldest frame if it had to make room
    pub fn push(&mut self, frame: ClientFrame, origin: FrameOrigin) -> Option<BufferedFrame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.stats.frames_evicted += 1;
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(BufferedFrame { frame, origin });
        self.stats.frames_buffered += 1;
        self.stats.high_water_mark = self.stats.high_water_mark.max(self.frames.len());
        evicted
    }

    /// Drop every frame that belongs to `origin`, returning how many were removed
    pub fn remove_origin(&mut self, origin: FrameOrigin) -> usize {
        let before = self.frames.len();
        self.frames.retain(|buffered| buffered.origin != origin);
        before - self.frames.len()
    }

    pub fn contains_origin(&self, origin: FrameOrigin) -> bool {
        self.frames.iter().any(|buffered| buffered.origin == origin)
    }

    /// Empty the buffer
    pub fn clear(&mut self) -> Vec<BufferedFrame> {
        self.frames.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedFrame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &OutboundStats {
        &self.stats
    }
}
