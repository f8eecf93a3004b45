//! Peer activity tracking and block-download throttling.
//!
//! Block-download progress is coalesced to at most one chain-state broadcast
//! per throttle window, last value wins. Peer-count changes are never
//! throttled.
//!
//! The tracker only decides; the orchestrator's select loop owns the single
//! pending deadline, so cancel-then-reschedule happens atomically inside one
//! task with no window where both an old and a new deferred emission could
//! fire.

use std::time::Duration;
use tokio::time::Instant;

/// What to do with the chain-state broadcast after a downloaded block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// The window since the last emission has passed; emit immediately.
    EmitNow,
    /// A single deferred emission is now pending at this deadline.
    Deferred(Instant),
}

/// Tracks peer activity and throttles block-download broadcasts.
#[derive(Debug)]
pub struct PeerActivityTracker {
    throttle_window: Duration,
    max_indicator_level: u32,
    last_emit: Instant,
    pending_at: Option<Instant>,
}

impl PeerActivityTracker {
    pub fn new(throttle_window: Duration, max_indicator_level: u32, now: Instant) -> Self {
        Self {
            throttle_window,
            max_indicator_level,
            last_emit: now,
            pending_at: None,
        }
    }

    /// Handle one downloaded block.
    ///
    /// Any pending deferred emission is cancelled first, so bursts of rapid
    /// downloads collapse into one broadcast per window carrying whatever
    /// the chain looks like when the deadline fires.
    pub fn on_block_downloaded(&mut self, now: Instant) -> ThrottleDecision {
        self.pending_at = None;

        if now.duration_since(self.last_emit) > self.throttle_window {
            ThrottleDecision::EmitNow
        } else {
            let at = self.last_emit + self.throttle_window;
            self.pending_at = Some(at);
            ThrottleDecision::Deferred(at)
        }
    }

    /// Record that a chain-state broadcast went out.
    pub fn mark_emitted(&mut self, now: Instant) {
        self.last_emit = now;
        self.pending_at = None;
    }

    /// Deadline of the pending deferred emission, if one is scheduled.
    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending_at
    }

    /// Drop the pending deferred emission.
    pub fn cancel_pending(&mut self) {
        self.pending_at = None;
    }

    /// Indicator level for a peer count: cleared at zero, capped above the
    /// maximum display level.
    pub fn indicator_level(&self, peer_count: u32) -> Option<u8> {
        if peer_count == 0 {
            None
        } else {
            Some(peer_count.min(self.max_indicator_level) as u8)
        }
    }
}
