//! Transport counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the dispatcher, unit tasks and sweep
#[derive(Debug, Default)]
pub struct TransportStats {
    dispatched: AtomicU64,
    short_circuited: AtomicU64,
    routing_errors: AtomicU64,
    rewinds: AtomicU64,
    swept: AtomicU64,
    responses_posted: AtomicU64,
    responses_dropped: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Commands forwarded to a unit inbox
    pub dispatched: u64,
    /// Commands answered directly by the dispatcher
    pub short_circuited: u64,
    /// Routable commands that could not be delivered
    pub routing_errors: u64,
    /// Wrap markers consumed
    pub rewinds: u64,
    /// Records reclaimed by sweep
    pub swept: u64,
    pub responses_posted: u64,
    /// Responses lost to a full response ring
    pub responses_dropped: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_short_circuit(&self) {
        self.short_circuited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_routing_error(&self) {
        self.routing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rewind(&self) {
        self.rewinds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swept(&self, records: u64) {
        self.swept.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn record_response(&self, posted: bool) {
        if posted {
            self.responses_posted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.responses_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
            rewinds: self.rewinds.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
            responses_posted: self.responses_posted.load(Ordering::Relaxed),
            responses_dropped: self.responses_dropped.load(Ordering::Relaxed),
        }
    }
}
