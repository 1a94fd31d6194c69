//! Counters for what the stream delivered and what it discarded.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::wire::DropReason;

#[derive(Debug, Default)]
pub struct StreamStats {
    /// Payloads read off any connection
    pub payloads_received: AtomicU64,
    /// Validated events handed to a handler (heartbeats included)
    pub events_dispatched: AtomicU64,
    /// Payloads over the size limit
    pub dropped_oversized: AtomicU64,
    /// Payloads that were not JSON
    pub dropped_malformed: AtomicU64,
    /// JSON payloads with an unknown tag or a bad shape
    pub dropped_invalid: AtomicU64,
    /// Connections that opened successfully
    pub connections_opened: AtomicU64,
    /// Reconnects put on the timer
    pub reconnects_scheduled: AtomicU64,
    /// Lifecycle notices lost to a full observer channel
    pub notices_dropped: AtomicU64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_payload(&self) {
        self.payloads_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Oversized => &self.dropped_oversized,
            DropReason::Malformed => &self.dropped_malformed,
            DropReason::Invalid => &self.dropped_invalid,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_open(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notice_dropped(&self) {
        self.notices_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            payloads_received: self.payloads_received.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            dropped_oversized: self.dropped_oversized.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            notices_dropped: self.notices_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamStats`] (for logging/serialization)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub payloads_received: u64,
    pub events_dispatched: u64,
    pub dropped_oversized: u64,
    pub dropped_malformed: u64,
    pub dropped_invalid: u64,
    pub connections_opened: u64,
    pub reconnects_scheduled: u64,
    pub notices_dropped: u64,
}

impl StatsSnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_oversized + self.dropped_malformed + self.dropped_invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_are_bucketed_by_reason() {
        let stats = StreamStats::new();
        stats.record_drop(DropReason::Oversized);
        stats.record_drop(DropReason::Malformed);
        stats.record_drop(DropReason::Malformed);
        stats.record_drop(DropReason::Invalid);

        let snap = stats.snapshot();
        assert_eq!(snap.dropped_oversized, 1);
        assert_eq!(snap.dropped_malformed, 2);
        assert_eq!(snap.dropped_invalid, 1);
        assert_eq!(snap.dropped_total(), 4);
        assert_eq!(snap.events_dispatched, 0);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = StreamStats::new();
        stats.record_payload();
        stats.record_dispatch();
        stats.record_open();
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"payloads_received\":1"));
        assert!(json.contains("\"connections_opened\":1"));
    }
}
