//! Aggregate counters exposed by [`super::Transport`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const EMA_ALPHA: f64 = 0.1;

/// Atomics-backed counters for the send/receive pipeline. Mutated from
/// multiple tasks; read via [`TransportStatsInner::snapshot`].
pub(crate) struct TransportStatsInner {
    events_sent: AtomicU64,
    events_failed: AtomicU64,
    events_dropped: AtomicU64,
    bytes_transferred: AtomicU64,
    backpressure_events: AtomicU64,
    backpressure_active: AtomicBool,
    average_latency_bits: AtomicU64,
}

impl Default for TransportStatsInner {
    fn default() -> Self {
        Self {
            events_sent: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            backpressure_events: AtomicU64::new(0),
            backpressure_active: AtomicBool::new(false),
            average_latency_bits: AtomicU64::new(0),
        }
    }
}

impl TransportStatsInner {
    pub(crate) fn record_send_success(&self, bytes: u64, latency_ms: f64) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        self.update_average_latency(latency_ms);
    }

    pub(crate) fn record_send_failure(&self) {
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Reverses an optimistic success accounting once a batched delivery
    /// later fails.
    pub(crate) fn revert_send_success(&self, bytes: u64) {
        self.events_sent.fetch_sub(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_sub(bytes, Ordering::Relaxed);
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        self.events_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_backpressure(&self) {
        self.backpressure_active.store(true, Ordering::Relaxed);
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn clear_backpressure(&self) {
        self.backpressure_active.store(false, Ordering::Relaxed);
    }

    fn update_average_latency(&self, sample_ms: f64) {
        let current = f64::from_bits(self.average_latency_bits.load(Ordering::Relaxed));
        let updated = if current == 0.0 {
            sample_ms
        } else {
            EMA_ALPHA.mul_add(sample_ms - current, current)
        };
        self.average_latency_bits
            .store(updated.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        active_subscriptions: usize,
        total_subscriptions_created: u64,
    ) -> TransportStats {
        TransportStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            backpressure_active: self.backpressure_active.load(Ordering::Relaxed),
            average_latency_ms: f64::from_bits(self.average_latency_bits.load(Ordering::Relaxed)),
            active_subscriptions,
            total_subscriptions_created,
        }
    }
}

/// Point-in-time snapshot of [`super::Transport`]'s counters.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct TransportStats {
    pub events_sent: u64,
    pub events_failed: u64,
    pub events_dropped: u64,
    pub bytes_transferred: u64,
    pub backpressure_events: u64,
    pub backpressure_active: bool,
    pub average_latency_ms: f64,
    pub active_subscriptions: usize,
    pub total_subscriptions_created: u64,
}
