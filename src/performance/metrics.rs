//! Counters and moving averages for the performance subsystem.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

struct Averages {
    connection_time_ms: f64,
    message_latency_ms: f64,
    serialization_time_ms: f64,
    message_size_bytes: f64,
}

impl Averages {
    const fn new() -> Self {
        Self {
            connection_time_ms: 0.0,
            message_latency_ms: 0.0,
            serialization_time_ms: 0.0,
            message_size_bytes: 0.0,
        }
    }
}

const EMA_ALPHA: f64 = 0.1;

fn ema(current: f64, sample: f64) -> f64 {
    if current == 0.0 {
        sample
    } else {
        EMA_ALPHA.mul_add(sample - current, current)
    }
}

/// Accumulates performance counters and periodically-sampled moving
/// averages. Safe to read from any task at any time.
pub struct MetricsCollector {
    averages: Mutex<Averages>,
    errors_by_category: Mutex<std::collections::HashMap<&'static str, u64>>,
    samples_recorded: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            averages: Mutex::new(Averages::new()),
            errors_by_category: Mutex::new(std::collections::HashMap::new()),
            samples_recorded: AtomicU64::new(0),
        }
    }

    pub fn record_connection_time(&self, millis: f64) {
        let mut avg = self.averages.lock();
        avg.connection_time_ms = ema(avg.connection_time_ms, millis);
        drop(avg);
        self.samples_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_latency(&self, millis: f64) {
        let mut avg = self.averages.lock();
        avg.message_latency_ms = ema(avg.message_latency_ms, millis);
        self.samples_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_serialization(&self, millis: f64, size_bytes: f64) {
        let mut avg = self.averages.lock();
        avg.serialization_time_ms = ema(avg.serialization_time_ms, millis);
        avg.message_size_bytes = ema(avg.message_size_bytes, size_bytes);
        self.samples_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, category: &'static str) {
        *self.errors_by_category.lock().entry(category).or_insert(0) += 1;
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let avg = self.averages.lock();
        MetricsSnapshot {
            average_connection_time_ms: avg.connection_time_ms,
            average_message_latency_ms: avg.message_latency_ms,
            average_serialization_time_ms: avg.serialization_time_ms,
            average_message_size_bytes: avg.message_size_bytes,
            errors_by_category: self.errors_by_category.lock().clone(),
            samples_recorded: self.samples_recorded.load(Ordering::Relaxed),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub average_connection_time_ms: f64,
    pub average_message_latency_ms: f64,
    pub average_serialization_time_ms: f64,
    pub average_message_size_bytes: f64,
    pub errors_by_category: std::collections::HashMap<&'static str, u64>,
    pub samples_recorded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_average_directly() {
        let metrics = MetricsCollector::new();
        metrics.record_message_latency(12.0);
        assert_eq!(metrics.snapshot().average_message_latency_ms, 12.0);
    }

    #[test]
    fn errors_are_counted_by_category() {
        let metrics = MetricsCollector::new();
        metrics.record_error("serialization");
        metrics.record_error("serialization");
        metrics.record_error("connection");
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.errors_by_category["serialization"], 2);
        assert_eq!(snapshot.errors_by_category["connection"], 1);
    }
}
