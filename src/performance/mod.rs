//! Shared resource governor for the transport: buffer pool, batcher,
//! admission control, serialization, metrics, and memory pressure.

pub mod admission;
pub mod batcher;
pub mod buffer_pool;
pub mod memory;
pub mod metrics;
pub mod serializer;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::PerformanceConfig;
use crate::event::Event;
use admission::ConnectionSlots;
use batcher::MessageBatcher;
use memory::MemoryManager;
use metrics::MetricsCollector;
use serializer::SerializerFactory;

/// Owns every shared-resource facility the send/receive pipeline draws on.
pub struct PerformanceManager {
    pub batcher: Arc<MessageBatcher>,
    pub slots: Arc<ConnectionSlots>,
    pub serializer: Arc<SerializerFactory>,
    pub metrics: Arc<MetricsCollector>,
    pub memory: Arc<MemoryManager>,
    flush_check_interval: Duration,
    flush_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceManager {
    #[must_use]
    pub fn new(config: &PerformanceConfig) -> Self {
        Self {
            batcher: Arc::new(MessageBatcher::new(
                config.batch_target_size,
                config.flush_interval,
            )),
            slots: Arc::new(ConnectionSlots::new(config.connection_slots)),
            serializer: Arc::new(SerializerFactory::new(
                config.serializer,
                config.connection_slots,
                config.max_event_size.min(64 * 1024),
            )),
            metrics: Arc::new(MetricsCollector::new()),
            memory: MemoryManager::new(config.max_event_size * config.connection_slots),
            flush_check_interval: config.flush_interval,
            flush_task: parking_lot::Mutex::new(None),
        }
    }

    /// Starts the batcher's time-based flush tick and the memory monitor.
    pub fn start(&self) {
        self.memory.start();

        let batcher = Arc::clone(&self.batcher);
        let flush_interval = self.flush_check_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(flush_interval);
            loop {
                ticker.tick().await;
                batcher.poll_flush();
            }
        });
        *self.flush_task.lock() = Some(handle);
    }

    pub fn stop(&self) {
        self.memory.stop();
        if let Some(handle) = self.flush_task.lock().take() {
            handle.abort();
        }
    }

    /// Serializes `event`, recording serialization time and message size.
    pub fn optimize_message<E: Event>(&self, event: &E) -> crate::Result<Vec<u8>> {
        let start = Instant::now();
        let bytes = self.serializer.serialize(event)?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .record_serialization(elapsed_ms, bytes.len() as f64);
        Ok(bytes)
    }

    /// Submits `bytes` to the batcher. Always succeeds from the caller's
    /// perspective; downstream delivery failure is accounted at send time.
    pub fn batch_message(&self, bytes: Vec<u8>) {
        self.batcher.add_message(bytes);
    }

    /// Raises the batch target size and leaves pooling in its existing state.
    /// Favors fewer, larger writes over per-message latency.
    pub fn optimize_for_throughput(&self) {
        let current = self.batcher.target_size();
        self.batcher
            .reconfigure(current.max(DEFAULT_THROUGHPUT_BATCH_SIZE), self.batcher.flush_interval());
    }

    /// Caps batch size and flush interval so messages leave quickly.
    pub fn optimize_for_latency(&self) {
        self.batcher.reconfigure(
            self.batcher.target_size().min(LATENCY_BATCH_SIZE),
            Duration::from_millis(LATENCY_FLUSH_INTERVAL_MS),
        );
    }

    /// Shrinks the batch target size to reduce pending-message memory.
    pub fn optimize_for_memory(&self) {
        self.batcher
            .reconfigure(MEMORY_BATCH_SIZE, self.batcher.flush_interval());
        self.memory.trigger_check();
    }
}

const DEFAULT_THROUGHPUT_BATCH_SIZE: usize = 128;
const LATENCY_BATCH_SIZE: usize = 5;
const LATENCY_FLUSH_INTERVAL_MS: u64 = 1;
const MEMORY_BATCH_SIZE: usize = 8;

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Sample {
        value: u32,
    }

    impl Event for Sample {
        fn event_type(&self) -> &str {
            "sample"
        }
    }

    #[test]
    fn optimize_message_serializes_and_records_metrics() {
        let manager = PerformanceManager::new(&PerformanceConfig::default());
        let bytes = manager.optimize_message(&Sample { value: 1 }).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(manager.metrics.snapshot().samples_recorded, 1);
    }

    #[test]
    fn batch_message_feeds_the_batcher() {
        let manager = PerformanceManager::new(&PerformanceConfig {
            batch_target_size: 1,
            ..PerformanceConfig::default()
        });
        manager.batch_message(vec![1, 2, 3]);
        assert_eq!(manager.batcher.get_batch(), Some(vec![vec![1, 2, 3]]));
    }

    #[test]
    fn optimize_for_latency_shrinks_batch_and_flush_interval() {
        let manager = PerformanceManager::new(&PerformanceConfig::default());
        manager.optimize_for_latency();
        assert_eq!(manager.batcher.target_size(), LATENCY_BATCH_SIZE);
        assert_eq!(
            manager.batcher.flush_interval(),
            Duration::from_millis(LATENCY_FLUSH_INTERVAL_MS)
        );
    }

    #[test]
    fn optimize_for_throughput_never_shrinks_batch_size() {
        let manager = PerformanceManager::new(&PerformanceConfig {
            batch_target_size: 500,
            ..PerformanceConfig::default()
        });
        manager.optimize_for_throughput();
        assert_eq!(manager.batcher.target_size(), 500);
    }

    #[test]
    fn optimize_for_memory_shrinks_batch_size() {
        let manager = PerformanceManager::new(&PerformanceConfig::default());
        manager.optimize_for_memory();
        assert_eq!(manager.batcher.target_size(), MEMORY_BATCH_SIZE);
    }
}
