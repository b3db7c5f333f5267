//! The top-level facade: assembles [`crate::pool::ConnectionPool`] and
//! [`crate::performance::PerformanceManager`] behind a single handle, owns
//! the handler/subscription registry, and drives the inbound and batch
//! processing loops.

pub mod dispatch;
pub mod stats;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DropAction, TransportConfig};
use crate::error::Error;
use crate::event::Event;
use crate::id::{HandlerId, SubscriptionId};
use crate::performance::PerformanceManager;
use crate::performance::metrics::MetricsSnapshot;
use crate::pool::{ConnectionPool, ConnectionPoolStats};

pub use dispatch::{HandlerFn, Subscription};
pub use stats::TransportStats;

use dispatch::{Dispatcher, run_event_processing_loop};
use stats::TransportStatsInner;

const BATCH_PROCESSING_INTERVAL_MS: u64 = 5;

/// Client-side WebSocket transport assembling a connection pool, a
/// performance/serialization pipeline, and an event dispatch registry.
///
/// Cheap to clone-by-reference: callers are expected to hold this behind an
/// `Arc<Transport>` (or rely on the internal `Arc`s) and share it across
/// tasks; every public method takes `&self`.
pub struct Transport {
    config: TransportConfig,
    pool: Arc<ConnectionPool>,
    performance: Arc<PerformanceManager>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<TransportStatsInner>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: AsyncMutex<Option<mpsc::Receiver<Vec<u8>>>>,
    inbound_closed: AtomicBool,
    stop_guard: AtomicBool,
    cancel: CancellationToken,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Transport {
    /// Validates `config` and assembles every subsystem without touching the
    /// network. Call [`Transport::start`] to actually dial.
    pub fn new(config: TransportConfig) -> crate::Result<Arc<Self>> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::new(
            config.urls.clone(),
            config.pool.clone(),
            config.heartbeat.clone(),
        ));
        let performance = Arc::new(PerformanceManager::new(&config.performance));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.backpressure.event_channel_buffer);

        Ok(Arc::new(Self {
            config,
            pool,
            performance,
            dispatcher: Arc::new(Dispatcher::default()),
            stats: Arc::new(TransportStatsInner::default()),
            inbound_tx,
            inbound_rx: AsyncMutex::new(Some(inbound_rx)),
            inbound_closed: AtomicBool::new(false),
            stop_guard: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            workers: AsyncMutex::new(Vec::new()),
        }))
    }

    /// Dials the pool's minimum connections, starts the performance
    /// subsystem, and spawns the event-processing and batch-processing
    /// loops.
    pub async fn start(self: &Arc<Self>) -> crate::Result<()> {
        self.performance.start();

        let this = Arc::clone(self);
        self.pool
            .set_message_handler(Arc::new(move |bytes| this.on_inbound_frame(bytes)))
            .await;
        self.pool.start().await?;

        let Some(inbound_rx) = self.inbound_rx.lock().await.take() else {
            return Err(Error::configuration("transport already started"));
        };

        let mut workers = self.workers.lock().await;
        workers.push(tokio::spawn(run_event_processing_loop(
            inbound_rx,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.stats),
            self.config.event_timeout,
            self.cancel.child_token(),
        )));
        workers.push(self.spawn_batch_processing_loop());
        drop(workers);

        Ok(())
    }

    fn spawn_batch_processing_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(BATCH_PROCESSING_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = cancel.cancelled() => break,
                }
                while let Some(batch) = this.performance.batcher.get_batch() {
                    for bytes in batch {
                        let len = bytes.len() as u64;
                        if let Err(_e) = this.pool.send_message(bytes).await {
                            this.stats.revert_send_success(len);
                            #[cfg(feature = "tracing")]
                            tracing::warn!(error = %_e, "batched delivery failed");
                        }
                    }
                }
            }
        })
    }

    /// Called from the pool's message-handler callback with every inbound
    /// frame from any connection. Applies the backpressure policy when the
    /// inbound channel is full, and drops frames entirely once `stop()` has
    /// closed it.
    fn on_inbound_frame(&self, bytes: Vec<u8>) {
        if self.inbound_closed.load(Ordering::Acquire) {
            return;
        }

        if self.inbound_tx.try_send(bytes).is_err() {
            self.stats.record_dropped();
            match self.config.backpressure.drop_action {
                DropAction::Log => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("inbound channel full, dropping frame");
                }
                DropAction::SlowDown => {
                    self.stats.mark_backpressure();
                }
                DropAction::Reconnect => {
                    self.stats.mark_backpressure();
                    #[cfg(feature = "tracing")]
                    tracing::warn!("inbound channel full, reconnect requested by backpressure policy");
                }
                DropAction::Stop => {
                    self.stats.mark_backpressure();
                    self.cancel.cancel();
                }
            }
        } else {
            self.stats.clear_backpressure();
        }
    }

    /// Idempotent graceful shutdown: cancels the root token, closes the
    /// inbound channel exactly once, clears the handler/subscription
    /// registry, and stops the pool and performance subsystems. Bounded by
    /// `shutdown_timeout`.
    pub async fn stop(&self) -> crate::Result<()> {
        if self.stop_guard.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.cancel.cancel();
        self.inbound_closed.store(true, Ordering::Release);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        let _ = tokio::time::timeout(self.config.shutdown_timeout, async {
            for worker in workers {
                let _ = worker.await;
            }
        })
        .await;

        self.pool.stop().await;
        self.performance.stop();
        self.dispatcher.clear();

        Ok(())
    }

    /// Alias for [`Transport::stop`].
    pub async fn close(&self) -> crate::Result<()> {
        self.stop().await
    }

    /// Validates, serializes, size-checks, and submits `event` to the
    /// batcher. Submission is synchronous and non-blocking; actual delivery
    /// happens on the batch-processing loop, so a successful return here
    /// does not guarantee the frame reached the wire.
    pub fn send_event<E: Event>(&self, event: &E) -> crate::Result<()> {
        if self.config.enable_event_validation {
            event.validate()?;
        }

        let bytes = match self.performance.optimize_message(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.record_send_failure();
                return Err(e);
            }
        };

        // Size check precedes batching and is not itself a send failure: the
        // event never entered the pipeline, so `EventsFailed` is unchanged.
        if bytes.len() > self.config.performance.max_event_size {
            return Err(Error::capacity(format!(
                "serialized event is {} bytes, exceeds max_event_size of {}",
                bytes.len(),
                self.config.performance.max_event_size
            )));
        }

        let len = bytes.len() as u64;
        let start = Instant::now();
        self.performance.batch_message(bytes);
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.stats.record_send_success(len, latency_ms);
        Ok(())
    }

    pub fn add_event_handler(&self, event_type: &str, handler: HandlerFn) -> HandlerId {
        self.dispatcher.add_event_handler(event_type, handler)
    }

    pub fn remove_event_handler(&self, event_type: &str, id: HandlerId) -> crate::Result<()> {
        self.dispatcher.remove_event_handler(event_type, id)
    }

    pub fn subscribe(&self, event_types: &[&str], handler: HandlerFn) -> Subscription {
        self.dispatcher.subscribe(event_types, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> crate::Result<()> {
        self.dispatcher.unsubscribe(id)
    }

    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.stats.snapshot(
            self.dispatcher.active_subscriptions(),
            self.dispatcher.total_subscriptions_created(),
        )
    }

    /// Alias mirroring the other introspection getters; currently identical
    /// to [`Transport::stats`] since this core tracks no separate
    /// per-connection detail beyond [`Transport::connection_pool_stats`].
    #[must_use]
    pub fn detailed_status(&self) -> TransportStats {
        self.stats()
    }

    #[must_use]
    pub fn connection_pool_stats(&self) -> ConnectionPoolStats {
        self.pool.stats()
    }

    #[must_use]
    pub fn performance_metrics(&self) -> MetricsSnapshot {
        self.performance.metrics.snapshot()
    }

    #[must_use]
    pub fn memory_usage(&self) -> f64 {
        self.performance.memory.pressure()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.pool.is_connected()
    }

    #[must_use]
    pub fn active_connection_count(&self) -> usize {
        self.pool.active_connection_count()
    }

    #[must_use]
    pub fn healthy_connection_count(&self) -> usize {
        self.pool.healthy_connection_count()
    }

    pub fn optimize_for_throughput(&self) {
        self.performance.optimize_for_throughput();
    }

    pub fn optimize_for_latency(&self) {
        self.performance.optimize_for_latency();
    }

    pub fn optimize_for_memory(&self) {
        self.performance.optimize_for_memory();
    }

    /// Retunes batching continuously based on observed memory pressure:
    /// switches to the memory profile above 70% pressure and back to the
    /// throughput profile below 40%, leaving the current profile alone
    /// in between to avoid flapping.
    pub fn enable_adaptive_optimization(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = cancel.cancelled() => break,
                }
                let pressure = this.performance.memory.pressure();
                if pressure > 0.70 {
                    this.performance.optimize_for_memory();
                } else if pressure < 0.40 {
                    this.performance.optimize_for_throughput();
                }
            }
        });
        if let Ok(mut workers) = self.workers.try_lock() {
            workers.push(handle);
        } else {
            handle.abort();
        }
    }
}
