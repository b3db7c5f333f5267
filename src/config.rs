#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};

const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(15);
const DEFAULT_MISSED_PONG_THRESHOLD: u32 = 3;

const DEFAULT_MIN_CONNECTIONS: usize = 1;
const DEFAULT_MAX_CONNECTIONS: usize = 4;
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

const DEFAULT_BATCH_TARGET_SIZE: usize = 32;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5);
const DEFAULT_MAX_EVENT_SIZE: usize = 1024 * 1024;
const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECTION_SLOTS: usize = 64;

const DEFAULT_EVENT_CHANNEL_BUFFER: usize = 1024;
const DEFAULT_MAX_DROPPED_EVENTS: u64 = 10_000;
const DEFAULT_BACKPRESSURE_THRESHOLD_PERCENT: f64 = 0.8;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ENABLE_EVENT_VALIDATION: bool = true;

/// Top-level configuration for a [`crate::transport::Transport`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// URLs tried, round-robin, when the pool creates new connections.
    pub urls: Vec<String>,
    pub heartbeat: HeartbeatConfig,
    pub pool: PoolConfig,
    pub performance: PerformanceConfig,
    pub backpressure: BackpressureConfig,
    /// Time allotted to a single handler invocation before it's abandoned.
    pub event_timeout: Duration,
    /// Time given to in-flight worker tasks to finish during `Transport::stop`.
    pub shutdown_timeout: Duration,
    /// Whether `Transport::send_event` calls `Event::validate` before
    /// serializing. Default: `true`.
    pub enable_event_validation: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            heartbeat: HeartbeatConfig::default(),
            pool: PoolConfig::default(),
            performance: PerformanceConfig::default(),
            backpressure: BackpressureConfig::default(),
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            enable_event_validation: DEFAULT_ENABLE_EVENT_VALIDATION,
        }
    }
}

impl TransportConfig {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.urls.is_empty() {
            return Err(crate::error::Error::configuration(
                "TransportConfig.urls must contain at least one endpoint",
            ));
        }
        if self.pool.min_connections == 0 {
            return Err(crate::error::Error::configuration(
                "PoolConfig.min_connections must be at least 1",
            ));
        }
        if self.pool.max_connections < self.pool.min_connections {
            return Err(crate::error::Error::configuration(
                "PoolConfig.max_connections must be >= min_connections",
            ));
        }
        if self.performance.max_event_size == 0 {
            return Err(crate::error::Error::configuration(
                "PerformanceConfig.max_event_size must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Liveness protocol tuning for every [`crate::connection::Connection`] in the pool.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between outbound pings. Default: 5s.
    pub ping_period: Duration,
    /// Longest gap since the last pong before a connection is unhealthy. Default: 15s.
    pub pong_wait: Duration,
    /// Consecutive missed pongs before a close is requested. Default: 3.
    pub missed_pong_threshold: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_period: DEFAULT_PING_PERIOD,
            pong_wait: DEFAULT_PONG_WAIT,
            missed_pong_threshold: DEFAULT_MISSED_PONG_THRESHOLD,
        }
    }
}

/// Sizing and health-check tuning for a [`crate::pool::ConnectionPool`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections established eagerly on `Transport::start`. Default: 1.
    pub min_connections: usize,
    /// Ceiling the pool may scale up to under load. Default: 4.
    pub max_connections: usize,
    /// Deadline for a single WebSocket handshake attempt; a connection that
    /// doesn't complete the handshake within this window fails and falls
    /// back to the reconnect policy. Default: 10s.
    pub dial_timeout: Duration,
    /// Bound on how long `ConnectionPool::send_message` waits for a
    /// scaled-up connection to become available before giving up with a
    /// temporary error. Default: 10s.
    pub connection_timeout: Duration,
    /// Interval between pool health sweeps. Default: 10s.
    pub health_check_interval: Duration,
    /// If set, a connection with no activity for this long is closed and
    /// evicted once the pool has more than `min_connections` connections.
    /// Default: disabled (`None`).
    pub idle_timeout: Option<Duration>,
    pub reconnect: ReconnectConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            idle_timeout: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Exponential backoff parameters for reconnection attempts.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Initial backoff duration for the first reconnection attempt.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff after each attempt.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_max_elapsed_time(None) // max attempts are tracked separately
            .build()
    }
}

/// Tuning for the [`crate::performance`] subsystem: batching, serialization,
/// admission control.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    /// Batch emits once pending bytes reach this size. Default: 32.
    pub batch_target_size: usize,
    /// Batch emits once this long has elapsed since the oldest pending message. Default: 5ms.
    pub flush_interval: Duration,
    /// Events larger than this are rejected with `Kind::Capacity`. Default: 1 MiB.
    pub max_event_size: usize,
    /// Concurrent outbound sends permitted at once. Default: 64.
    pub connection_slots: usize,
    pub serializer: SerializerType,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_target_size: DEFAULT_BATCH_TARGET_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
            connection_slots: DEFAULT_CONNECTION_SLOTS,
            serializer: SerializerType::default(),
        }
    }
}

/// Which `SerializerFactory` implementation to hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializerType {
    /// Plain `serde_json::to_vec`.
    #[default]
    Standard,
    /// Reuses scratch buffers from the `BufferPool`.
    Optimized,
}

/// Inbound-channel sizing and the policy applied when it's full.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Capacity of the inbound event channel. Default: 1024.
    pub event_channel_buffer: usize,
    /// Dropped-event count past which metrics flag sustained backpressure. Default: 10,000.
    pub max_dropped_events: u64,
    /// Fraction of `event_channel_buffer` in use that counts as "backpressure active". Default: 0.8.
    pub backpressure_threshold_percent: f64,
    pub drop_action: DropAction,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            event_channel_buffer: DEFAULT_EVENT_CHANNEL_BUFFER,
            max_dropped_events: DEFAULT_MAX_DROPPED_EVENTS,
            backpressure_threshold_percent: DEFAULT_BACKPRESSURE_THRESHOLD_PERCENT,
            drop_action: DropAction::default(),
        }
    }
}

/// Action taken when the inbound channel is full and a new frame must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropAction {
    /// Log the drop and count it; no other effect.
    Log,
    /// Mark `backpressure_active` and count it. No throttling is implemented for
    /// this variant; it is observable only through stats.
    #[default]
    SlowDown,
    /// Request the owning pool reconnect the connection that produced the frame.
    Reconnect,
    /// Stop the transport entirely.
    Stop,
}
