//! Application-level liveness protocol layered on top of a WebSocket's own
//! ping/pong frames, bound to a single [`crate::connection::Connection`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::HeartbeatConfig;

const NEVER: i64 = -1;

/// Gated lifecycle state of a [`Heartbeat`]'s periodic task.
///
/// Only `stopped -> starting -> running -> stopping -> stopped` transitions
/// are legal; [`Heartbeat::set_state`] rejects anything else and leaves the
/// current state untouched.
#[repr(u32)]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl HeartbeatState {
    const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }

    const fn to_code(self) -> u32 {
        self as u32
    }

    /// The single state this one is allowed to advance to, or `None` if it's terminal.
    const fn next(self) -> Option<Self> {
        match self {
            Self::Stopped => Some(Self::Starting),
            Self::Starting => Some(Self::Running),
            Self::Running => Some(Self::Stopping),
            Self::Stopping => Some(Self::Stopped),
        }
    }
}

/// Monotonic millisecond clock anchored at an arbitrary point (process
/// start), used for atomic subtraction rather than `Instant`, which isn't
/// `Copy`-into-an-atomic.
fn monotonic_now_ms() -> i64 {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    i64::try_from(epoch.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Callbacks a [`Heartbeat`] uses to talk back to its owning connection
/// without holding a reference to it.
pub struct HeartbeatCallbacks {
    /// Invoked once per `ping_period` tick to request an outbound ping frame.
    pub on_ping_requested: Arc<dyn Fn() + Send + Sync>,
    /// Invoked on a healthy/unhealthy transition (edge-triggered, not every tick).
    pub on_health_change: Arc<dyn Fn(bool) + Send + Sync>,
    /// Invoked once the missed-pong threshold is exceeded.
    pub on_close_requested: Arc<dyn Fn() + Send + Sync>,
}

/// Point-in-time snapshot of a [`Heartbeat`]'s counters.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatStats {
    pub pings_sent: u64,
    pub pongs_received: u64,
    /// Cumulative, monotonically non-decreasing missed-pong count.
    pub missed_pongs: u64,
    pub health_checks: u64,
    pub unhealthy_periods: u64,
    /// `None` until at least one round-trip has completed.
    pub min_rtt_ms: Option<i64>,
    pub max_rtt_ms: Option<i64>,
    pub average_rtt_ms: Option<f64>,
    /// Milliseconds on the heartbeat's monotonic clock, or `None` if never sent/received.
    pub last_ping_at_ms: Option<i64>,
    pub last_pong_at_ms: Option<i64>,
}

/// Serializable health summary with the exact snake_case keys external
/// callers (and the scenario tests) depend on.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedHealthStatus {
    pub is_healthy: bool,
    pub health_score: f64,
    pub state: &'static str,
    pub last_ping_at: Option<i64>,
    pub last_pong_at: Option<i64>,
    pub time_since_last_pong: Option<i64>,
    pub missed_pongs: u32,
    pub ping_period: u64,
    pub pong_wait: u64,
    pub total_pings_sent: u64,
    pub total_pongs_received: u64,
    pub total_missed_pongs: u64,
    pub health_checks: u64,
    pub unhealthy_periods: u64,
    pub average_rtt: Option<f64>,
    pub min_rtt: Option<i64>,
    pub max_rtt: Option<i64>,
}

/// Monitors liveness of one connection via periodic pings and pong tracking.
///
/// `Heartbeat` owns no I/O itself: [`HeartbeatCallbacks`] are how it asks its
/// owner to actually send a ping frame or close the connection, which keeps
/// this type synchronously testable (`on_pong`, `check_health`, `stats` are
/// all plain method calls, no WebSocket required).
pub struct Heartbeat {
    config: HeartbeatConfig,
    callbacks: HeartbeatCallbacks,
    state: AtomicU32,
    healthy: AtomicBool,
    last_ping_at_ms: AtomicI64,
    last_pong_at_ms: AtomicI64,
    missed_pong_count: AtomicU32,
    pings_sent: AtomicU64,
    pongs_received: AtomicU64,
    missed_pongs: AtomicU64,
    health_checks: AtomicU64,
    unhealthy_periods: AtomicU64,
    min_rtt_ms: AtomicI64,
    max_rtt_ms: AtomicI64,
    total_rtt_ms: AtomicU64,
    rtt_samples: AtomicU64,
    reset_tx: mpsc::Sender<()>,
    reset_rx: AsyncMutex<Option<mpsc::Receiver<()>>>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    #[must_use]
    pub fn new(config: HeartbeatConfig, callbacks: HeartbeatCallbacks) -> Arc<Self> {
        let (reset_tx, reset_rx) = mpsc::channel(1);
        Arc::new(Self {
            config,
            callbacks,
            state: AtomicU32::new(HeartbeatState::Stopped.to_code()),
            healthy: AtomicBool::new(true),
            last_ping_at_ms: AtomicI64::new(NEVER),
            last_pong_at_ms: AtomicI64::new(NEVER),
            missed_pong_count: AtomicU32::new(0),
            pings_sent: AtomicU64::new(0),
            pongs_received: AtomicU64::new(0),
            missed_pongs: AtomicU64::new(0),
            health_checks: AtomicU64::new(0),
            unhealthy_periods: AtomicU64::new(0),
            min_rtt_ms: AtomicI64::new(NEVER),
            max_rtt_ms: AtomicI64::new(NEVER),
            total_rtt_ms: AtomicU64::new(0),
            rtt_samples: AtomicU64::new(0),
            reset_tx,
            reset_rx: AsyncMutex::new(Some(reset_rx)),
            task: AsyncMutex::new(None),
        })
    }

    #[must_use]
    pub fn state(&self) -> HeartbeatState {
        HeartbeatState::from_code(self.state.load(Ordering::Acquire))
    }

    /// Attempts the single legal transition out of `from`. Returns `false`
    /// (and leaves the state untouched) for any other `(from, to)` pair,
    /// including `stopped -> running` directly.
    pub fn set_state(&self, from: HeartbeatState, to: HeartbeatState) -> bool {
        if from.next() != Some(to) {
            return false;
        }
        self.state
            .compare_exchange(from.to_code(), to.to_code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Starts the periodic ping/health-check task, driving the state machine
    /// `stopped -> starting -> running`. No-op if not currently `stopped`.
    pub async fn start(self: &Arc<Self>) {
        if !self.set_state(HeartbeatState::Stopped, HeartbeatState::Starting) {
            return;
        }

        let Some(mut reset_rx) = self.reset_rx.lock().await.take() else {
            return;
        };

        if !self.set_state(HeartbeatState::Starting, HeartbeatState::Running) {
            *self.reset_rx.lock().await = Some(reset_rx);
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(this.config.ping_period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(()) = reset_rx.recv() => {
                        ticker.reset();
                        continue;
                    }
                }
                if this.state() != HeartbeatState::Running {
                    break;
                }
                this.send_ping();
                this.check_health();
            }
        });

        *self.task.lock().await = Some(handle);
    }

    /// Stops the periodic task, driving `running -> stopping -> stopped`.
    /// Idempotent: calling this on an already-stopped heartbeat is a no-op.
    pub async fn stop(&self) {
        if !self.set_state(HeartbeatState::Running, HeartbeatState::Stopping) {
            return;
        }
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        self.set_state(HeartbeatState::Stopping, HeartbeatState::Stopped);
    }

    /// Signals the ping timer to restart immediately. Never blocks, never fails.
    pub fn reset(&self) {
        let _ = self.reset_tx.try_send(());
    }

    fn send_ping(&self) {
        self.last_ping_at_ms.store(monotonic_now_ms(), Ordering::Release);
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        (self.callbacks.on_ping_requested)();
    }

    /// Records a pong, updating RTT accumulators and clearing the missed-pong streak.
    pub fn on_pong(&self) {
        let now = monotonic_now_ms();
        let last_ping = self.last_ping_at_ms.load(Ordering::Acquire);
        self.last_pong_at_ms.store(now, Ordering::Release);
        self.missed_pong_count.store(0, Ordering::Relaxed);
        self.pongs_received.fetch_add(1, Ordering::Relaxed);

        if last_ping != NEVER {
            let rtt = (now - last_ping).max(0);
            self.record_rtt(rtt);
        }

        if !self.healthy.swap(true, Ordering::AcqRel) {
            (self.callbacks.on_health_change)(true);
        }
    }

    fn record_rtt(&self, rtt_ms: i64) {
        self.min_rtt_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(if cur == NEVER { rtt_ms } else { cur.min(rtt_ms) })
            })
            .ok();
        self.max_rtt_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(if cur == NEVER { rtt_ms } else { cur.max(rtt_ms) })
            })
            .ok();
        self.total_rtt_ms
            .fetch_add(u64::try_from(rtt_ms).unwrap_or(0), Ordering::Relaxed);
        self.rtt_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Runs one health-check pass. Normally driven by the periodic task, but
    /// exposed so callers and tests can assess health synchronously.
    pub fn check_health(&self) {
        self.health_checks.fetch_add(1, Ordering::Relaxed);

        let last_pong = self.last_pong_at_ms.load(Ordering::Acquire);
        if last_pong == NEVER {
            // Initial grace period: no evidence of failure yet.
            return;
        }

        let pong_wait_ms = self.pong_wait_ms();
        if monotonic_now_ms() - last_pong <= pong_wait_ms {
            return;
        }

        self.missed_pongs.fetch_add(1, Ordering::Relaxed);
        let missed = self.missed_pong_count.fetch_add(1, Ordering::AcqRel) + 1;

        if self.healthy.swap(false, Ordering::AcqRel) {
            self.unhealthy_periods.fetch_add(1, Ordering::Relaxed);
            (self.callbacks.on_health_change)(false);
        }

        if missed >= self.config.missed_pong_threshold {
            (self.callbacks.on_close_requested)();
        }
    }

    fn pong_wait_ms(&self) -> i64 {
        self.config.pong_wait.as_millis().min(u128::from(u32::MAX)) as i64
    }

    /// True iff a pong has been seen within `pong_wait`, or none was ever
    /// expected yet, and the state is `stopped` or `running`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if !matches!(self.state(), HeartbeatState::Stopped | HeartbeatState::Running) {
            return false;
        }
        let last_pong = self.last_pong_at_ms.load(Ordering::Acquire);
        if last_pong == NEVER {
            return true;
        }
        monotonic_now_ms() - last_pong <= self.pong_wait_ms()
    }

    /// Health score in `[0.0, 1.0]`, decaying linearly from 1.0 at the last
    /// pong to 0.0 at `pong_wait` after it.
    #[must_use]
    pub fn connection_health(&self) -> f64 {
        let last_pong = self.last_pong_at_ms.load(Ordering::Acquire);
        if last_pong == NEVER {
            return 1.0;
        }
        let pong_wait_ms = self.config.pong_wait.as_millis().max(1) as f64;
        let elapsed = (monotonic_now_ms() - last_pong).max(0) as f64;
        (1.0 - elapsed / pong_wait_ms).clamp(0.0, 1.0)
    }

    #[must_use]
    pub fn stats(&self) -> HeartbeatStats {
        let samples = self.rtt_samples.load(Ordering::Relaxed);
        let min_rtt = self.min_rtt_ms.load(Ordering::Relaxed);
        let max_rtt = self.max_rtt_ms.load(Ordering::Relaxed);
        let last_ping = self.last_ping_at_ms.load(Ordering::Relaxed);
        let last_pong = self.last_pong_at_ms.load(Ordering::Relaxed);

        HeartbeatStats {
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
            missed_pongs: self.missed_pongs.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            unhealthy_periods: self.unhealthy_periods.load(Ordering::Relaxed),
            min_rtt_ms: (min_rtt != NEVER).then_some(min_rtt),
            max_rtt_ms: (max_rtt != NEVER).then_some(max_rtt),
            average_rtt_ms: (samples > 0)
                .then(|| self.total_rtt_ms.load(Ordering::Relaxed) as f64 / samples as f64),
            last_ping_at_ms: (last_ping != NEVER).then_some(last_ping),
            last_pong_at_ms: (last_pong != NEVER).then_some(last_pong),
        }
    }

    #[must_use]
    pub fn detailed_health_status(&self) -> DetailedHealthStatus {
        let stats = self.stats();
        let last_pong = self.last_pong_at_ms.load(Ordering::Relaxed);
        let time_since_last_pong =
            (last_pong != NEVER).then(|| (monotonic_now_ms() - last_pong).max(0));
        DetailedHealthStatus {
            is_healthy: self.is_healthy(),
            health_score: self.connection_health(),
            state: match self.state() {
                HeartbeatState::Stopped => "stopped",
                HeartbeatState::Starting => "starting",
                HeartbeatState::Running => "running",
                HeartbeatState::Stopping => "stopping",
            },
            last_ping_at: stats.last_ping_at_ms,
            last_pong_at: stats.last_pong_at_ms,
            time_since_last_pong,
            missed_pongs: self.missed_pong_count.load(Ordering::Relaxed),
            ping_period: u64::try_from(self.config.ping_period.as_millis()).unwrap_or(u64::MAX),
            pong_wait: u64::try_from(self.config.pong_wait.as_millis()).unwrap_or(u64::MAX),
            total_pings_sent: stats.pings_sent,
            total_pongs_received: stats.pongs_received,
            total_missed_pongs: stats.missed_pongs,
            health_checks: stats.health_checks,
            unhealthy_periods: stats.unhealthy_periods,
            average_rtt: stats.average_rtt_ms,
            min_rtt: stats.min_rtt_ms,
            max_rtt: stats.max_rtt_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    fn callbacks() -> (HeartbeatCallbacks, Arc<Mutex<Vec<bool>>>, Arc<Mutex<u32>>) {
        let health_changes = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(Mutex::new(0_u32));
        let hc = Arc::clone(&health_changes);
        let cl = Arc::clone(&closes);
        (
            HeartbeatCallbacks {
                on_ping_requested: Arc::new(|| {}),
                on_health_change: Arc::new(move |healthy| hc.lock().unwrap().push(healthy)),
                on_close_requested: Arc::new(move || *cl.lock().unwrap() += 1),
            },
            health_changes,
            closes,
        )
    }

    #[test]
    fn initial_state_reports_healthy() {
        let (cb, _, _) = callbacks();
        let hb = Heartbeat::new(HeartbeatConfig::default(), cb);
        assert!(hb.is_healthy());
        assert_eq!(hb.connection_health(), 1.0);
        assert_eq!(hb.state(), HeartbeatState::Stopped);
    }

    #[test]
    fn state_transitions_follow_the_gated_sequence() {
        let (cb, _, _) = callbacks();
        let hb = Heartbeat::new(HeartbeatConfig::default(), cb);

        assert!(hb.set_state(HeartbeatState::Stopped, HeartbeatState::Starting));
        assert_eq!(hb.state(), HeartbeatState::Starting);

        assert!(hb.set_state(HeartbeatState::Starting, HeartbeatState::Running));
        assert_eq!(hb.state(), HeartbeatState::Running);

        assert!(hb.set_state(HeartbeatState::Running, HeartbeatState::Stopping));
        assert_eq!(hb.state(), HeartbeatState::Stopping);

        assert!(hb.set_state(HeartbeatState::Stopping, HeartbeatState::Stopped));
        assert_eq!(hb.state(), HeartbeatState::Stopped);

        assert!(!hb.set_state(HeartbeatState::Stopped, HeartbeatState::Running));
        assert_eq!(hb.state(), HeartbeatState::Stopped);
    }

    #[test]
    fn on_pong_resets_missed_count_and_reports_healthy() {
        let (cb, _, _) = callbacks();
        let config = HeartbeatConfig {
            pong_wait: Duration::from_millis(50),
            ..HeartbeatConfig::default()
        };
        let hb = Heartbeat::new(config, cb);
        hb.on_pong();
        assert!(hb.is_healthy());
        let stats = hb.stats();
        assert_eq!(stats.pongs_received, 1);
        assert_eq!(stats.missed_pongs, 0);
    }

    #[test]
    fn check_health_detects_missed_pong_and_requests_close() {
        let (cb, health_changes, closes) = callbacks();
        let config = HeartbeatConfig {
            pong_wait: Duration::from_millis(0),
            missed_pong_threshold: 2,
            ..HeartbeatConfig::default()
        };
        let hb = Heartbeat::new(config, cb);
        hb.on_pong();
        std::thread::sleep(Duration::from_millis(5));

        hb.check_health();
        assert!(!hb.is_healthy());
        hb.check_health();

        let stats = hb.stats();
        assert_eq!(stats.missed_pongs, 2);
        assert_eq!(*closes.lock().unwrap(), 1);
        assert_eq!(health_changes.lock().unwrap().as_slice(), [false]);
    }

    #[test]
    fn missed_pongs_is_cumulative_not_reset_by_health_checks() {
        let (cb, _, _) = callbacks();
        let config = HeartbeatConfig {
            pong_wait: Duration::from_millis(0),
            missed_pong_threshold: 100,
            ..HeartbeatConfig::default()
        };
        let hb = Heartbeat::new(config, cb);
        std::thread::sleep(Duration::from_millis(2));
        for _ in 0..5 {
            hb.on_pong();
            std::thread::sleep(Duration::from_millis(2));
            hb.check_health();
        }
        assert_eq!(hb.stats().missed_pongs, 5);
    }

    #[test]
    fn detailed_health_status_keys_are_populated() {
        let (cb, _, _) = callbacks();
        let hb = Heartbeat::new(HeartbeatConfig::default(), cb);
        hb.on_pong();
        let status = hb.detailed_health_status();
        assert!(status.is_healthy);
        assert!(status.last_pong_at.is_some());
        assert_eq!(status.state, "stopped");

        let value = serde_json::to_value(&status).unwrap();
        let expected_keys = [
            "is_healthy",
            "health_score",
            "state",
            "last_ping_at",
            "last_pong_at",
            "time_since_last_pong",
            "missed_pongs",
            "ping_period",
            "pong_wait",
            "total_pings_sent",
            "total_pongs_received",
            "total_missed_pongs",
            "health_checks",
            "unhealthy_periods",
            "average_rtt",
            "min_rtt",
            "max_rtt",
        ];
        let map = value.as_object().unwrap();
        assert_eq!(map.len(), expected_keys.len());
        for key in expected_keys {
            assert!(map.contains_key(key), "missing key {key}");
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (cb, _, _) = callbacks();
        let hb = Heartbeat::new(HeartbeatConfig::default(), cb);
        hb.stop().await;
        hb.stop().await;
        hb.start().await;
        hb.stop().await;
        hb.stop().await;
    }

    #[tokio::test]
    async fn reset_never_blocks_and_restarts_the_ticker() {
        let (cb, _, _) = callbacks();
        let hb = Heartbeat::new(HeartbeatConfig::default(), cb);
        hb.reset();
        hb.reset();
        hb.reset();
        hb.start().await;
        hb.reset();
        hb.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pongs_and_resets_do_not_race() {
        let (cb, _, _) = callbacks();
        let hb = Heartbeat::new(HeartbeatConfig::default(), cb);
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let hb = Arc::clone(&hb);
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    hb.on_pong();
                    hb.reset();
                    let _ = hb.is_healthy();
                    let _ = hb.connection_health();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(hb.stats().pongs_received, 1000);
    }
}
