//! Allocation governor: tracks usage against a cap and retunes its own
//! monitoring interval based on observed pressure.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

fn interval_for_pressure(pressure: f64) -> Duration {
    if pressure < 0.40 {
        Duration::from_secs(60)
    } else if pressure < 0.70 {
        Duration::from_secs(15)
    } else if pressure < 0.90 {
        Duration::from_secs(2)
    } else {
        Duration::from_millis(500)
    }
}

/// Tracks allocation/deallocation against `cap_bytes` and exposes the
/// resulting pressure fraction. The periodic task's own sleep duration is
/// recomputed every iteration from the latest pressure reading.
pub struct MemoryManager {
    cap_bytes: usize,
    used_bytes: AtomicUsize,
    recheck: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryManager {
    #[must_use]
    pub fn new(cap_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            cap_bytes,
            used_bytes: AtomicUsize::new(0),
            recheck: Notify::new(),
            task: Mutex::new(None),
        })
    }

    pub fn record_allocation(&self, bytes: usize) {
        self.used_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_deallocation(&self, bytes: usize) {
        self.used_bytes.fetch_sub(bytes.min(self.used_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
    }

    #[must_use]
    pub fn pressure(&self) -> f64 {
        if self.cap_bytes == 0 {
            return 0.0;
        }
        self.used_bytes.load(Ordering::Relaxed) as f64 / self.cap_bytes as f64
    }

    /// Wakes the periodic task for an immediate re-evaluation instead of
    /// waiting out its current sleep.
    pub fn trigger_check(&self) {
        self.recheck.notify_one();
    }

    /// Starts the self-retuning monitoring loop.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let duration = interval_for_pressure(this.pressure());
                tokio::select! {
                    () = sleep(duration) => {}
                    () = this.recheck.notified() => {}
                }
            }
        });
        *self.task.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_is_used_over_cap() {
        let mgr = MemoryManager::new(100);
        mgr.record_allocation(40);
        assert!((mgr.pressure() - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn deallocation_never_underflows() {
        let mgr = MemoryManager::new(100);
        mgr.record_allocation(10);
        mgr.record_deallocation(1000);
        assert_eq!(mgr.pressure(), 0.0);
    }

    #[test]
    fn interval_tightens_with_pressure() {
        assert_eq!(interval_for_pressure(0.1), Duration::from_secs(60));
        assert_eq!(interval_for_pressure(0.5), Duration::from_secs(15));
        assert_eq!(interval_for_pressure(0.8), Duration::from_secs(2));
        assert_eq!(interval_for_pressure(0.95), Duration::from_millis(500));
    }
}
