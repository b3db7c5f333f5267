//! Outbound message batching: groups individually-submitted frames into
//! FIFO batches emitted on a size-or-time trigger.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Pending {
    messages: Vec<Vec<u8>>,
    bytes: usize,
    oldest_at: Option<Instant>,
}

impl Pending {
    const fn new() -> Self {
        Self {
            messages: Vec::new(),
            bytes: 0,
            oldest_at: None,
        }
    }
}

/// Batches outbound messages by size or elapsed time, whichever comes first.
///
/// Emission is checked twice: immediately after every push (the size
/// trigger) and from a caller-driven or background tick (the time trigger).
/// Ready batches are served strictly FIFO via [`MessageBatcher::get_batch`].
pub struct MessageBatcher {
    target_size: AtomicUsize,
    flush_interval_ms: AtomicU64,
    pending: Mutex<Pending>,
    ready: Mutex<VecDeque<Vec<Vec<u8>>>>,
}

impl MessageBatcher {
    #[must_use]
    pub fn new(target_size: usize, flush_interval: Duration) -> Self {
        Self {
            target_size: AtomicUsize::new(target_size.max(1)),
            flush_interval_ms: AtomicU64::new(
                u64::try_from(flush_interval.as_millis()).unwrap_or(u64::MAX),
            ),
            pending: Mutex::new(Pending::new()),
            ready: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueues `bytes`, emitting a batch immediately if `target_size` is reached.
    pub fn add_message(&self, bytes: Vec<u8>) {
        let mut pending = self.pending.lock();
        if pending.oldest_at.is_none() {
            pending.oldest_at = Some(Instant::now());
        }
        pending.bytes += bytes.len();
        pending.messages.push(bytes);

        if pending.messages.len() >= self.target_size.load(Ordering::Relaxed) {
            let batch = std::mem::take(&mut pending.messages);
            pending.bytes = 0;
            pending.oldest_at = None;
            drop(pending);
            self.ready.lock().push_back(batch);
        }
    }

    /// Called periodically (e.g. by a background tick); emits a batch if
    /// `flush_interval` has elapsed since the oldest pending message.
    pub fn poll_flush(&self) {
        let mut pending = self.pending.lock();
        let Some(oldest) = pending.oldest_at else {
            return;
        };
        if oldest.elapsed() < self.flush_interval() || pending.messages.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut pending.messages);
        pending.bytes = 0;
        pending.oldest_at = None;
        drop(pending);
        self.ready.lock().push_back(batch);
    }

    /// Pops the oldest ready batch, if any.
    pub fn get_batch(&self) -> Option<Vec<Vec<u8>>> {
        self.ready.lock().pop_front()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().messages.len()
    }

    #[must_use]
    pub fn target_size(&self) -> usize {
        self.target_size.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.load(Ordering::Relaxed))
    }

    /// Retunes the batching thresholds at runtime, used by the transport's
    /// optimization profiles. Takes effect for messages added after the call.
    pub fn reconfigure(&self, target_size: usize, flush_interval: Duration) {
        self.target_size.store(target_size.max(1), Ordering::Relaxed);
        self.flush_interval_ms.store(
            u64::try_from(flush_interval.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }
}
