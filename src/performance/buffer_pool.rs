//! Reusable byte buffers, avoiding a fresh allocation per outbound message.

use parking_lot::Mutex;

/// A bounded free-list of `Vec<u8>` scratch buffers.
pub struct BufferPool {
    capacity: usize,
    buffer_size_hint: usize,
    free: Mutex<Vec<Vec<u8>>>,
    gets: std::sync::atomic::AtomicU64,
    puts: std::sync::atomic::AtomicU64,
    hits: std::sync::atomic::AtomicU64,
}

impl BufferPool {
    #[must_use]
    pub fn new(capacity: usize, buffer_size_hint: usize) -> Self {
        Self {
            capacity,
            buffer_size_hint,
            free: Mutex::new(Vec::with_capacity(capacity)),
            gets: std::sync::atomic::AtomicU64::new(0),
            puts: std::sync::atomic::AtomicU64::new(0),
            hits: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Returns a zero-length buffer with at least `self.buffer_size_hint`
    /// capacity, reused from the pool when available.
    pub fn get(&self) -> Vec<u8> {
        self.gets.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Some(mut buf) = self.free.lock().pop() {
            self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            buf.clear();
            buf
        } else {
            Vec::with_capacity(self.buffer_size_hint)
        }
    }

    /// Returns `buf` to the pool if there's room, otherwise drops it.
    pub fn put(&self, mut buf: Vec<u8>) {
        self.puts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        buf.clear();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            gets: self.gets.load(std::sync::atomic::Ordering::Relaxed),
            puts: self.puts.load(std::sync::atomic::Ordering::Relaxed),
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            free_count: self.free.lock().len(),
        }
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct BufferPoolStats {
    pub gets: u64,
    pub puts: u64,
    pub hits: u64,
    pub free_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_reuses_buffer() {
        let pool = BufferPool::new(4, 64);
        let buf = pool.get();
        pool.put(buf);
        let stats_before = pool.stats();
        let _reused = pool.get();
        let stats_after = pool.stats();
        assert_eq!(stats_after.hits, stats_before.hits + 1);
    }

    #[test]
    fn put_beyond_capacity_is_discarded() {
        let pool = BufferPool::new(1, 8);
        pool.put(vec![1, 2, 3]);
        pool.put(vec![4, 5, 6]);
        assert_eq!(pool.stats().free_count, 1);
    }
}
