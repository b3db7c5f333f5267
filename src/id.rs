//! Identifier newtypes used throughout the transport.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// A monotonically increasing handle returned by `Transport::subscribe`.
///
/// This is the one piece of process-wide state in the crate: the counter
/// backing it is shared by every `Transport` instance in the process, so ids
/// are unique across transports but not meaningfully comparable across
/// process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Identifies a registered event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one physical connection inside a [`crate::pool::ConnectionPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_ids_are_monotonic() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert!(b.get() > a.get());
    }

    #[test]
    fn handler_ids_are_unique() {
        assert_ne!(HandlerId::new(), HandlerId::new());
    }
}
