#![expect(
    clippy::module_name_repetitions,
    reason = "Pool types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::Error;
use crate::id::ConnectionId;

type MessageHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Bag of [`Connection`]s against one or more URLs, with round-robin,
/// health-aware routing and a background health sweep.
pub struct ConnectionPool {
    urls: Vec<String>,
    config: PoolConfig,
    heartbeat_config: crate::config::HeartbeatConfig,
    connections: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    round_robin: AtomicUsize,
    message_handler: RwLock<Option<MessageHandler>>,
    health_task: RwLock<Option<JoinHandle<()>>>,
}

/// Point-in-time snapshot of [`ConnectionPool`] sizing and health.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionPoolStats {
    pub total_connections: usize,
    pub active_connections: usize,
    pub healthy_connections: usize,
    pub min_connections: usize,
    pub max_connections: usize,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(
        urls: Vec<String>,
        config: PoolConfig,
        heartbeat_config: crate::config::HeartbeatConfig,
    ) -> Self {
        Self {
            urls,
            config,
            heartbeat_config,
            connections: Arc::new(DashMap::new()),
            round_robin: AtomicUsize::new(0),
            message_handler: RwLock::new(None),
            health_task: RwLock::new(None),
        }
    }

    /// Installs the callback invoked with every inbound frame from any
    /// connection in the pool. Must be called before [`ConnectionPool::start`].
    pub async fn set_message_handler(&self, handler: MessageHandler) {
        *self.message_handler.write().await = Some(handler);
    }

    /// Establishes `min_connections` against the configured URLs (round-robin
    /// by URL) and starts the health-check task.
    pub async fn start(&self) -> crate::Result<()> {
        if self.urls.is_empty() {
            return Err(Error::configuration("connection pool has no URLs configured"));
        }

        let handler = self
            .message_handler
            .read()
            .await
            .clone()
            .unwrap_or_else(|| Arc::new(|_bytes| {}));

        for _ in 0..self.config.min_connections {
            self.spawn_connection(Arc::clone(&handler));
        }

        let connections = Arc::clone(&self.connections);
        let interval_duration = self.config.health_check_interval;
        let idle_timeout = self.config.idle_timeout;
        let min_connections = self.config.min_connections;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            loop {
                ticker.tick().await;
                connections.retain(|_, conn| conn.state() != ConnectionState::Failed);

                if let Some(idle_timeout) = idle_timeout {
                    let idle_ids: Vec<ConnectionId> = connections
                        .iter()
                        .filter(|entry| entry.value().idle_duration() >= idle_timeout)
                        .map(|entry| *entry.key())
                        .collect();
                    for id in idle_ids {
                        if connections.len() <= min_connections {
                            break;
                        }
                        if let Some((_, conn)) = connections.remove(&id) {
                            conn.close().await;
                        }
                    }
                }
            }
        });
        *self.health_task.write().await = Some(handle);

        Ok(())
    }

    fn spawn_connection(&self, handler: MessageHandler) {
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed);
        let url = self.urls[index % self.urls.len()].clone();
        let connection = Connection::spawn(
            url,
            self.heartbeat_config.clone(),
            self.config.reconnect.clone(),
            self.config.dial_timeout,
            handler,
        );
        self.connections.insert(connection.id(), connection);
    }

    /// Picks a healthy, connected connection round-robin and queues `bytes`
    /// on it. Attempts to scale up to `max_connections` if none are
    /// available, then fails with [`crate::error::Kind::Temporary`].
    pub async fn send_message(&self, bytes: Vec<u8>) -> crate::Result<()> {
        if let Some(conn) = self.pick_connection() {
            return conn.send(bytes);
        }

        if self.connections.len() < self.config.max_connections {
            let handler = self
                .message_handler
                .read()
                .await
                .clone()
                .unwrap_or_else(|| Arc::new(|_bytes| {}));
            self.spawn_connection(handler);

            let wait_for_connection = async {
                loop {
                    if let Some(conn) = self.pick_connection() {
                        return conn;
                    }
                    sleep(Duration::from_millis(20)).await;
                }
            };
            if let Ok(conn) =
                tokio::time::timeout(self.config.connection_timeout, wait_for_connection).await
            {
                return conn.send(bytes);
            }
        }

        self.pick_connection()
            .ok_or_else(|| Error::temporary("no healthy connection available"))
            .and_then(|conn| conn.send(bytes))
    }

    fn pick_connection(&self) -> Option<Arc<Connection>> {
        let snapshot: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        if snapshot.is_empty() {
            return None;
        }

        let healthy: Vec<&Arc<Connection>> = snapshot.iter().filter(|c| c.is_healthy()).collect();
        let pool = if healthy.is_empty() {
            snapshot.iter().collect::<Vec<_>>()
        } else {
            healthy
        };
        if pool.is_empty() {
            return None;
        }

        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % pool.len();
        Some(Arc::clone(pool[index]))
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections currently in the `connected` state.
    #[must_use]
    pub fn active_connection_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().state().is_connected())
            .count()
    }

    /// Number of connections currently reporting healthy heartbeats.
    #[must_use]
    pub fn healthy_connection_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_healthy())
            .count()
    }

    /// True if at least one connection is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.active_connection_count() > 0
    }

    #[must_use]
    pub fn stats(&self) -> ConnectionPoolStats {
        ConnectionPoolStats {
            total_connections: self.connection_count(),
            active_connections: self.active_connection_count(),
            healthy_connections: self.healthy_connection_count(),
            min_connections: self.config.min_connections,
            max_connections: self.config.max_connections,
        }
    }

    /// Closes every connection and stops the health-check task.
    pub async fn stop(&self) {
        if let Some(handle) = self.health_task.write().await.take() {
            handle.abort();
        }
        for entry in self.connections.iter() {
            entry.value().close().await;
        }
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_without_urls_is_a_configuration_error() {
        let pool = ConnectionPool::new(
            Vec::new(),
            PoolConfig::default(),
            crate::config::HeartbeatConfig::default(),
        );
        let err = tokio_test_block_on_start_error(&pool);
        assert_eq!(err.kind(), crate::error::Kind::Configuration);
    }

    fn tokio_test_block_on_start_error(pool: &ConnectionPool) -> Error {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(pool.start()).unwrap_err()
    }

    #[test]
    fn new_pool_has_no_connections() {
        let pool = ConnectionPool::new(
            vec!["wss://example.test/ws".to_owned()],
            PoolConfig::default(),
            crate::config::HeartbeatConfig::default(),
        );
        assert_eq!(pool.connection_count(), 0);
    }

    #[test]
    fn empty_pool_reports_no_healthy_or_active_connections() {
        let pool = ConnectionPool::new(
            vec!["wss://example.test/ws".to_owned()],
            PoolConfig::default(),
            crate::config::HeartbeatConfig::default(),
        );
        assert!(!pool.is_connected());
        assert_eq!(pool.healthy_connection_count(), 0);
        assert_eq!(pool.active_connection_count(), 0);
    }
}
