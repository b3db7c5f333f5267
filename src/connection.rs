#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::config::{HeartbeatConfig, ReconnectConfig};
use crate::error::{Error, Kind};
use crate::heartbeat::{Heartbeat, HeartbeatCallbacks, HeartbeatStats};
use crate::id::ConnectionId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the queue feeding the connection's write half.
const SEND_QUEUE_CAPACITY: usize = 256;

const DISCONNECTED: u32 = 0;
const CONNECTING: u32 = 1;
const CONNECTED: u32 = 2;
const CLOSING: u32 = 3;
const CLOSED: u32 = 4;
const FAILED: u32 = 5;

/// Lifecycle state of a single [`Connection`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    fn from_code(code: u32) -> Self {
        match code {
            CONNECTING => Self::Connecting,
            CONNECTED => Self::Connected,
            CLOSING => Self::Closing,
            CLOSED => Self::Closed,
            FAILED => Self::Failed,
            _ => Self::Disconnected,
        }
    }

    const fn to_code(self) -> u32 {
        match self {
            Self::Disconnected => DISCONNECTED,
            Self::Connecting => CONNECTING,
            Self::Connected => CONNECTED,
            Self::Closing => CLOSING,
            Self::Closed => CLOSED,
            Self::Failed => FAILED,
        }
    }
}

/// A single long-lived WebSocket connection: read/write worker tasks, a
/// bound [`Heartbeat`], and backoff-driven auto-reconnect.
///
/// A newly constructed `Connection` is not considered usable for sends until
/// its heartbeat reports health, matching the "initial grace" rule: a fresh
/// connection with no pong yet is treated as healthy.
pub struct Connection {
    id: ConnectionId,
    url: String,
    state: AtomicU32,
    state_tx: watch::Sender<ConnectionState>,
    sender_tx: mpsc::Sender<Message>,
    heartbeat: Arc<Heartbeat>,
    reconnect: ReconnectConfig,
    dial_timeout: Duration,
    last_activity: Mutex<Instant>,
    message_handler: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Spawns the connection loop against `url` and returns immediately; the
    /// first connect attempt happens in the background. The handshake for
    /// each dial attempt is bounded by `dial_timeout`; a handshake that
    /// doesn't complete in time is treated the same as a dial error and
    /// falls through to the reconnect backoff.
    pub fn spawn(
        url: String,
        heartbeat_config: HeartbeatConfig,
        reconnect: ReconnectConfig,
        dial_timeout: Duration,
        message_handler: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (sender_tx, sender_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);

        let (ping_tx, ping_rx) = mpsc::unbounded_channel::<()>();
        let (close_tx, close_rx) = mpsc::unbounded_channel::<()>();

        let ping_tx_for_cb = ping_tx.clone();
        let callbacks = HeartbeatCallbacks {
            on_ping_requested: Arc::new(move || {
                let _ = ping_tx_for_cb.send(());
            }),
            on_health_change: Arc::new(|_healthy| {}),
            on_close_requested: Arc::new(move || {
                let _ = close_tx.send(());
            }),
        };
        let heartbeat = Heartbeat::new(heartbeat_config, callbacks);

        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            url,
            state: AtomicU32::new(DISCONNECTED),
            state_tx,
            sender_tx,
            heartbeat,
            reconnect,
            dial_timeout,
            last_activity: Mutex::new(Instant::now()),
            message_handler,
            task: Mutex::new(None),
        });

        let loop_conn = Arc::clone(&conn);
        let handle = tokio::spawn(async move {
            loop_conn
                .connection_loop(sender_rx, ping_rx, close_rx)
                .await;
        });
        *conn.task.lock() = Some(handle);

        conn
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_code(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// True if the connection is established and its heartbeat reports health
    /// (or hasn't had a chance to fail one yet).
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state().is_connected() && self.heartbeat.is_healthy()
    }

    #[must_use]
    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.heartbeat.stats()
    }

    /// How long since the last inbound or outbound frame on this connection.
    #[must_use]
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Queues `bytes` as a binary frame. Returns a temporary error if the
    /// connection isn't currently accepting sends.
    pub fn send(&self, bytes: Vec<u8>) -> crate::Result<()> {
        self.touch();
        self.sender_tx
            .try_send(Message::Binary(bytes.into()))
            .map_err(|_e| Error::temporary("connection is not accepting sends right now"))
    }

    /// Requests an orderly shutdown; does not block for the worker tasks to exit.
    pub async fn close(&self) {
        self.set_state(ConnectionState::Closing);
        self.heartbeat.stop().await;
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.set_state(ConnectionState::Closed);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_code(), Ordering::Release);
        let _ = self.state_tx.send(state);
    }

    async fn connection_loop(
        self: Arc<Self>,
        mut sender_rx: mpsc::Receiver<Message>,
        mut ping_rx: mpsc::UnboundedReceiver<()>,
        mut close_rx: mpsc::UnboundedReceiver<()>,
    ) {
        let mut attempt = 0_u32;
        let mut backoff: backoff::ExponentialBackoff = self.reconnect.clone().into();

        loop {
            self.set_state(ConnectionState::Connecting);

            match tokio::time::timeout(self.dial_timeout, connect_async(&self.url)).await {
                Ok(Ok((ws_stream, _))) => {
                    attempt = 0;
                    backoff.reset();
                    self.touch();
                    self.set_state(ConnectionState::Connected);
                    self.heartbeat.start().await;

                    let outcome = self
                        .handle_connection(ws_stream, &mut sender_rx, &mut ping_rx, &mut close_rx)
                        .await;
                    self.heartbeat.stop().await;

                    if let Err(e) = outcome {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(url = %self.url, error = %e, "connection loop ended");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                    }
                }
                Ok(Err(e)) => {
                    let error = Error::with_source(Kind::Connection, e);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(url = %self.url, error = %error, "unable to connect");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;
                    attempt = attempt.saturating_add(1);
                }
                Err(_elapsed) => {
                    let error = Error::connection(format!(
                        "handshake against {} did not complete within {:?}",
                        self.url, self.dial_timeout
                    ));
                    #[cfg(feature = "tracing")]
                    tracing::warn!(url = %self.url, error = %error, "dial timed out");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &error;
                    attempt = attempt.saturating_add(1);
                }
            }

            if self.state() == ConnectionState::Closed {
                return;
            }

            if let Some(max) = self.reconnect.max_attempts
                && attempt >= max
            {
                self.set_state(ConnectionState::Failed);
                return;
            }

            self.set_state(ConnectionState::Disconnected);
            if let Some(duration) = backoff.next_backoff() {
                sleep(duration).await;
            } else {
                self.set_state(ConnectionState::Failed);
                return;
            }
        }
    }

    async fn handle_connection(
        &self,
        ws_stream: WsStream,
        sender_rx: &mut mpsc::Receiver<Message>,
        ping_rx: &mut mpsc::UnboundedReceiver<()>,
        close_rx: &mut mpsc::UnboundedReceiver<()>,
    ) -> crate::Result<()> {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                Some(msg) = read.next() => {
                    self.touch();
                    match msg {
                        Ok(Message::Pong(_)) => self.heartbeat.on_pong(),
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Binary(bytes)) => (self.message_handler)(bytes.into()),
                        Ok(Message::Text(text)) => (self.message_handler)(text.as_bytes().to_vec()),
                        Ok(Message::Close(_)) => {
                            return Err(Error::connection("peer closed the connection"));
                        }
                        Ok(Message::Frame(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Some(message) = sender_rx.recv() => {
                    if write.send(message).await.is_err() {
                        return Err(Error::connection("write half closed"));
                    }
                }
                Some(()) = ping_rx.recv() => {
                    if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                        return Err(Error::connection("write half closed while pinging"));
                    }
                }
                Some(()) = close_rx.recv() => {
                    return Err(Error::connection("heartbeat requested close after missed pongs"));
                }
                else => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_code() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Closing,
            ConnectionState::Closed,
            ConnectionState::Failed,
        ] {
            assert_eq!(ConnectionState::from_code(state.to_code()), state);
        }
    }

    #[test]
    fn only_connected_reports_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
