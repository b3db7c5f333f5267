//! Client-side WebSocket transport for carrying application events over a
//! pool of long-lived connections.
//!
//! `eventwire` manages one or more WebSocket connections to a remote
//! endpoint, keeps them alive with an application-level heartbeat, batches
//! and serializes outbound events, and dispatches inbound events to
//! registered handlers by their `event_type`. See [`transport::Transport`]
//! for the main entry point.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod id;
pub mod performance;
pub mod pool;
pub mod transport;

pub use config::{
    BackpressureConfig, DropAction, HeartbeatConfig, PerformanceConfig, PoolConfig,
    ReconnectConfig, SerializerType, TransportConfig,
};
pub use error::{Error, Kind};
pub use event::Event;
pub use heartbeat::{DetailedHealthStatus, HeartbeatStats};
pub use id::{ConnectionId, HandlerId, SubscriptionId};
pub use transport::{Subscription, Transport, TransportStats};

pub type Result<T> = std::result::Result<T, Error>;
