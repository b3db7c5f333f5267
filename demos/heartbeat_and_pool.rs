//! Connects to a WebSocket endpoint, prints connection pool and heartbeat
//! stats every few seconds, and shuts down cleanly on Ctrl-C.
//!
//! ```sh
//! cargo run --example heartbeat_and_pool --features tracing -- wss://echo.example.test/ws
//! ```

use std::time::Duration;

use eventwire::{PoolConfig, Transport, TransportConfig};
use tokio::time::interval;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.example.test/ws".to_owned());

    let transport = Transport::new(TransportConfig {
        urls: vec![url.clone()],
        pool: PoolConfig {
            min_connections: 1,
            max_connections: 2,
            ..PoolConfig::default()
        },
        ..TransportConfig::default()
    })?;
    transport.start().await?;
    info!(url, "transport started, dialing in the background");

    let mut ticker = interval(Duration::from_secs(3));
    let mut ticks = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pool_stats = transport.connection_pool_stats();
                info!(
                    active = pool_stats.active_connections,
                    healthy = pool_stats.healthy_connections,
                    total = pool_stats.total_connections,
                    "connection pool"
                );
                info!(
                    connected = transport.is_connected(),
                    memory_pressure = transport.memory_usage(),
                    "transport health"
                );
                ticks += 1;
                if ticks >= 10 {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, shutting down");
                break;
            }
        }
    }

    transport.stop().await?;
    info!("transport stopped");
    Ok(())
}
