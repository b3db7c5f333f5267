//! Registers a handful of event handlers and a multi-type subscription,
//! sends a few events, and prints transport stats.
//!
//! ```sh
//! cargo run --example handlers_and_subscriptions --features tracing -- wss://echo.example.test/ws
//! ```

use std::sync::Arc;
use std::time::Duration;

use eventwire::{Event, PoolConfig, Transport, TransportConfig};
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
struct OrderPlaced {
    order_id: String,
    size: f64,
}

impl Event for OrderPlaced {
    fn event_type(&self) -> &str {
        "order.placed"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.example.test/ws".to_owned());

    let transport = Transport::new(TransportConfig {
        urls: vec![url],
        pool: PoolConfig {
            min_connections: 1,
            ..PoolConfig::default()
        },
        ..TransportConfig::default()
    })?;
    transport.start().await?;

    let fills_id = transport.add_event_handler(
        "order.filled",
        Arc::new(|value| {
            info!(event = %value, "order filled");
            Ok(())
        }),
    );

    let subscription = transport.subscribe(
        &["order.cancelled", "order.rejected"],
        Arc::new(|value| {
            info!(event = %value, "order terminated");
            Ok(())
        }),
    );

    for i in 0..5 {
        transport.send_event(&OrderPlaced {
            order_id: format!("order-{i}"),
            size: 10.0 + f64::from(i),
        })?;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = transport.stats();
    info!(
        sent = stats.events_sent,
        failed = stats.events_failed,
        active_subscriptions = stats.active_subscriptions,
        "transport stats after sending"
    );

    transport.remove_event_handler("order.filled", fills_id)?;
    transport.unsubscribe(subscription.id)?;
    transport.stop().await?;
    Ok(())
}
