//! Telemetry gateway — MQTT device state hub with SSE streaming.
//!
//! Optional env: HOST, PORT, MQTT_HOST, MQTT_PORT, MQTT_CLIENT_ID, MQTT_TOPIC_PREFIX,
//! STREAM_OUTBOX_CAPACITY, STREAM_IDLE_TIMEOUT_SECS, INGRESS_QUEUE_CAPACITY,
//! MAX_SUBSCRIBERS, DEVICE_STALE_AFTER_SECS

use std::net::SocketAddr;
use std::sync::Arc;

use gateway::{api, config, hub, ingress, mqtt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;
    let config = Arc::new(config);

    let hub = Arc::new(hub::Hub::new(config.max_subscribers));

    let (ingress_tx, ingress_rx) = ingress::channel(config.ingress_queue_capacity);
    tokio::spawn(ingress::run_ingest_loop(hub.clone(), ingress_rx));

    let (commands, command_rx) = mqtt::CommandPublisher::channel(64);
    tokio::spawn(mqtt::run_bridge(config.clone(), ingress_tx, command_rx));

    if let Some(stale_after) = config.device_stale_after {
        tracing::info!("expiring devices silent for {:?}", stale_after);
        tokio::spawn(hub::run_stale_sweeper(hub.clone(), stale_after));
    }

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;

    let state = api::AppState {
        hub,
        config,
        commands,
    };

    let app = api::router(state);

    tracing::info!("Gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
