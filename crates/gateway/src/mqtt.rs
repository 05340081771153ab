//! MQTT bridge: device telemetry in, write-back commands out.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::ingress::{IngressError, IngressSender};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Command waiting to be published to a device topic.
#[derive(Debug, Clone)]
pub struct OutboundCommand {
    pub topic: String,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("command publisher is not running")]
    Closed,
    #[error("command queue full")]
    QueueFull,
    #[error("encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Handle used by HTTP handlers to queue commands for the bridge.
#[derive(Clone)]
pub struct CommandPublisher {
    tx: mpsc::Sender<OutboundCommand>,
}

impl CommandPublisher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a command without waiting; a full queue means the broker is not
    /// keeping up and the caller should back off.
    pub fn publish(
        &self,
        topic: String,
        body: &serde_json::Value,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(body)?;
        self.tx
            .try_send(OutboundCommand { topic, body })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PublishError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
            })
    }
}

/// Connect to the broker, subscribe to `{prefix}/#` on every (re)connect and
/// forward publishes to ingress. Runs until the task is aborted.
pub async fn run_bridge(
    config: Arc<Config>,
    ingress: IngressSender,
    mut commands: mpsc::Receiver<OutboundCommand>,
) {
    let mut options = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(Duration::from_secs(60));
    let (client, mut eventloop) = AsyncClient::new(options, 64);
    let filter = format!("{}/#", config.mqtt_topic_prefix);

    let publisher = client.clone();
    tokio::spawn(async move {
        while let Some(cmd) = commands.recv().await {
            if let Err(e) = publisher
                .publish(cmd.topic.clone(), QoS::AtLeastOnce, false, cmd.body)
                .await
            {
                tracing::warn!(topic = %cmd.topic, "command publish failed: {}", e);
            }
        }
    });

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!(
                    "MQTT connected to {}:{}",
                    config.mqtt_host,
                    config.mqtt_port
                );
                if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtMostOnce) {
                    tracing::warn!("subscribe to {} failed: {}", filter, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(p))) => match ingress.submit(p.topic, p.payload) {
                Ok(()) => {}
                Err(IngressError::QueueFull) => {
                    tracing::warn!("ingress queue full, dropping message");
                }
                Err(IngressError::Closed) => {
                    tracing::warn!("ingress closed, stopping MQTT bridge");
                    return;
                }
            },
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("MQTT connection error: {}, retrying in 5s", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
