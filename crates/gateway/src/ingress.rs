//! Ingress: decode transport messages and hand them to the hub.
//!
//! The transport side only calls [`IngressSender::submit`], which never
//! waits. A single task owns the receiving end and applies messages to the hub.

use std::sync::Arc;

use bytes::Bytes;
use shared::DeviceId;
use tokio::sync::mpsc;

use crate::hub::Hub;

/// Raw message as received from the transport.
#[derive(Debug, Clone)]
pub struct IngressMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("ingress queue full")]
    QueueFull,
    #[error("ingress queue closed")]
    Closed,
}

/// Cloneable, thread-safe handle for feeding messages into the hub.
#[derive(Clone)]
pub struct IngressSender {
    tx: mpsc::Sender<IngressMessage>,
}

impl IngressSender {
    pub fn submit(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), IngressError> {
        let msg = IngressMessage {
            topic: topic.into(),
            payload: payload.into(),
        };
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IngressError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => IngressError::Closed,
        })
    }
}

pub fn channel(capacity: usize) -> (IngressSender, mpsc::Receiver<IngressMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (IngressSender { tx }, rx)
}

/// Split `{namespace}/{manufacturer}/{serial}/{kind}` into identity and kind.
/// Empty segments are skipped; segments past the fourth are ignored.
pub fn decode_topic(topic: &str) -> Option<(DeviceId, String)> {
    let mut parts = topic.split('/').filter(|p| !p.is_empty());
    let _namespace = parts.next()?;
    let manufacturer = parts.next()?;
    let serial = parts.next()?;
    let kind = parts.next()?;
    Some((DeviceId::new(manufacturer, serial), kind.to_string()))
}

/// Parse a payload as JSON. Empty bodies become `{}`; anything unparsable is
/// wrapped as `{"raw": "..."}`.
pub fn decode_payload(payload: &[u8]) -> serde_json::Value {
    if payload.is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_slice(payload).unwrap_or_else(|_| {
        serde_json::json!({ "raw": String::from_utf8_lossy(payload) })
    })
}

/// Decode one message and apply it. Returns false when the topic is malformed.
pub fn apply_message(hub: &Hub, msg: &IngressMessage) -> bool {
    let Some((id, kind)) = decode_topic(&msg.topic) else {
        tracing::debug!(topic = %msg.topic, "dropping message with malformed topic");
        return false;
    };
    let payload = decode_payload(&msg.payload);
    hub.ingest(id, &kind, payload);
    true
}

/// Apply messages until every sender is gone.
pub async fn run_ingest_loop(hub: Arc<Hub>, mut rx: mpsc::Receiver<IngressMessage>) {
    while let Some(msg) = rx.recv().await {
        apply_message(&hub, &msg);
    }
    tracing::info!("ingress queue closed, ingest loop stopped");
}
