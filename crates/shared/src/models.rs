//! Shared device state and stream frame models.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of one device: manufacturer plus serial number.
///
/// Serialized as `"{manufacturer}/{serial_number}"`, which is also the key used
/// in snapshot maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DeviceId {
    pub manufacturer: String,
    pub serial_number: String,
}

impl DeviceId {
    pub fn new(manufacturer: impl Into<String>, serial_number: impl Into<String>) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            serial_number: serial_number.into(),
        }
    }

    /// Snapshot map key for this device.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.manufacturer, self.serial_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device id {0:?}: expected \"manufacturer/serial\"")]
pub struct DeviceIdError(pub String);

impl FromStr for DeviceId {
    type Err = DeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((m, sn)) if !m.is_empty() && !sn.is_empty() && !sn.contains('/') => {
                Ok(Self::new(m, sn))
            }
            _ => Err(DeviceIdError(s.to_string())),
        }
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DeviceIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Latest known state of one device. The payload is replaced wholesale on
/// every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub manufacturer: String,
    pub serial_number: String,
    pub last_message_type: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl DeviceState {
    pub fn id(&self) -> DeviceId {
        DeviceId::new(&self.manufacturer, &self.serial_number)
    }
}

/// Point-in-time copy of every device state, keyed by `"{manufacturer}/{serial}"`.
pub type Snapshot = BTreeMap<String, DeviceState>;

/// One ingested message, as delivered to stream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub identity: DeviceId,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Frame written to a device stream: `{"type": "snapshot" | "update", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamFrame {
    Snapshot(Snapshot),
    Update(UpdateEvent),
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub devices: usize,
    pub subscribers: usize,
}

/// Command write-back response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPublishedResponse {
    pub status: String,
    pub topic: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> DeviceState {
        DeviceState {
            manufacturer: "acme".to_string(),
            serial_number: "1".to_string(),
            last_message_type: "state".to_string(),
            payload: json!({"battery": 87}),
            updated_at: "2025-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn device_id_parses_and_displays() {
        let id: DeviceId = "KUKA/KR_1001".parse().unwrap();
        assert_eq!(id.manufacturer, "KUKA");
        assert_eq!(id.serial_number, "KR_1001");
        assert_eq!(id.to_string(), "KUKA/KR_1001");
    }

    #[test]
    fn device_id_rejects_malformed() {
        assert!("acme".parse::<DeviceId>().is_err());
        assert!("acme/".parse::<DeviceId>().is_err());
        assert!("/1".parse::<DeviceId>().is_err());
        assert!("acme/1/extra".parse::<DeviceId>().is_err());
    }

    #[test]
    fn update_event_serializes_identity_as_string() {
        let ev = UpdateEvent {
            identity: DeviceId::new("acme", "1"),
            kind: "state".to_string(),
            payload: json!({"battery": 87}),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            v,
            json!({"identity": "acme/1", "kind": "state", "payload": {"battery": 87}})
        );
    }

    #[test]
    fn stream_frame_uses_type_and_data_tags() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("acme/1".to_string(), sample_state());
        let v = serde_json::to_value(StreamFrame::Snapshot(snapshot)).unwrap();
        assert_eq!(v["type"], "snapshot");
        assert_eq!(v["data"]["acme/1"]["last_message_type"], "state");
        assert_eq!(v["data"]["acme/1"]["payload"]["battery"], 87);

        let update = StreamFrame::Update(UpdateEvent {
            identity: DeviceId::new("kuka", "99"),
            kind: "visualization".to_string(),
            payload: json!({}),
        });
        let json = serde_json::to_string(&update).unwrap();
        let parsed: StreamFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, update);
    }

    #[test]
    fn device_state_id_matches_fields() {
        assert_eq!(sample_state().id(), DeviceId::new("acme", "1"));
    }
}
