//! Latest-state store, one record per device.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{DeviceId, DeviceState, Snapshot};

/// In-memory device state. Not synchronized on its own; the hub owns it behind its lock.
#[derive(Debug, Default)]
pub struct StateStore {
    devices: HashMap<DeviceId, DeviceState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the record for `id`, replacing the payload wholesale.
    pub fn apply(&mut self, id: &DeviceId, kind: &str, payload: serde_json::Value) -> DeviceState {
        self.apply_at(id, kind, payload, Utc::now())
    }

    pub fn apply_at(
        &mut self,
        id: &DeviceId,
        kind: &str,
        payload: serde_json::Value,
        at: DateTime<Utc>,
    ) -> DeviceState {
        let state = DeviceState {
            manufacturer: id.manufacturer.clone(),
            serial_number: id.serial_number.clone(),
            last_message_type: kind.to_string(),
            payload,
            updated_at: at,
        };
        self.devices.insert(id.clone(), state.clone());
        state
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceState> {
        self.devices.get(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Owned copy of every record, keyed by `"{manufacturer}/{serial}"`.
    pub fn snapshot(&self) -> Snapshot {
        self.devices
            .iter()
            .map(|(id, state)| (id.key(), state.clone()))
            .collect()
    }

    /// Remove devices last updated before `cutoff`. Returns the removed ids.
    pub fn evict_stale(&mut self, cutoff: DateTime<Utc>) -> Vec<DeviceId> {
        let stale: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|(_, state)| state.updated_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.devices.remove(id);
        }
        stale
    }
}
