//! Shared types and models for the telemetry gateway and its clients.

mod models;

// Explicit re-exports (avoids rust-analyzer issues with `pub use models::*`)
pub use models::{
    CommandPublishedResponse, DeviceId, DeviceIdError, DeviceState, HealthResponse, Snapshot,
    StreamFrame, UpdateEvent,
};
