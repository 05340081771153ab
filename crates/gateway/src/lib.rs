//! Telemetry gateway: MQTT device state hub with SSE streaming.

pub mod api;
pub mod config;
pub mod hub;
pub mod ingress;
pub mod mqtt;
