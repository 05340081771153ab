//! Configuration for the gateway.

use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("MQTT_TOPIC_PREFIX must be a single topic segment, got {0:?}")]
    TopicPrefix(String),
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    /// Topic namespace, e.g. `/vda5050`. The bridge subscribes to `{prefix}/#`.
    pub mqtt_topic_prefix: String,
    pub outbox_capacity: usize,
    pub idle_timeout: Duration,
    pub ingress_queue_capacity: usize,
    /// Unset means no cap on concurrent stream subscribers.
    pub max_subscribers: Option<usize>,
    /// Unset means devices are never expired.
    pub device_stale_after: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parse_or(&get, "PORT", 8080);
        let mqtt_host = get("MQTT_HOST").unwrap_or_else(|| "localhost".to_string());
        let mqtt_port: u16 = parse_or(&get, "MQTT_PORT", 1883);
        let mqtt_client_id =
            get("MQTT_CLIENT_ID").unwrap_or_else(|| "telemetry-gateway".to_string());
        let mqtt_topic_prefix = get("MQTT_TOPIC_PREFIX")
            .map(|p| p.trim_end_matches('/').to_string())
            .unwrap_or_else(|| "/vda5050".to_string());
        let outbox_capacity: usize = parse_or(&get, "STREAM_OUTBOX_CAPACITY", 100);
        let idle_timeout_secs: u64 = parse_or(&get, "STREAM_IDLE_TIMEOUT_SECS", 15);
        let ingress_queue_capacity: usize = parse_or(&get, "INGRESS_QUEUE_CAPACITY", 1024);
        let max_subscribers = get("MAX_SUBSCRIBERS").and_then(|s| s.parse().ok());
        let device_stale_after = get("DEVICE_STALE_AFTER_SECS")
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs);

        if outbox_capacity == 0 {
            return Err(ConfigError::Zero("STREAM_OUTBOX_CAPACITY"));
        }
        if idle_timeout_secs == 0 {
            return Err(ConfigError::Zero("STREAM_IDLE_TIMEOUT_SECS"));
        }
        if ingress_queue_capacity == 0 {
            return Err(ConfigError::Zero("INGRESS_QUEUE_CAPACITY"));
        }
        // topics are decoded as {namespace}/{manufacturer}/{serial}/{kind}
        let namespace = mqtt_topic_prefix.trim_start_matches('/');
        if namespace.is_empty() || namespace.contains('/') {
            return Err(ConfigError::TopicPrefix(mqtt_topic_prefix));
        }

        Ok(Self {
            host,
            port,
            mqtt_host,
            mqtt_port,
            mqtt_client_id,
            mqtt_topic_prefix,
            outbox_capacity,
            idle_timeout: Duration::from_secs(idle_timeout_secs),
            ingress_queue_capacity,
            max_subscribers,
            device_stale_after,
        })
    }

    /// Defaults for tests.
    pub fn for_test() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: "telemetry-gateway-test".to_string(),
            mqtt_topic_prefix: "/vda5050".to_string(),
            outbox_capacity: 100,
            idle_timeout: Duration::from_secs(15),
            ingress_queue_capacity: 64,
            max_subscribers: None,
            device_stale_after: None,
        }
    }

    /// Topic that write-back commands for one device are published to.
    pub fn command_topic(&self, manufacturer: &str, serial: &str) -> String {
        format!("{}/{}/{}/command", self.mqtt_topic_prefix, manufacturer, serial)
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}
