//! Engine configuration
//!
//! Plain structs with defaults. All durations are (de)serialized as
//! milliseconds so a config file reads `"pollInterval": 15000`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Push-channel connection and reconnection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Upper bound for a single connect attempt.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// How long to wait for the initial snapshot after connecting.
    #[serde(with = "duration_ms")]
    pub snapshot_timeout: Duration,
    /// Delay before the first reconnection attempt.
    #[serde(with = "duration_ms")]
    pub initial_reconnect_delay: Duration,
    /// Backoff cap.
    #[serde(with = "duration_ms")]
    pub max_reconnect_delay: Duration,
    /// Exponential growth factor between attempts.
    pub backoff_multiplier: f64,
    /// Random spread applied to each delay (0.2 = ±20%).
    pub jitter_factor: f64,
    /// Consecutive failures before the state turns `Failed` (0 = never).
    pub max_consecutive_failures: u32,
    /// Inbound message buffer between the channel and its consumer.
    pub channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(10),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
            max_consecutive_failures: 5,
            channel_capacity: 256,
        }
    }
}

/// Poll fallback policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollingConfig {
    pub enabled: bool,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15),
        }
    }
}

/// Local collection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// How long a status change for an unknown id waits for its insert.
    #[serde(with = "duration_ms")]
    pub pending_status_ttl: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pending_status_ttl: Duration::from_secs(30),
        }
    }
}

/// Everything one stream engine needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub polling: PollingConfig,
    pub reconciler: ReconcilerConfig,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
