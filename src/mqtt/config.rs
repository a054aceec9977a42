use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Client id announced to the broker
pub const CLIENT_ID: &str = "SwitchboardMockupPublisher";

/// Broker address entered by the operator before lockin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl Default for BrokerAddress {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Pacing of the reconnect worker between failed connect attempts
///
/// The delay starts at `initial_backoff` and doubles after each failure up to
/// `max_backoff`. A zero `initial_backoff` retries immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectSettings {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectSettings {
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after the given number of failed attempts
    pub fn backoff_after(&self, failed_attempts: u32) -> Duration {
        if self.initial_backoff.is_zero() || failed_attempts == 0 {
            return Duration::ZERO;
        }
        let shift = (failed_attempts - 1).min(16);
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Everything the MQTT link needs to connect and subscribe
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub broker: BrokerAddress,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Upper bound for a single blocking connect attempt
    pub connect_timeout: Duration,
    pub subbed_topics: Vec<(String, QoS)>,
    pub request_capacity: usize,
    pub reconnect: ReconnectSettings,
}

impl MqttConfig {
    pub fn new(broker: BrokerAddress, subbed_topics: Vec<(String, QoS)>) -> Self {
        Self {
            broker,
            subbed_topics,
            ..Self::default()
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: BrokerAddress::default(),
            client_id: CLIENT_ID.to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            subbed_topics: Vec::new(),
            request_capacity: 100,
            reconnect: ReconnectSettings::default(),
        }
    }
}
