//! Wire-shape configuration and connection types.
//!
//! Grounded on `original_source/brightside/connection.py::Connection` and
//! `original_source/brightside/messaging.py::BrightsideConsumerConfiguration`.
//! These are plain, serde-enabled value types; no config-file loader ships
//! with this crate (no on-disk format is part of the core), but an embedding
//! application can deserialize these from whatever format it chooses.

use std::num::NonZeroU16;

use serde::{Deserialize, Serialize};

/// The exchange topology a connection publishes/subscribes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeType {
    /// Routes by exact routing-key match.
    Direct,
    /// Routes by routing-key pattern match.
    Topic,
    /// Routes to every bound queue, ignoring the routing key.
    Fanout,
    /// Routes by matching message header values instead of the routing key.
    Headers,
}

/// Broker connection parameters, independent of any particular consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParameters {
    /// Address of the broker to connect to.
    pub broker_uri: String,
    /// Name of the exchange this connection publishes/subscribes against.
    pub exchange: String,
    /// Topology of `exchange`.
    #[serde(default = "ConnectionParameters::default_exchange_type")]
    pub exchange_type: ExchangeType,
    /// Whether the exchange survives a broker restart.
    #[serde(default)]
    pub durable: bool,
    /// How long to wait for the broker connection to establish before
    /// giving up.
    #[serde(default = "ConnectionParameters::default_connect_timeout_s")]
    pub connect_timeout_s: u32,
    /// The heartbeat interval negotiated with the broker.
    #[serde(default = "ConnectionParameters::default_heartbeat_s")]
    pub heartbeat_s: u32,
}

impl ConnectionParameters {
    pub fn new(broker_uri: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            broker_uri: broker_uri.into(),
            exchange: exchange.into(),
            exchange_type: Self::default_exchange_type(),
            durable: false,
            connect_timeout_s: Self::default_connect_timeout_s(),
            heartbeat_s: Self::default_heartbeat_s(),
        }
    }

    fn default_exchange_type() -> ExchangeType {
        ExchangeType::Direct
    }

    fn default_connect_timeout_s() -> u32 {
        30
    }

    fn default_heartbeat_s() -> u32 {
        30
    }

    /// The interval the continuous heartbeat ticker should use: at most half
    /// the negotiated heartbeat, so a dropped tick never alone causes the
    /// broker to consider the connection dead.
    pub fn heartbeat_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.heartbeat_s).max(2) / 2)
    }
}

/// Per-queue consumer configuration: what to bind to and how the message
/// pump behind it should behave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfiguration {
    /// The queue this consumer binds to.
    pub queue_name: String,
    /// The routing key the queue is bound to the connection's exchange with.
    pub routing_key: String,
    /// How many unacknowledged deliveries the broker may have in flight to
    /// this consumer at once.
    #[serde(default = "ConsumerConfiguration::default_prefetch_count")]
    pub prefetch_count: NonZeroU16,
    /// Whether the queue survives a broker restart.
    #[serde(default)]
    pub durable: bool,
    /// Whether to request highly available queue semantics from the broker
    /// (e.g. `x-ha-policy: all`), mirroring the queue across broker nodes.
    #[serde(default)]
    pub ha: bool,
    /// Whether handlers dispatched for this consumer run long enough that
    /// the channel must keep a broker connection alive with a continuous
    /// heartbeat ticker while they run.
    #[serde(default)]
    pub long_running: bool,
}

impl ConsumerConfiguration {
    pub fn new(queue_name: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            routing_key: routing_key.into(),
            prefetch_count: Self::default_prefetch_count(),
            durable: false,
            ha: false,
            long_running: false,
        }
    }

    pub fn with_prefetch_count(mut self, prefetch_count: NonZeroU16) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_ha(mut self, ha: bool) -> Self {
        self.ha = ha;
        self
    }

    pub fn with_long_running(mut self, long_running: bool) -> Self {
        self.long_running = long_running;
        self
    }

    fn default_prefetch_count() -> NonZeroU16 {
        NonZeroU16::new(64).expect("64 is non-zero")
    }
}

/// Tunables for a [`crate::pump::MessagePump`], recovered from
/// `original_source/brightside/message_pump.py::MessagePump.__init__`'s
/// `timeout`/`unacceptable_message_limit`/`requeue_count` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpOptions {
    /// How long a single `receive` poll waits for a delivery before yielding
    /// control back to the loop.
    #[serde(default = "PumpOptions::default_timeout", with = "duration_ms")]
    pub timeout: std::time::Duration,
    /// How many consecutive unacceptable messages the pump tolerates before
    /// ending its channel.
    #[serde(default = "PumpOptions::default_unacceptable_limit")]
    pub unacceptable_limit: u32,
    /// How many times a deferred message may be requeued before it is
    /// dropped instead. `None` means requeue without bound.
    #[serde(default)]
    pub requeue_count: Option<u32>,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_millis(Self::default_timeout_ms()),
            unacceptable_limit: Self::default_unacceptable_limit(),
            requeue_count: None,
        }
    }
}

impl PumpOptions {
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_unacceptable_limit(mut self, unacceptable_limit: u32) -> Self {
        self.unacceptable_limit = unacceptable_limit;
        self
    }

    pub fn with_requeue_count(mut self, requeue_count: u32) -> Self {
        self.requeue_count = Some(requeue_count);
        self
    }

    fn default_timeout_ms() -> u64 {
        500
    }

    fn default_timeout() -> std::time::Duration {
        std::time::Duration::from_millis(Self::default_timeout_ms())
    }

    fn default_unacceptable_limit() -> u32 {
        500
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis: u64 = value.as_millis().try_into().unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_configuration_round_trips_through_json() {
        let config = ConsumerConfiguration::new("orders", "orders.created")
            .with_prefetch_count(NonZeroU16::new(32).unwrap())
            .with_durable(true)
            .with_ha(true)
            .with_long_running(true);

        let json = serde_json::to_string(&config).unwrap();
        let restored: ConsumerConfiguration = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.queue_name, "orders");
        assert_eq!(restored.prefetch_count.get(), 32);
        assert!(restored.durable);
        assert!(restored.ha);
        assert!(restored.long_running);
    }

    #[test]
    fn pump_options_defaults_fill_in_when_absent_from_json() {
        let restored: PumpOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(restored.timeout, std::time::Duration::from_millis(500));
        assert_eq!(restored.unacceptable_limit, 500);
        assert_eq!(restored.requeue_count, None);
    }
}
