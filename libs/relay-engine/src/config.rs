use std::time::Duration;

use serde::Deserialize;

use crate::broker::QueueOptions;
use crate::consumer::ConsumerOptions;
use crate::delay::SeededDelays;
use crate::error::EngineError;
use crate::producer::{GroupMode, ProducerOptions};
use crate::sink::SinkOptions;

/// Windows, depths and caps are backed by tokio semaphores and channels.
const MAX_PERMITS: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Payloads of one batch are buffered as acks, so keep a batch bounded.
pub const MAX_BATCH_SIZE: usize = 1_000_000;

/// Root configuration, parsed from TOML. Every field has a default, so an
/// empty file is a valid config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub inbound: InboundConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutboundConfig {
    #[serde(default = "default_outbound_queue")]
    pub queue: String,
    /// Unacked messages the broker allows in flight.
    #[serde(default = "default_credit_window")]
    pub credit_window: usize,
    /// Metadata limit the broker advertises on this queue.
    #[serde(default = "default_max_metadata_bytes")]
    pub max_metadata_bytes: usize,
    /// Unset: wait for acks indefinitely.
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            queue: default_outbound_queue(),
            credit_window: default_credit_window(),
            max_metadata_bytes: default_max_metadata_bytes(),
            ack_timeout_ms: None,
        }
    }
}

fn default_outbound_queue() -> String {
    "outbox-events".into()
}
fn default_credit_window() -> usize {
    16
}
fn default_max_metadata_bytes() -> usize {
    relay_api::DEFAULT_MAX_METADATA_BYTES
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProducerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Group id, or its prefix in `per_tick` mode.
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default)]
    pub group_mode: GroupMode,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            group_id: default_group_id(),
            group_mode: GroupMode::default(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}
fn default_batch_size() -> usize {
    10
}
fn default_group_id() -> String {
    "group".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundConfig {
    #[serde(default = "default_inbound_queue")]
    pub queue: String,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            queue: default_inbound_queue(),
        }
    }
}

fn default_inbound_queue() -> String {
    "inbox-events".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Length of one delay unit.
    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,
    #[serde(default = "default_min_delay")]
    pub min_delay: u32,
    /// Exclusive upper bound.
    #[serde(default = "default_max_delay")]
    pub max_delay: u32,
    /// `0` seeds from the clock.
    #[serde(default)]
    pub seed: u64,
    /// Unset: one task per message, no cap.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default = "default_completion_buffer")]
    pub completion_buffer: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            time_unit_ms: default_time_unit_ms(),
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            seed: 0,
            max_in_flight: None,
            completion_buffer: default_completion_buffer(),
        }
    }
}

fn default_time_unit_ms() -> u64 {
    1000
}
fn default_min_delay() -> u32 {
    1
}
fn default_max_delay() -> u32 {
    10
}
fn default_completion_buffer() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Route the outbound queue into the inbound one.
    #[serde(default = "default_loopback")]
    pub loopback: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            loopback: default_loopback(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_loopback() -> bool {
    true
}
fn default_max_depth() -> usize {
    10_000
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self, EngineError> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            tracing::warn!(config = %path, "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.producer.interval_secs == 0 {
            return Err(EngineError::Config("producer.interval_secs must be > 0".into()));
        }
        if self.consumer.min_delay == 0 || self.consumer.max_delay <= self.consumer.min_delay {
            return Err(EngineError::Config(format!(
                "consumer delay range [{}, {}) is empty or starts at 0",
                self.consumer.min_delay, self.consumer.max_delay
            )));
        }
        if self.outbound.credit_window == 0 {
            return Err(EngineError::Config(
                "outbound.credit_window must be > 0, nothing could ever be sent".into(),
            ));
        }
        if self.producer.batch_size > MAX_BATCH_SIZE {
            return Err(EngineError::Config(format!(
                "producer.batch_size {} exceeds {MAX_BATCH_SIZE}",
                self.producer.batch_size
            )));
        }
        if self.consumer.max_in_flight == Some(0) {
            return Err(EngineError::Config("consumer.max_in_flight must be > 0".into()));
        }
        if self.broker.max_depth == 0 {
            return Err(EngineError::Config("broker.max_depth must be > 0".into()));
        }
        for (key, value) in [
            ("outbound.credit_window", self.outbound.credit_window),
            ("broker.max_depth", self.broker.max_depth),
            ("consumer.max_in_flight", self.consumer.max_in_flight.unwrap_or(0)),
            ("consumer.completion_buffer", self.consumer.completion_buffer),
        ] {
            if value > MAX_PERMITS {
                return Err(EngineError::Config(format!("{key} {value} exceeds {MAX_PERMITS}")));
            }
        }
        if self.outbound.queue == self.inbound.queue {
            return Err(EngineError::Config(format!(
                "outbound and inbound share queue '{}'",
                self.outbound.queue
            )));
        }
        Ok(())
    }
}

impl OutboundConfig {
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            ack_timeout: self.ack_timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn queue_options(&self, broker: &BrokerConfig) -> QueueOptions {
        QueueOptions {
            credit_window: self.credit_window,
            max_depth: broker.max_depth,
            max_metadata_bytes: self.max_metadata_bytes,
        }
    }
}

impl ProducerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn options(&self) -> ProducerOptions {
        ProducerOptions {
            batch_size: self.batch_size,
            group_prefix: self.group_id.clone(),
            group_mode: self.group_mode,
        }
    }
}

impl ConsumerConfig {
    pub fn options(&self) -> ConsumerOptions {
        ConsumerOptions {
            time_unit: Duration::from_millis(self.time_unit_ms),
            max_in_flight: self.max_in_flight,
            completion_buffer: self.completion_buffer,
        }
    }

    pub fn delay_strategy(&self) -> SeededDelays {
        SeededDelays::new(self.seed, self.min_delay, self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_reference_defaults() {
        let config = RelayConfig::parse("").unwrap();
        assert_eq!(config.outbound.queue, "outbox-events");
        assert_eq!(config.inbound.queue, "inbox-events");
        assert_eq!(config.producer.interval(), Duration::from_secs(60));
        assert_eq!(config.producer.batch_size, 10);
        assert_eq!(config.producer.group_id, "group");
        assert_eq!(config.producer.group_mode, GroupMode::PerTick);
        assert_eq!(config.consumer.min_delay, 1);
        assert_eq!(config.consumer.max_delay, 10);
        assert_eq!(config.consumer.max_in_flight, None);
        assert_eq!(config.outbound.sink_options().ack_timeout, None);
    }

    #[test]
    fn parses_full_file() {
        let config = RelayConfig::parse(
            r#"
            [outbound]
            queue = "out"
            credit_window = 4
            max_metadata_bytes = 64
            ack_timeout_ms = 1500

            [producer]
            interval_secs = 5
            batch_size = 3
            group_id = "orders"
            group_mode = "fixed"

            [inbound]
            queue = "in"

            [consumer]
            time_unit_ms = 10
            seed = 99
            max_in_flight = 8

            [broker]
            loopback = false
            max_depth = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.outbound.credit_window, 4);
        assert_eq!(config.outbound.sink_options().ack_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.producer.options().group_mode, GroupMode::Fixed);
        assert_eq!(config.producer.options().group_prefix, "orders");
        assert_eq!(config.consumer.options().time_unit, Duration::from_millis(10));
        assert_eq!(config.consumer.options().max_in_flight, Some(8));
        assert_eq!(config.outbound.queue_options(&config.broker).max_depth, 50);
        assert_eq!(config.outbound.queue_options(&config.broker).max_metadata_bytes, 64);
        assert!(!config.broker.loopback);
    }

    #[test]
    fn rejects_bad_values() {
        for bad in [
            "[producer]\ninterval_secs = 0",
            "[consumer]\nmin_delay = 0",
            "[consumer]\nmin_delay = 5\nmax_delay = 5",
            "[consumer]\nmax_in_flight = 0",
            "[consumer]\nmax_in_flight = 9223372036854775807",
            "[consumer]\ncompletion_buffer = 9223372036854775807",
            "[outbound]\ncredit_window = 0",
            "[outbound]\ncredit_window = 9223372036854775807",
            "[broker]\nmax_depth = 0",
            "[broker]\nmax_depth = 9223372036854775807",
            "[producer]\nbatch_size = 1000001",
            "[inbound]\nqueue = \"outbox-events\"",
            "[producer]\ngroup_mode = \"sometimes\"",
            "[unknown]\nx = 1",
        ] {
            assert!(RelayConfig::parse(bad).is_err(), "accepted: {bad}");
        }
    }
}
