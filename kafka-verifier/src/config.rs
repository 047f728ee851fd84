use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

use crate::error::VerifierError;
use crate::kafka::config::{ConsumerSettings, ProducerSettings};
use crate::kafka::partition_task::PartitionTaskConfig;
use crate::verifier::{SendMode, VerificationConfig};

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,

    #[envconfig(default = "false")]
    pub export_prometheus: bool,

    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "kafka-verifier-events")]
    pub kafka_topic: String,

    #[envconfig(default = "kafka-verifier")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "10000")]
    pub kafka_connect_timeout_ms: EnvMsDuration,

    // Kafka producer configuration
    #[envconfig(default = "5")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "1000000")]
    pub kafka_producer_batch_max_bytes: u32,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String,

    // Kafka consumer fetch configuration
    #[envconfig(default = "1000000")]
    pub kafka_fetch_min_bytes: u32,

    #[envconfig(default = "2000000")]
    pub kafka_fetch_max_bytes: u32,

    #[envconfig(default = "5000")]
    pub kafka_fetch_wait_max_ms: u32,

    // Partition consumption
    #[envconfig(default = "10000")]
    pub max_poll_records: usize,

    #[envconfig(default = "100")]
    pub poll_timeout_ms: EnvMsDuration,

    #[envconfig(default = "5")]
    pub partition_queue_capacity: usize,

    #[envconfig(default = "1")]
    pub handoff_queue_capacity: usize,

    // Verification scenario
    #[envconfig(default = "100000")]
    pub event_count: usize,

    #[envconfig(default = "single")]
    pub send_mode: SendModeName,

    #[envconfig(default = "1000")]
    pub batch_size: usize,

    #[envconfig(default = "1000")]
    pub completion_poll_interval_ms: EnvMsDuration,

    #[envconfig(default = "30")]
    pub completion_max_attempts: u32,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject values that parse but cannot work
    pub fn validate(&self) -> Result<(), VerifierError> {
        let checks = [
            (self.batch_size == 0, "BATCH_SIZE must be greater than zero"),
            (
                self.partition_queue_capacity == 0,
                "PARTITION_QUEUE_CAPACITY must be greater than zero",
            ),
            (
                self.handoff_queue_capacity == 0,
                "HANDOFF_QUEUE_CAPACITY must be greater than zero",
            ),
            (
                self.max_poll_records == 0,
                "MAX_POLL_RECORDS must be greater than zero",
            ),
            (
                self.completion_max_attempts == 0,
                "COMPLETION_MAX_ATTEMPTS must be greater than zero",
            ),
            (
                self.poll_timeout_ms.0.is_zero(),
                "POLL_TIMEOUT_MS must be greater than zero",
            ),
            (
                self.completion_poll_interval_ms.0.is_zero(),
                "COMPLETION_POLL_INTERVAL_MS must be greater than zero",
            ),
            (self.kafka_topic.is_empty(), "KAFKA_TOPIC must not be empty"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(VerifierError::InvalidConfig(reason.to_string())),
            None => Ok(()),
        }
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            hosts: self.kafka_hosts.clone(),
            topic: self.kafka_topic.clone(),
            group_id: self.kafka_consumer_group.clone(),
            offset_reset: self.kafka_consumer_offset_reset.clone(),
            tls: self.kafka_tls,
            fetch_min_bytes: self.kafka_fetch_min_bytes,
            fetch_max_bytes: self.kafka_fetch_max_bytes,
            fetch_wait_max_ms: self.kafka_fetch_wait_max_ms,
            connect_timeout: self.kafka_connect_timeout_ms.0,
            max_poll_records: self.max_poll_records,
            poll_timeout: self.poll_timeout_ms.0,
            task: PartitionTaskConfig {
                queue_capacity: self.partition_queue_capacity,
                handoff_capacity: self.handoff_queue_capacity,
            },
        }
    }

    pub fn producer_settings(&self) -> ProducerSettings {
        ProducerSettings {
            hosts: self.kafka_hosts.clone(),
            topic: self.kafka_topic.clone(),
            tls: self.kafka_tls,
            linger_ms: self.kafka_producer_linger_ms,
            batch_max_bytes: self.kafka_producer_batch_max_bytes,
            queue_mib: self.kafka_producer_queue_mib,
            message_timeout_ms: self.kafka_message_timeout_ms,
            compression_codec: self.kafka_compression_codec.clone(),
            connect_timeout: self.kafka_connect_timeout_ms.0,
        }
    }

    pub fn verification_config(&self) -> VerificationConfig {
        let send_mode = match self.send_mode {
            SendModeName::Single => SendMode::Single,
            SendModeName::Batch => SendMode::Batch {
                size: self.batch_size,
            },
        };

        VerificationConfig {
            event_count: self.event_count,
            send_mode,
            completion_poll_interval: self.completion_poll_interval_ms.0,
            completion_max_attempts: self.completion_max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendModeName {
    Single,
    Batch,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseSendModeError(pub String);

impl FromStr for SendModeName {
    type Err = ParseSendModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" => Ok(SendModeName::Single),
            "batch" => Ok(SendModeName::Batch),
            _ => Err(ParseSendModeError(s.to_owned())),
        }
    }
}
