use std::time::Duration;

use rdkafka::ClientConfig;

use crate::kafka::partition_task::PartitionTaskConfig;

/// Kafka consumer configuration builder with defaults for a group consumer that commits its own
/// offsets.
///
/// Sets: auto.offset.store=false, auto.commit=false, socket.timeout.ms,
/// session.timeout.ms, heartbeat.interval.ms, max.poll.interval.ms.
pub struct ConsumerConfigBuilder {
    config: ClientConfig,
}

impl ConsumerConfigBuilder {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id);

        // Offsets are committed by the partition tasks only
        config
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "5000")
            .set("max.poll.interval.ms", "300000");

        Self { config }
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    /// Set minimum bytes to fetch from broker (triggers fetch when buffer has less than this)
    pub fn with_fetch_min_bytes(mut self, bytes: u32) -> Self {
        self.config.set("fetch.min.bytes", bytes.to_string());
        self
    }

    /// Set maximum bytes to fetch from broker in a single request
    pub fn with_fetch_max_bytes(mut self, bytes: u32) -> Self {
        self.config.set("fetch.max.bytes", bytes.to_string());
        self
    }

    /// Set maximum wait time when fetch.min.bytes is not satisfied
    pub fn with_fetch_wait_max_ms(mut self, ms: u32) -> Self {
        self.config.set("fetch.wait.max.ms", ms.to_string());
        self
    }

    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Everything the partitioned consumer needs
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub hosts: String,
    pub topic: String,
    pub group_id: String,
    pub offset_reset: String,
    pub tls: bool,
    pub fetch_min_bytes: u32,
    pub fetch_max_bytes: u32,
    pub fetch_wait_max_ms: u32,
    /// Budget for the metadata ping at startup
    pub connect_timeout: Duration,
    /// Upper bound of records fetched in one poll round
    pub max_poll_records: usize,
    /// Time budget of one poll round
    pub poll_timeout: Duration,
    pub task: PartitionTaskConfig,
}

impl ConsumerSettings {
    pub fn client_config(&self) -> ClientConfig {
        ConsumerConfigBuilder::new(&self.hosts, &self.group_id)
            .with_offset_reset(&self.offset_reset)
            .with_fetch_min_bytes(self.fetch_min_bytes)
            .with_fetch_max_bytes(self.fetch_max_bytes)
            .with_fetch_wait_max_ms(self.fetch_wait_max_ms)
            .with_tls(self.tls)
            .build()
    }
}

/// Everything the producer needs
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub hosts: String,
    pub topic: String,
    pub tls: bool,
    pub linger_ms: u32,
    pub batch_max_bytes: u32,
    pub queue_mib: u32,
    pub message_timeout_ms: u32,
    pub compression_codec: String,
    /// Budget for the metadata ping at startup
    pub connect_timeout: Duration,
}

impl ProducerSettings {
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", self.linger_ms.to_string())
            .set("batch.size", self.batch_max_bytes.to_string())
            .set("message.timeout.ms", self.message_timeout_ms.to_string())
            .set("compression.codec", &self.compression_codec)
            .set(
                "queue.buffering.max.kbytes",
                (self.queue_mib * 1024).to_string(),
            );

        if self.tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        client_config
    }
}
