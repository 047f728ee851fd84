use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};

use crate::config::Config;
use crate::kafka::{EventConsumer, KafkaSender, PartitionedConsumer};
use crate::verifier::{VerificationReport, Verifier};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Wires the Kafka producer and partitioned consumer into a verification run
pub struct VerifierService {
    sender: Arc<KafkaSender>,
    consumer: Arc<PartitionedConsumer>,
    verifier: Verifier<KafkaSender, PartitionedConsumer>,
}

impl VerifierService {
    /// Create the Kafka clients. Fails if the configuration is invalid or the brokers cannot be
    /// reached.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().with_context(|| {
            format!(
                "Configuration validation failed for topic '{}' and group '{}'",
                config.kafka_topic, config.kafka_consumer_group
            )
        })?;

        let sender = Arc::new(
            KafkaSender::new(&config.producer_settings()).with_context(|| {
                format!("Failed to create producer for topic '{}'", config.kafka_topic)
            })?,
        );

        let consumer = Arc::new(
            PartitionedConsumer::new(config.consumer_settings()).with_context(|| {
                format!(
                    "Failed to create Kafka consumer for topic '{}' with group '{}'",
                    config.kafka_topic, config.kafka_consumer_group
                )
            })?,
        );

        let verifier = Verifier::new(
            sender.clone(),
            consumer.clone(),
            config.verification_config(),
        );

        Ok(Self {
            sender,
            consumer,
            verifier,
        })
    }

    /// Run the verification until it reports or `shutdown_signal` resolves, then shut down the
    /// consumer and flush the producer.
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl Future<Output = ()>,
    ) -> Result<VerificationReport> {
        info!("Starting verification run");

        let result = tokio::select! {
            result = self.verifier.verify() => {
                result.context("Failed to start consuming")
            }
            _ = shutdown_signal => {
                info!("Received shutdown signal, stopping the run");
                Err(anyhow!("verification interrupted before it completed"))
            }
        };

        self.shutdown().await;
        result
    }

    async fn shutdown(&self) {
        info!("Shutting down consumer...");
        self.consumer.shutdown().await;

        let sender = self.sender.clone();
        match tokio::task::spawn_blocking(move || sender.flush(FLUSH_TIMEOUT)).await {
            Ok(Ok(())) => info!("Producer flushed"),
            Ok(Err(e)) => error!("Failed to flush producer: {e:#}"),
            Err(e) => error!("Producer flush task panicked: {e:#}"),
        }
    }
}
