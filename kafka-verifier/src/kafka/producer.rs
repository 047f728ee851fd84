use std::time::Duration;

use async_trait::async_trait;
use metrics::{gauge, histogram};
use rdkafka::error::KafkaError;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{SendError, VerifierError};
use crate::event::Event;
use crate::kafka::config::ProducerSettings;
use crate::metrics_consts::SEND_BATCH_SIZE;

/// Send side of a verification run.
///
/// A send resolves once the broker has durably accepted the event. A failed batch may still
/// have delivered some of its events.
#[async_trait]
pub trait DeliverySender: Send + Sync {
    async fn send_one(&self, event: &Event) -> Result<(), SendError>;

    async fn send_batch(&self, events: &[Event]) -> Result<(), SendError>;
}

struct SenderContext;

impl rdkafka::ClientContext for SenderContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        gauge!("verifier_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("verifier_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("verifier_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        gauge!("verifier_kafka_producer_queue_bytes").set(stats.msg_size as f64);
        gauge!("verifier_kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (topic, stats) in stats.topics {
            gauge!(
                "verifier_kafka_produce_avg_batch_size_events",
                "topic" => topic
            )
            .set(stats.batchcnt.avg as f64);
        }

        for (_, stats) in stats.brokers {
            gauge!(
                "verifier_kafka_broker_requests_pending",
                "broker" => stats.nodeid.to_string()
            )
            .set(stats.outbuf_cnt as f64);
        }
    }
}

#[derive(Clone)]
pub struct KafkaSender {
    producer: FutureProducer<SenderContext>,
    topic: String,
}

impl KafkaSender {
    /// Create the producer and check the brokers are reachable
    pub fn new(settings: &ProducerSettings) -> Result<KafkaSender, VerifierError> {
        info!("connecting to Kafka brokers at {}...", settings.hosts);

        let client_config = settings.client_config();
        debug!("rdkafka producer configuration: {:?}", client_config);
        let producer: FutureProducer<SenderContext> = client_config
            .create_with_context(SenderContext)
            .map_err(VerifierError::ClientCreation)?;

        // Ping the cluster to make sure we can reach brokers
        producer
            .client()
            .fetch_metadata(None, Timeout::After(settings.connect_timeout))
            .map_err(|error| VerifierError::BrokersUnreachable {
                hosts: settings.hosts.clone(),
                error,
            })?;
        info!("connected to Kafka brokers");

        Ok(KafkaSender {
            producer,
            topic: settings.topic.clone(),
        })
    }

    /// Wait for every queued event to be delivered or to fail
    pub fn flush(&self, timeout: Duration) -> Result<(), KafkaError> {
        self.producer.flush(timeout)
    }

    /// Put one event in the producer queue
    fn enqueue(&self, event: &Event) -> Result<DeliveryFuture, SendError> {
        let payload = event.to_payload()?;
        let record: FutureRecord<'_, (), [u8]> =
            FutureRecord::to(self.topic.as_str()).payload(payload.as_slice());

        self.producer.send_result(record).map_err(|(e, _)| {
            error!("failed to produce event {}: {}", event.id(), e);
            SendError::Kafka(e)
        })
    }

    async fn process_ack(delivery: DeliveryFuture) -> Result<(), SendError> {
        match delivery.await {
            // Cancelled due to timeout while retrying
            Err(_) => Err(SendError::Canceled),
            Ok(Err((err, _))) => Err(SendError::Kafka(err)),
            Ok(Ok(_)) => Ok(()),
        }
    }
}

#[async_trait]
impl DeliverySender for KafkaSender {
    async fn send_one(&self, event: &Event) -> Result<(), SendError> {
        let ack = self.enqueue(event)?;
        histogram!(SEND_BATCH_SIZE).record(1.0);
        Self::process_ack(ack).await
    }

    async fn send_batch(&self, events: &[Event]) -> Result<(), SendError> {
        if events.is_empty() {
            return Err(SendError::EmptyBatch);
        }

        let mut set = JoinSet::new();
        for event in events {
            // Enqueue sequentially, then wait for the broker ACKs concurrently
            let ack = self.enqueue(event)?;
            set.spawn(Self::process_ack(ack));
        }

        // Fail the batch on first failure
        while let Some(res) = set.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    set.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    set.abort_all();
                    error!("join error while waiting on Kafka ACK: {:?}", err);
                    return Err(SendError::Canceled);
                }
            }
        }

        histogram!(SEND_BATCH_SIZE).record(events.len() as f64);
        Ok(())
    }
}
