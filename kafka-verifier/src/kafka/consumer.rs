use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::util::Timeout;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::VerifierError;
use crate::kafka::committer::KafkaOffsetCommitter;
use crate::kafka::config::ConsumerSettings;
use crate::kafka::context::VerifierConsumerContext;
use crate::kafka::partition_manager::{PartitionManager, PartitionQueueHandler};
use crate::kafka::types::{ConsumedRecord, Partition};
use crate::metrics_consts::{CONSUMER_POLL_ERRORS_TOTAL, POLL_ROUND_RECORDS};

/// Receive side of a verification run.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Join the group and start consuming in the background. `handler` is given the handoff
    /// queue of every partition assigned from now on.
    ///
    /// Returns once consumption has started; an error means it never did.
    async fn consume(&self, handler: Arc<dyn PartitionQueueHandler>) -> Result<(), VerifierError>;

    /// Stop consuming, draining every owned partition first
    async fn shutdown(&self);
}

/// Group consumer that hands each owned partition to its own task.
///
/// The poll loop runs on a dedicated thread because librdkafka runs rebalance callbacks inside
/// `poll`, and those block until the partition manager has finished.
pub struct PartitionedConsumer {
    settings: ConsumerSettings,
    consumer: Mutex<Option<BaseConsumer<VerifierConsumerContext>>>,
    manager: Arc<Mutex<PartitionManager>>,
    committer: Arc<KafkaOffsetCommitter>,
    running: Arc<AtomicBool>,
    poll_thread: Mutex<Option<thread::JoinHandle<()>>>,
    rt_handle: Handle,
}

impl PartitionedConsumer {
    /// Create the consumer and check the brokers are reachable.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(settings: ConsumerSettings) -> Result<Self, VerifierError> {
        let rt_handle = Handle::current();
        let committer = Arc::new(KafkaOffsetCommitter::new());
        let manager = Arc::new(Mutex::new(PartitionManager::new(
            committer.clone(),
            settings.task.clone(),
        )));

        let context = VerifierConsumerContext::new(manager.clone(), rt_handle.clone());
        let client_config = settings.client_config();
        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: BaseConsumer<VerifierConsumerContext> = client_config
            .create_with_context(context)
            .map_err(VerifierError::ClientCreation)?;

        // Ping the cluster to make sure we can reach brokers
        consumer
            .fetch_metadata(None, Timeout::After(settings.connect_timeout))
            .map_err(|error| VerifierError::BrokersUnreachable {
                hosts: settings.hosts.clone(),
                error,
            })?;
        info!("Consumer connected to Kafka brokers at {}", settings.hosts);

        Ok(Self {
            settings,
            consumer: Mutex::new(Some(consumer)),
            manager,
            committer,
            running: Arc::new(AtomicBool::new(true)),
            poll_thread: Mutex::new(None),
            rt_handle,
        })
    }

    pub fn manager(&self) -> &Arc<Mutex<PartitionManager>> {
        &self.manager
    }
}

#[async_trait]
impl EventConsumer for PartitionedConsumer {
    async fn consume(&self, handler: Arc<dyn PartitionQueueHandler>) -> Result<(), VerifierError> {
        let consumer = self
            .consumer
            .lock()
            .await
            .take()
            .ok_or(VerifierError::AlreadyConsuming)?;

        self.manager.lock().await.set_queue_handler(handler);

        consumer
            .subscribe(&[&self.settings.topic])
            .map_err(|error| VerifierError::Subscription {
                topic: self.settings.topic.clone(),
                error,
            })?;
        info!("Subscribed to topic {}", self.settings.topic);

        let consumer = Arc::new(consumer);
        self.committer.bind(&consumer);

        let poll_loop = PollLoop {
            consumer,
            manager: self.manager.clone(),
            running: self.running.clone(),
            max_records: self.settings.max_poll_records.max(1),
            poll_timeout: self.settings.poll_timeout,
            rt_handle: self.rt_handle.clone(),
        };

        let handle = thread::Builder::new()
            .name("verifier-poll".to_string())
            .spawn(move || poll_loop.run())
            .map_err(VerifierError::PollThread)?;
        *self.poll_thread.lock().await = Some(handle);

        Ok(())
    }

    async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.poll_thread.lock().await.take() else {
            return;
        };

        info!("Waiting for the poll loop to drain and stop");
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => info!("Consumer stopped"),
            Ok(Err(_)) => error!("Poll thread panicked"),
            Err(e) => error!("Failed to wait for the poll thread: {}", e),
        }
    }
}

struct PollLoop {
    consumer: Arc<BaseConsumer<VerifierConsumerContext>>,
    manager: Arc<Mutex<PartitionManager>>,
    running: Arc<AtomicBool>,
    max_records: usize,
    poll_timeout: Duration,
    rt_handle: Handle,
}

impl PollLoop {
    /// Two-phase rounds: fetch and stage up to `max_records`, then dispatch everything staged.
    /// A rebalance can only run inside the fetch phase, while nothing staged is owned by a task.
    fn run(self) {
        info!("Starting poll loop");
        let mut error_count = 0u64;

        while self.running.load(Ordering::SeqCst) {
            let fetched = match self.fetch_round() {
                Ok(fetched) => {
                    error_count = 0;
                    fetched
                }
                Err(e) => {
                    error_count += 1;
                    if let Some(fatal) = Self::handle_kafka_error(e, error_count) {
                        error!("Stopping poll loop after fatal error: {}", fatal);
                        self.running.store(false, Ordering::SeqCst);
                    }
                    0
                }
            };

            if fetched > 0 {
                metrics::histogram!(POLL_ROUND_RECORDS).record(fetched as f64);
            }

            let manager = self.manager.clone();
            self.rt_handle.block_on(async move {
                manager.lock().await.dispatch_round().await;
            });
        }

        info!("Poll loop stopping - draining partition tasks");
        let manager = self.manager.clone();
        self.rt_handle.block_on(async move {
            manager.lock().await.shutdown().await;
        });
        info!("Poll loop stopped");
        // The consumer leaves the group when the last reference drops here
    }

    /// Poll until `max_records` were staged or the round's time budget is spent. Every round polls
    /// at least once, so group membership and rebalance callbacks are serviced.
    /// Records already staged stay staged if an error ends the round early.
    fn fetch_round(&self) -> Result<usize, KafkaError> {
        let deadline = Instant::now() + self.poll_timeout;
        let mut fetched = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());

            match self.consumer.poll(remaining) {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(message)) => {
                    let partition = Partition::new(message.topic(), message.partition());
                    let payload = message
                        .payload()
                        .map(Bytes::copy_from_slice)
                        .unwrap_or_default();
                    let record = ConsumedRecord::new(message.offset(), payload);

                    // Only this thread touches the manager between polls
                    self.manager.blocking_lock().stage(partition, record);
                    fetched += 1;
                }
            }

            if fetched >= self.max_records || Instant::now() >= deadline {
                break;
            }
        }

        Ok(fetched)
    }

    /// Returns the error back if consumption cannot continue
    fn handle_kafka_error(e: KafkaError, current_count: u64) -> Option<KafkaError> {
        match &e {
            KafkaError::MessageConsumption(code) => {
                match code {
                    RDKafkaErrorCode::PartitionEOF => {
                        metrics::counter!(
                            CONSUMER_POLL_ERRORS_TOTAL,
                            "level" => "info", "error" => "partition_eof"
                        )
                        .increment(1);
                    }
                    RDKafkaErrorCode::OffsetOutOfRange => {
                        // "auto.offset.reset" will trigger a seek
                        warn!("Offset out of range - seeking to configured offset reset policy");
                        metrics::counter!(
                            CONSUMER_POLL_ERRORS_TOTAL,
                            "level" => "info", "error" => "offset_out_of_range"
                        )
                        .increment(1);
                        thread::sleep(Duration::from_millis(500));
                    }
                    _ => {
                        warn!("Kafka consumer error: {code:?}");
                        metrics::counter!(
                            CONSUMER_POLL_ERRORS_TOTAL,
                            "level" => "warn", "error" => "consumer"
                        )
                        .increment(1);
                        thread::sleep(Duration::from_millis(100 * current_count.min(10)));
                    }
                }
                None
            }

            KafkaError::MessageConsumptionFatal(code) => {
                error!("Fatal Kafka consumer error: {code:?}");
                metrics::counter!(
                    CONSUMER_POLL_ERRORS_TOTAL,
                    "level" => "fatal", "error" => "consumer"
                )
                .increment(1);
                Some(e)
            }

            KafkaError::Global(code) => {
                match code {
                    RDKafkaErrorCode::AllBrokersDown | RDKafkaErrorCode::BrokerTransportFailure => {
                        warn!("Broker connection issue: {code:?} - waiting for reconnect");
                        metrics::counter!(
                            CONSUMER_POLL_ERRORS_TOTAL,
                            "level" => "warn", "error" => "broker_transport"
                        )
                        .increment(1);
                        thread::sleep(Duration::from_secs(current_count.min(5)));
                    }
                    RDKafkaErrorCode::Authentication => {
                        error!("Authentication failed: {code:?}");
                        metrics::counter!(
                            CONSUMER_POLL_ERRORS_TOTAL,
                            "level" => "fatal", "error" => "authentication"
                        )
                        .increment(1);
                        return Some(e);
                    }
                    _ => {
                        warn!("Global Kafka error: {code:?}");
                        metrics::counter!(
                            CONSUMER_POLL_ERRORS_TOTAL,
                            "level" => "warn", "error" => "global"
                        )
                        .increment(1);
                        thread::sleep(Duration::from_millis(500 * current_count.min(6)));
                    }
                }
                None
            }

            KafkaError::Canceled => {
                info!("Consumer canceled - shutting down");
                Some(e)
            }

            _ => {
                error!("Unexpected error: {:?}", e);
                metrics::counter!(
                    CONSUMER_POLL_ERRORS_TOTAL,
                    "level" => "warn", "error" => "unexpected"
                )
                .increment(1);
                thread::sleep(Duration::from_millis(100 * current_count.min(10)));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::partition_task::PartitionTaskConfig;
    use crate::test_utils::CollectingQueueHandler;
    use rdkafka::mocking::MockCluster;

    fn settings(hosts: String, connect_timeout: Duration) -> ConsumerSettings {
        ConsumerSettings {
            hosts,
            topic: "verifier-events".to_string(),
            group_id: "verifier-test".to_string(),
            offset_reset: "earliest".to_string(),
            tls: false,
            fetch_min_bytes: 1,
            fetch_max_bytes: 2_000_000,
            fetch_wait_max_ms: 100,
            connect_timeout,
            max_poll_records: 100,
            poll_timeout: Duration::from_millis(50),
            task: PartitionTaskConfig::default(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unreachable_brokers_fail_startup() {
        let result = PartitionedConsumer::new(settings(
            "127.0.0.1:1".to_string(),
            Duration::from_millis(500),
        ));

        assert!(matches!(
            result,
            Err(VerifierError::BrokersUnreachable { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_consume_can_only_start_once() {
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let consumer = PartitionedConsumer::new(settings(
            cluster.bootstrap_servers(),
            Duration::from_secs(5),
        ))
        .expect("failed to create consumer");

        let handler = Arc::new(CollectingQueueHandler::default());
        consumer.consume(handler.clone()).await.unwrap();
        assert!(matches!(
            consumer.consume(handler).await,
            Err(VerifierError::AlreadyConsuming)
        ));

        consumer.shutdown().await;
        assert_eq!(consumer.manager().lock().await.task_count(), 0);
        // A second shutdown is a no-op
        consumer.shutdown().await;
    }
}
