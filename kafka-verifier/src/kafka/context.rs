use std::sync::Arc;

use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::{ClientContext, TopicPartitionList};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::kafka::partition_manager::PartitionManager;
use crate::kafka::types::Partition;
use crate::metrics_consts::REBALANCE_EVENTS_TOTAL;

/// Bridges librdkafka's rebalance callbacks to the partition manager.
///
/// Callbacks run on the poll thread, inside `poll`. Both revocation and assignment are carried out
/// to completion before the callback returns, so tasks exist before records of a new partition can
/// be fetched and revoked partitions are drained before the broker sees the acknowledgment.
pub struct VerifierConsumerContext {
    manager: Arc<Mutex<PartitionManager>>,
    /// Handle to the async runtime for executing async callbacks from sync context
    rt_handle: Handle,
}

impl VerifierConsumerContext {
    pub fn new(manager: Arc<Mutex<PartitionManager>>, rt_handle: Handle) -> Self {
        Self {
            manager,
            rt_handle,
        }
    }

    pub fn manager(&self) -> &Arc<Mutex<PartitionManager>> {
        &self.manager
    }
}

impl ClientContext for VerifierConsumerContext {}

impl ConsumerContext for VerifierConsumerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty revoke rebalance");
                    return;
                }
                metrics::counter!(REBALANCE_EVENTS_TOTAL, "event_type" => "revoke").increment(1);

                let partitions = Partition::from_list(partitions);
                info!("Revoking {} partitions", partitions.len());

                // SYNC: staged records are dispatched and tasks drained before we return
                let manager = self.manager.clone();
                self.rt_handle.block_on(async move {
                    manager.lock().await.on_revoked(&partitions).await;
                });

                info!("Revoked partitions drained");
            }
            Rebalance::Assign(partitions) => {
                debug!(
                    "Pre-rebalance assign event for {} partitions",
                    partitions.count()
                );
            }
            Rebalance::Error(e) => {
                metrics::counter!(REBALANCE_EVENTS_TOTAL, "event_type" => "error").increment(1);
                error!("Rebalance error: {}", e);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                if partitions.count() == 0 {
                    debug!("Skipping empty assign rebalance");
                    return;
                }
                metrics::counter!(REBALANCE_EVENTS_TOTAL, "event_type" => "assign").increment(1);

                let partitions = Partition::from_list(partitions);
                info!("Assigned {} partitions", partitions.len());

                // SYNC: tasks are running before records can arrive
                let manager = self.manager.clone();
                self.rt_handle.block_on(async move {
                    manager.lock().await.on_assigned(&partitions).await;
                });
            }
            Rebalance::Revoke(_) => {
                debug!("Post-rebalance revoke event");
            }
            Rebalance::Error(e) => {
                error!("Post-rebalance error: {}", e);
            }
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(_) => {
                debug!("Committed offsets for {} partitions", offsets.count());
            }
            Err(e) => {
                warn!("Failed to commit offsets: {}", e);
            }
        }
    }
}
