use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::kafka::partition_manager::PartitionQueueHandler;
use crate::kafka::types::{HandoffBatch, Partition};
use crate::metrics_consts::ACTIVE_RECEIVERS;
use crate::verifier::store::VerificationStore;

/// Receive path of a run: drains every partition's handoff queue into the store.
///
/// Each partition gets its own drain task, so batches of different partitions are bucketed
/// concurrently while each partition's batches are taken in order.
#[derive(Clone)]
pub struct BatchReceiver {
    store: Arc<VerificationStore>,
}

impl BatchReceiver {
    pub fn new(store: Arc<VerificationStore>) -> Self {
        Self { store }
    }

    async fn drain(
        store: Arc<VerificationStore>,
        partition: Partition,
        mut queue: mpsc::Receiver<HandoffBatch>,
    ) {
        metrics::gauge!(ACTIVE_RECEIVERS).increment(1.0);
        info!("Receiving batches for {}", partition);

        let mut batches = 0u64;
        while let Some(batch) = queue.recv().await {
            debug!(
                topic = partition.topic(),
                partition = partition.partition_number(),
                record_count = batch.len(),
                "Received batch"
            );
            store.receive_batch(&batch);
            batches += 1;
        }

        info!("Handoff queue for {} closed after {} batches", partition, batches);
        metrics::gauge!(ACTIVE_RECEIVERS).decrement(1.0);
    }
}

impl PartitionQueueHandler for BatchReceiver {
    fn register_partition_queue(&self, partition: &Partition, queue: mpsc::Receiver<HandoffBatch>) {
        tokio::spawn(Self::drain(self.store.clone(), partition.clone(), queue));
    }
}
