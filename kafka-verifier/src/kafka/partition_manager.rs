//! Partition Manager - Owns one partition task per assigned partition
//!
//! Tasks are created during partition assignment and drained during revocation, both before the
//! rebalance callback returns. Records fetched in a poll round are staged here and dispatched to
//! their partition's task in one step once the round ends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::kafka::committer::OffsetCommitter;
use crate::kafka::partition_task::{PartitionTask, PartitionTaskConfig};
use crate::kafka::types::{ConsumedRecord, HandoffBatch, Partition, PartitionBatch, TaskState};
use crate::metrics_consts::{ASSIGNED_PARTITIONS, UNDELIVERABLE_RECORDS_TOTAL};

/// Receives the handoff queue of every partition this process starts consuming.
///
/// Called once per assignment, before the partition's task starts. The implementation must keep
/// draining the queue until it closes, which happens when the partition is revoked.
pub trait PartitionQueueHandler: Send + Sync {
    fn register_partition_queue(&self, partition: &Partition, queue: mpsc::Receiver<HandoffBatch>);
}

pub struct PartitionManager {
    tasks: HashMap<Partition, PartitionTask>,
    staged: BTreeMap<Partition, Vec<ConsumedRecord>>,
    committer: Arc<dyn OffsetCommitter>,
    handler: Option<Arc<dyn PartitionQueueHandler>>,
    config: PartitionTaskConfig,
    next_batch_id: u64,
}

impl PartitionManager {
    pub fn new(committer: Arc<dyn OffsetCommitter>, config: PartitionTaskConfig) -> Self {
        Self {
            tasks: HashMap::new(),
            staged: BTreeMap::new(),
            committer,
            handler: None,
            config,
            next_batch_id: 0,
        }
    }

    /// Set the handler that receives handoff queues of newly assigned partitions
    pub fn set_queue_handler(&mut self, handler: Arc<dyn PartitionQueueHandler>) {
        self.handler = Some(handler);
    }

    /// Create and start a task for every newly assigned partition.
    ///
    /// If a task already exists for a partition it is reused.
    pub async fn on_assigned(&mut self, partitions: &[Partition]) {
        let Some(handler) = self.handler.clone() else {
            warn!(
                count = partitions.len(),
                "Partitions assigned before a queue handler was set - not consuming them"
            );
            return;
        };

        for partition in partitions {
            if self.tasks.contains_key(partition) {
                info!(
                    "Task already exists for {}:{}, reusing",
                    partition.topic(),
                    partition.partition_number()
                );
                continue;
            }

            info!(
                "Creating partition task for {}:{}",
                partition.topic(),
                partition.partition_number()
            );

            let (mut task, queue) =
                PartitionTask::new(partition.clone(), self.committer.clone(), &self.config);
            handler.register_partition_queue(partition, queue);
            task.start();
            self.tasks.insert(partition.clone(), task);
            metrics::gauge!(ASSIGNED_PARTITIONS).increment(1.0);
        }
    }

    /// Stop consuming the revoked partitions.
    ///
    /// Records already staged for them are dispatched first; then every affected task is drained
    /// and stopped. When this returns nothing more will be committed for these partitions.
    pub async fn on_revoked(&mut self, partitions: &[Partition]) {
        for partition in partitions {
            if let Some(records) = self.staged.remove(partition) {
                self.dispatch(partition.clone(), records).await;
            }
        }

        let mut revoked: Vec<PartitionTask> = partitions
            .iter()
            .filter_map(|p| {
                let task = self.tasks.remove(p);
                if task.is_none() {
                    debug!(
                        "No task for revoked partition {}:{}",
                        p.topic(),
                        p.partition_number()
                    );
                }
                task
            })
            .collect();

        if revoked.is_empty() {
            return;
        }

        info!("Draining {} partition tasks", revoked.len());
        join_all(revoked.iter_mut().map(|task| task.shutdown())).await;
        metrics::gauge!(ASSIGNED_PARTITIONS).decrement(revoked.len() as f64);
    }

    /// Stage a fetched record for dispatch at the end of the current poll round
    pub fn stage(&mut self, partition: Partition, record: ConsumedRecord) {
        self.staged.entry(partition).or_default().push(record);
    }

    /// Dispatch every staged record to its partition's task as one batch per partition.
    /// Returns the number of records accepted by a task.
    pub async fn dispatch_round(&mut self) -> usize {
        let staged = std::mem::take(&mut self.staged);
        let mut dispatched = 0;
        for (partition, records) in staged {
            dispatched += self.dispatch(partition, records).await;
        }
        dispatched
    }

    async fn dispatch(&mut self, partition: Partition, records: Vec<ConsumedRecord>) -> usize {
        let count = records.len();
        if count == 0 {
            return 0;
        }

        let Some(task) = self.tasks.get(&partition) else {
            metrics::counter!(UNDELIVERABLE_RECORDS_TOTAL).increment(count as u64);
            debug!(
                "Dropping {} records for unowned partition {}:{}",
                count,
                partition.topic(),
                partition.partition_number()
            );
            return 0;
        };

        self.next_batch_id += 1;
        let batch = PartitionBatch::new(partition, records, self.next_batch_id);
        match task.deliver(batch).await {
            Ok(()) => count,
            Err(e) => {
                metrics::counter!(UNDELIVERABLE_RECORDS_TOTAL).increment(count as u64);
                warn!("Dropping {} records: {}", count, e);
                0
            }
        }
    }

    /// Revoke everything still owned, draining every task
    pub async fn shutdown(&mut self) {
        let owned = self.owned_partitions();
        self.on_revoked(&owned).await;
        self.staged.clear();
    }

    /// Partitions with a task, in order
    pub fn owned_partitions(&self) -> Vec<Partition> {
        let mut owned: Vec<Partition> = self.tasks.keys().cloned().collect();
        owned.sort();
        owned
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_state(&self, partition: &Partition) -> Option<TaskState> {
        self.tasks.get(partition).map(|t| t.state())
    }
}
