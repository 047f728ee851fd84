//! Partition Task - Dedicated task for consuming a single owned partition
//!
//! Each owned partition gets its own task with a bounded inbound queue, ensuring:
//! 1. Records are handed off and committed in fetch order within the partition
//! 2. A partition's offset is committed only after its batch was accepted by the handoff queue
//! 3. Backpressure reaches the poll loop when the receive path falls behind

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::TaskError;
use crate::kafka::committer::OffsetCommitter;
use crate::kafka::types::{HandoffBatch, Partition, PartitionBatch, TaskState};
use crate::metrics_consts::{OFFSET_COMMIT_ERRORS_TOTAL, PARTITION_TASK_BACKPRESSURE_TOTAL};

/// Configuration for partition tasks
#[derive(Debug, Clone)]
pub struct PartitionTaskConfig {
    /// Fetched batches buffered per partition before dispatch blocks
    pub queue_capacity: usize,
    /// Batches the handoff queue accepts before the receive path has taken them
    pub handoff_capacity: usize,
}

impl Default for PartitionTaskConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            handoff_capacity: 1,
        }
    }
}

/// Everything the processing loop owns once it starts
struct TaskIo {
    receiver: mpsc::Receiver<PartitionBatch>,
    handoff: mpsc::Sender<HandoffBatch>,
    committer: Arc<dyn OffsetCommitter>,
}

#[derive(Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(TaskState::Idle.as_u8())))
    }

    fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move forward to `next`; a task never goes back to an earlier state
    fn advance(&self, next: TaskState) {
        self.0.fetch_max(next.as_u8(), Ordering::SeqCst);
    }
}

/// Sequential consumer of exactly one partition while it is assigned to this process
pub struct PartitionTask {
    partition: Partition,
    sender: Option<mpsc::Sender<PartitionBatch>>,
    io: Option<TaskIo>,
    state: SharedState,
    handle: Option<JoinHandle<()>>,
}

impl PartitionTask {
    /// Create an idle task. The returned receiver is the partition's handoff queue and must be
    /// given to the receive path before the task is started.
    pub fn new(
        partition: Partition,
        committer: Arc<dyn OffsetCommitter>,
        config: &PartitionTaskConfig,
    ) -> (Self, mpsc::Receiver<HandoffBatch>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (handoff, handoff_rx) = mpsc::channel(config.handoff_capacity.max(1));

        let task = Self {
            partition,
            sender: Some(sender),
            io: Some(TaskIo {
                receiver,
                handoff,
                committer,
            }),
            state: SharedState::new(),
            handle: None,
        };

        (task, handoff_rx)
    }

    /// Spawn the processing loop. Does nothing unless the task is idle.
    pub fn start(&mut self) {
        let Some(io) = self.io.take() else {
            return;
        };

        self.state.advance(TaskState::Running);
        let partition = self.partition.clone();
        let state = self.state.clone();
        self.handle = Some(tokio::spawn(async move {
            Self::run(partition, io, state).await;
        }));
    }

    /// Queue one fetched batch for this partition.
    /// Awaits until the queue has capacity. Fails only if the task no longer accepts batches.
    pub async fn deliver(&self, batch: PartitionBatch) -> Result<(), TaskError> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| TaskError::Stopped(self.partition.clone()))?;

        if sender.capacity() == 0 {
            metrics::counter!(
                PARTITION_TASK_BACKPRESSURE_TOTAL,
                "topic" => self.partition.topic().to_string(),
                "partition" => self.partition.partition_number().to_string()
            )
            .increment(1);
        }

        sender
            .send(batch)
            .await
            .map_err(|_| TaskError::Stopped(self.partition.clone()))
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Check if the inbound queue has capacity
    pub fn has_capacity(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| s.capacity() > 0)
    }

    /// Stop accepting batches, finish every batch already dispatched (forward + commit), and wait
    /// for the loop to exit. Nothing is committed for this partition after this returns.
    /// Calling it again after it returned is a no-op.
    pub async fn shutdown(&mut self) {
        if self.state.get() == TaskState::Stopped {
            return;
        }

        info!(
            "Stopping partition task for {}:{}",
            self.partition.topic(),
            self.partition.partition_number()
        );
        self.state.advance(TaskState::Draining);

        // Dropping the sender closes the queue; the loop drains what is left and exits
        drop(self.sender.take());

        if self.io.take().is_some() {
            // Never started: nothing was handed off, so nothing is owed a commit
            self.state.advance(TaskState::Stopped);
            return;
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(()) => {
                    debug!(
                        "Partition task for {}:{} drained and stopped",
                        self.partition.topic(),
                        self.partition.partition_number()
                    );
                }
                Err(e) => {
                    warn!(
                        "Partition task for {}:{} panicked during shutdown: {}",
                        self.partition.topic(),
                        self.partition.partition_number(),
                        e
                    );
                }
            }
        }

        self.state.advance(TaskState::Stopped);
    }

    /// The main processing loop
    async fn run(partition: Partition, io: TaskIo, state: SharedState) {
        let TaskIo {
            mut receiver,
            handoff,
            committer,
        } = io;

        info!(
            "Starting partition task for {}:{}",
            partition.topic(),
            partition.partition_number()
        );

        while let Some(batch) = receiver.recv().await {
            let record_count = batch.records.len();
            let batch_id = batch.batch_id;
            let Some(next_offset) = batch.next_offset() else {
                continue;
            };

            debug!(
                topic = partition.topic(),
                partition = partition.partition_number(),
                record_count = record_count,
                batch_id = batch_id,
                next_offset = next_offset,
                "Handing off batch"
            );

            if handoff.send(batch.into_values()).await.is_err() {
                // Not handed off means not committed; the next owner fetches the records again
                warn!(
                    topic = partition.topic(),
                    partition = partition.partition_number(),
                    batch_id = batch_id,
                    "Receive path is gone - stopping without committing"
                );
                break;
            }

            match committer.commit(&partition, next_offset).await {
                Ok(()) => {
                    debug!(
                        topic = partition.topic(),
                        partition = partition.partition_number(),
                        batch_id = batch_id,
                        committed_offset = next_offset,
                        "Batch handed off and committed"
                    );
                }
                Err(e) => {
                    metrics::counter!(
                        OFFSET_COMMIT_ERRORS_TOTAL,
                        "topic" => partition.topic().to_string(),
                        "partition" => partition.partition_number().to_string()
                    )
                    .increment(1);
                    error!(
                        topic = partition.topic(),
                        partition = partition.partition_number(),
                        batch_id = batch_id,
                        offset = next_offset,
                        error = %e,
                        "Committing offsets failed - batch may be delivered again"
                    );
                }
            }
        }

        state.advance(TaskState::Stopped);
        info!(
            "Partition task for {}:{} stopped",
            partition.topic(),
            partition.partition_number()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::types::ConsumedRecord;
    use crate::test_utils::{eventually, RecordingCommitter};
    use bytes::Bytes;
    use tokio::time::{sleep, Duration};

    fn batch(
        partition: &Partition,
        offsets: std::ops::Range<i64>,
        batch_id: u64,
    ) -> PartitionBatch {
        let records = offsets
            .map(|o| ConsumedRecord::new(o, format!("value-{o}")))
            .collect();
        PartitionBatch::new(partition.clone(), records, batch_id)
    }

    #[tokio::test]
    async fn test_task_lifecycle_states() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::default());
        let (mut task, _handoff) =
            PartitionTask::new(partition, committer, &PartitionTaskConfig::default());

        assert_eq!(task.state(), TaskState::Idle);
        task.start();
        assert_eq!(task.state(), TaskState::Running);
        task.shutdown().await;
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn test_task_hands_off_then_commits_in_order() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::default());
        let (mut task, mut handoff) = PartitionTask::new(
            partition.clone(),
            committer.clone(),
            &PartitionTaskConfig::default(),
        );
        task.start();

        task.deliver(batch(&partition, 0..3, 1)).await.unwrap();
        task.deliver(batch(&partition, 3..5, 2)).await.unwrap();

        let first = handoff.recv().await.unwrap();
        assert_eq!(
            first,
            vec![
                Bytes::from("value-0"),
                Bytes::from("value-1"),
                Bytes::from("value-2")
            ]
        );
        let second = handoff.recv().await.unwrap();
        assert_eq!(second.len(), 2);

        assert!(eventually(|| committer.commits().len() == 2).await);
        assert_eq!(
            committer.commits(),
            vec![(partition.clone(), 3), (partition.clone(), 5)]
        );

        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_does_not_commit_before_handoff_is_accepted() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::default());
        let config = PartitionTaskConfig {
            queue_capacity: 5,
            handoff_capacity: 1,
        };
        let (mut task, mut handoff) =
            PartitionTask::new(partition.clone(), committer.clone(), &config);
        task.start();

        for i in 0..3 {
            task.deliver(batch(&partition, i * 10..i * 10 + 2, i as u64 + 1))
                .await
                .unwrap();
        }

        // Only the first batch fits in the handoff queue while nobody receives
        assert!(eventually(|| committer.commits().len() == 1).await);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(committer.commits(), vec![(partition.clone(), 2)]);

        // Taking one batch lets exactly one more through
        handoff.recv().await.unwrap();
        assert!(eventually(|| committer.commits().len() == 2).await);
        assert_eq!(committer.commits()[1], (partition.clone(), 12));

        handoff.recv().await.unwrap();
        handoff.recv().await.unwrap();
        task.shutdown().await;
        assert_eq!(committer.commits().len(), 3);
    }

    #[tokio::test]
    async fn test_task_drains_queue_on_shutdown() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::default());
        let (mut task, mut handoff) = PartitionTask::new(
            partition.clone(),
            committer.clone(),
            &PartitionTaskConfig {
                queue_capacity: 10,
                handoff_capacity: 10,
            },
        );
        task.start();

        for i in 0..5 {
            task.deliver(batch(&partition, i * 2..i * 2 + 2, i as u64 + 1))
                .await
                .unwrap();
        }

        // Immediately initiate shutdown - every queued batch is still handed off and committed
        task.shutdown().await;

        let mut received = 0;
        while let Some(values) = handoff.recv().await {
            received += values.len();
        }
        assert_eq!(received, 10);
        assert_eq!(committer.commits().len(), 5);
        assert_eq!(committer.commits().last(), Some(&(partition, 10)));
    }

    #[tokio::test]
    async fn test_task_shutdown_twice_does_not_deadlock() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::default());
        let (mut task, _handoff) =
            PartitionTask::new(partition, committer, &PartitionTaskConfig::default());
        task.start();

        task.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), task.shutdown())
            .await
            .expect("second shutdown should return immediately");
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_of_idle_task() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::default());
        let (mut task, mut handoff) =
            PartitionTask::new(partition, committer.clone(), &PartitionTaskConfig::default());

        task.shutdown().await;

        assert_eq!(task.state(), TaskState::Stopped);
        assert!(handoff.recv().await.is_none());
        assert!(committer.commits().is_empty());
    }

    #[tokio::test]
    async fn test_deliver_after_shutdown_is_rejected() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::default());
        let (mut task, _handoff) = PartitionTask::new(
            partition.clone(),
            committer,
            &PartitionTaskConfig::default(),
        );
        task.start();
        task.shutdown().await;

        let result = task.deliver(batch(&partition, 0..1, 1)).await;
        assert!(matches!(result, Err(TaskError::Stopped(p)) if p == partition));
        assert!(!task.has_capacity());
    }

    #[tokio::test]
    async fn test_commit_failures_do_not_halt_consumption() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::failing());
        let (mut task, mut handoff) = PartitionTask::new(
            partition.clone(),
            committer.clone(),
            &PartitionTaskConfig::default(),
        );
        task.start();

        for i in 0..3 {
            task.deliver(batch(&partition, i..i + 1, i as u64 + 1))
                .await
                .unwrap();
            assert!(handoff.recv().await.is_some());
        }

        assert!(eventually(|| committer.attempts() == 3).await);
        assert!(committer.commits().is_empty());
        assert_eq!(task.state(), TaskState::Running);

        task.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_stops_without_commit_when_receive_path_is_gone() {
        let partition = Partition::new("test-topic", 0);
        let committer = Arc::new(RecordingCommitter::default());
        let (mut task, handoff) = PartitionTask::new(
            partition.clone(),
            committer.clone(),
            &PartitionTaskConfig::default(),
        );
        drop(handoff);
        task.start();

        task.deliver(batch(&partition, 0..2, 1)).await.unwrap();

        assert!(eventually(|| task.state() == TaskState::Stopped).await);
        assert!(committer.commits().is_empty());
        task.shutdown().await;
    }
}
