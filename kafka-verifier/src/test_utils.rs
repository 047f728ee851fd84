//! Shared test utilities for the kafka-verifier crate.
//!
//! Used by the unit tests and by the integration tests under `tests/`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::CommitError;
use crate::kafka::committer::OffsetCommitter;
use crate::kafka::partition_manager::PartitionQueueHandler;
use crate::kafka::types::{HandoffBatch, Partition};

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Committer that records every acknowledged commit, or fails every commit when built with
/// `failing()`.
#[derive(Default)]
pub struct RecordingCommitter {
    commits: Mutex<Vec<(Partition, i64)>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingCommitter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn commits(&self) -> Vec<(Partition, i64)> {
        self.commits.lock().unwrap().clone()
    }

    /// Highest committed offset for `partition`
    pub fn committed(&self, partition: &Partition) -> Option<i64> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == partition)
            .map(|(_, o)| *o)
            .max()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OffsetCommitter for RecordingCommitter {
    async fn commit(&self, partition: &Partition, next_offset: i64) -> Result<(), CommitError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CommitError::ConsumerGone);
        }
        self.commits
            .lock()
            .unwrap()
            .push((partition.clone(), next_offset));
        Ok(())
    }
}

/// Queue handler that drains every registered handoff queue into one shared list.
#[derive(Default)]
pub struct CollectingQueueHandler {
    received: Arc<Mutex<Vec<(Partition, Bytes)>>>,
    registrations: Mutex<Vec<Partition>>,
}

impl CollectingQueueHandler {
    pub fn received(&self) -> Vec<(Partition, Bytes)> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_len(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub fn registrations(&self) -> Vec<Partition> {
        self.registrations.lock().unwrap().clone()
    }
}

impl PartitionQueueHandler for CollectingQueueHandler {
    fn register_partition_queue(
        &self,
        partition: &Partition,
        mut queue: mpsc::Receiver<HandoffBatch>,
    ) {
        self.registrations.lock().unwrap().push(partition.clone());

        let received = self.received.clone();
        let partition = partition.clone();
        tokio::spawn(async move {
            while let Some(batch) = queue.recv().await {
                let mut received = received.lock().unwrap();
                received.extend(batch.into_iter().map(|value| (partition.clone(), value)));
            }
        });
    }
}
