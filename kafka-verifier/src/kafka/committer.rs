use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::{Offset, TopicPartitionList};

use crate::error::CommitError;
use crate::kafka::context::VerifierConsumerContext;
use crate::kafka::types::Partition;

/// Commits a partition's read position back to the broker.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// Commit `next_offset` (the offset of the next record to read) for `partition`,
    /// returning once the broker has acknowledged it.
    async fn commit(&self, partition: &Partition, next_offset: i64) -> Result<(), CommitError>;
}

/// Commits through the group consumer that fetched the records.
///
/// The consumer's context owns the partition tasks that use this committer, so the consumer is
/// bound after creation and held weakly.
#[derive(Default)]
pub struct KafkaOffsetCommitter {
    consumer: OnceLock<Weak<BaseConsumer<VerifierConsumerContext>>>,
}

impl KafkaOffsetCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if a consumer was already bound.
    pub fn bind(&self, consumer: &Arc<BaseConsumer<VerifierConsumerContext>>) -> bool {
        self.consumer.set(Arc::downgrade(consumer)).is_ok()
    }
}

#[async_trait]
impl OffsetCommitter for KafkaOffsetCommitter {
    async fn commit(&self, partition: &Partition, next_offset: i64) -> Result<(), CommitError> {
        let consumer = self
            .consumer
            .get()
            .and_then(Weak::upgrade)
            .ok_or(CommitError::ConsumerGone)?;

        let mut list = TopicPartitionList::new();
        list.add_partition_offset(
            partition.topic(),
            partition.partition_number(),
            Offset::Offset(next_offset),
        )?;

        // Sync commits block until the broker acknowledges, keep them off the async workers
        tokio::task::spawn_blocking(move || consumer.commit(&list, CommitMode::Sync)).await??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_without_bound_consumer_fails() {
        let committer = KafkaOffsetCommitter::new();
        let result = committer.commit(&Partition::new("events", 0), 10).await;

        assert!(matches!(result, Err(CommitError::ConsumerGone)));
    }
}
