use std::fmt;

use bytes::Bytes;
use rdkafka::topic_partition_list::TopicPartitionListElem;
use rdkafka::TopicPartitionList;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition_number: i32) -> Self {
        Self {
            topic: topic.into(),
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }

    /// All partitions named by a rebalance notification.
    pub fn from_list(list: &TopicPartitionList) -> Vec<Partition> {
        list.elements().into_iter().map(Partition::from).collect()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition_number)
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic(), elem.partition())
    }
}

/// A record fetched from the broker, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub offset: i64,
    /// Record value; a record without a value is forwarded as an empty payload.
    pub payload: Bytes,
}

impl ConsumedRecord {
    pub fn new(offset: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            payload: payload.into(),
        }
    }
}

/// The values of one fetched batch, as handed to the receive path.
pub type HandoffBatch = Vec<Bytes>;

/// A batch of records for a single partition, in fetch order
#[derive(Debug, Clone)]
pub struct PartitionBatch {
    pub partition: Partition,
    pub records: Vec<ConsumedRecord>,
    /// Sequential batch ID for ordering verification
    pub batch_id: u64,
}

impl PartitionBatch {
    pub fn new(partition: Partition, records: Vec<ConsumedRecord>, batch_id: u64) -> Self {
        Self {
            partition,
            records,
            batch_id,
        }
    }

    /// The offset to commit once this batch is handed off (highest offset + 1).
    /// Returns None if the batch is empty
    pub fn next_offset(&self) -> Option<i64> {
        self.records.iter().map(|r| r.offset).max().map(|o| o + 1)
    }

    pub fn into_values(self) -> HandoffBatch {
        self.records.into_iter().map(|r| r.payload).collect()
    }
}

/// Lifecycle of a partition task. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl TaskState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            TaskState::Idle => 0,
            TaskState::Running => 1,
            TaskState::Draining => 2,
            TaskState::Stopped => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Idle,
            1 => TaskState::Running,
            2 => TaskState::Draining,
            _ => TaskState::Stopped,
        }
    }
}
