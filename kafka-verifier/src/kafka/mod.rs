// Kafka module - producer, partitioned consumption with rebalance handling
pub mod committer;
pub mod config;
pub mod consumer;
pub mod context;
pub mod partition_manager;
pub mod partition_task;
pub mod producer;
pub mod types;

// Public API
pub use committer::OffsetCommitter;
pub use config::{ConsumerConfigBuilder, ConsumerSettings, ProducerSettings};
pub use consumer::{EventConsumer, PartitionedConsumer};
pub use partition_manager::{PartitionManager, PartitionQueueHandler};
pub use partition_task::{PartitionTask, PartitionTaskConfig};
pub use producer::{DeliverySender, KafkaSender};
