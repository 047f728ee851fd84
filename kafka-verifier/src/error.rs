use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::kafka::types::Partition;

/// Enumeration of errors that stop a verification run before any event is sent.
#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to create Kafka client")]
    ClientCreation(#[source] KafkaError),
    #[error("brokers at {hosts} are not reachable")]
    BrokersUnreachable {
        hosts: String,
        #[source]
        error: KafkaError,
    },
    #[error("failed to subscribe to topic {topic}")]
    Subscription {
        topic: String,
        #[source]
        error: KafkaError,
    },
    #[error("consumer has already been started")]
    AlreadyConsuming,
    #[error("failed to spawn the poll thread")]
    PollThread(#[source] std::io::Error),
}

/// Errors for a single send or batch send. These never stop a run, they are recorded.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to produce to Kafka: {0}")]
    Kafka(#[from] KafkaError),
    #[error("produce was canceled before the broker acknowledged it")]
    Canceled,
    #[error("refusing to send an empty batch")]
    EmptyBatch,
}

/// Errors committing a partition's read position back to the broker.
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("failed to commit offset: {0}")]
    Kafka(#[from] KafkaError),
    #[error("consumer is gone")]
    ConsumerGone,
    #[error("commit task failed to complete")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("partition task for {0} no longer accepts batches")]
    Stopped(Partition),
}
