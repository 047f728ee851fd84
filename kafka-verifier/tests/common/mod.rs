//! In-memory stand-in for a Kafka topic and a single-member consumer group.
//!
//! Sends append to per-partition logs. Consumption runs the real `PartitionManager` and
//! `PartitionTask`s over those logs with a recording committer, and rebalances can be driven
//! from the test.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;

use kafka_verifier::error::{SendError, VerifierError};
use kafka_verifier::event::Event;
use kafka_verifier::kafka::types::{ConsumedRecord, Partition};
use kafka_verifier::kafka::{
    DeliverySender, EventConsumer, PartitionManager, PartitionQueueHandler, PartitionTaskConfig,
};
use kafka_verifier::test_utils::RecordingCommitter;

pub const TOPIC: &str = "verifier-events";

struct BrokerState {
    logs: Vec<Mutex<Vec<Bytes>>>,
    /// Fetch position per owned partition
    positions: Mutex<HashMap<Partition, usize>>,
    committer: Arc<RecordingCommitter>,
    manager: tokio::sync::Mutex<PartitionManager>,
    running: AtomicBool,
}

impl BrokerState {
    /// Records from the fetch position onwards; advances the position
    fn fetch(&self, partition: &Partition) -> Vec<ConsumedRecord> {
        let log = self.logs[partition.partition_number() as usize]
            .lock()
            .unwrap();
        let mut positions = self.positions.lock().unwrap();
        let position = positions.entry(partition.clone()).or_insert(0);

        let records = log[*position..]
            .iter()
            .enumerate()
            .map(|(i, value)| ConsumedRecord::new((*position + i) as i64, value.clone()))
            .collect();
        *position = log.len();
        records
    }

    /// A new owner starts from the committed offset
    fn reset_positions(&self, partitions: &[Partition]) {
        let mut positions = self.positions.lock().unwrap();
        for partition in partitions {
            let committed = self.committer.committed(partition).unwrap_or(0);
            positions.insert(partition.clone(), committed as usize);
        }
    }

    async fn poll_round(&self) {
        let mut manager = self.manager.lock().await;
        for partition in manager.owned_partitions() {
            for record in self.fetch(&partition) {
                manager.stage(partition.clone(), record);
            }
        }
        manager.dispatch_round().await;
    }
}

pub struct LoopbackBroker {
    state: Arc<BrokerState>,
    partition_count: usize,
    next_partition: AtomicUsize,
    send_calls: AtomicUsize,
    /// Send calls (by index) that fail without appending anything
    failing_calls: Vec<usize>,
    fail_consume: bool,
    poll_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackBroker {
    pub fn new(partition_count: usize) -> Self {
        Self::build(
            partition_count,
            Arc::new(RecordingCommitter::default()),
            vec![],
            false,
        )
    }

    pub fn with_committer(partition_count: usize, committer: Arc<RecordingCommitter>) -> Self {
        Self::build(partition_count, committer, vec![], false)
    }

    pub fn with_failing_calls(partition_count: usize, failing_calls: Vec<usize>) -> Self {
        Self::build(
            partition_count,
            Arc::new(RecordingCommitter::default()),
            failing_calls,
            false,
        )
    }

    pub fn unreachable() -> Self {
        Self::build(1, Arc::new(RecordingCommitter::default()), vec![], true)
    }

    fn build(
        partition_count: usize,
        committer: Arc<RecordingCommitter>,
        failing_calls: Vec<usize>,
        fail_consume: bool,
    ) -> Self {
        let manager = PartitionManager::new(committer.clone(), PartitionTaskConfig::default());
        Self {
            state: Arc::new(BrokerState {
                logs: (0..partition_count).map(|_| Mutex::new(Vec::new())).collect(),
                positions: Mutex::new(HashMap::new()),
                committer,
                manager: tokio::sync::Mutex::new(manager),
                running: AtomicBool::new(true),
            }),
            partition_count,
            next_partition: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            failing_calls,
            fail_consume,
            poll_handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn partitions(&self) -> Vec<Partition> {
        (0..self.partition_count)
            .map(|i| Partition::new(TOPIC, i as i32))
            .collect()
    }

    /// Append a raw value to a partition, bypassing the sender
    pub fn append_raw(&self, partition: usize, value: impl Into<Bytes>) {
        self.state.logs[partition].lock().unwrap().push(value.into());
    }

    pub fn log_len(&self, partition: &Partition) -> usize {
        self.state.logs[partition.partition_number() as usize]
            .lock()
            .unwrap()
            .len()
    }

    pub fn committer(&self) -> &Arc<RecordingCommitter> {
        &self.state.committer
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub async fn owned_partitions(&self) -> Vec<Partition> {
        self.state.manager.lock().await.owned_partitions()
    }

    /// Revocation arriving between poll rounds
    pub async fn revoke(&self, partitions: &[Partition]) {
        let mut manager = self.state.manager.lock().await;
        manager.on_revoked(partitions).await;
        self.state.reset_positions(partitions);
    }

    /// Revocation arriving inside a poll round, after records were fetched but before dispatch
    pub async fn revoke_mid_round(&self, partitions: &[Partition]) {
        let mut manager = self.state.manager.lock().await;
        for partition in manager.owned_partitions() {
            for record in self.state.fetch(&partition) {
                manager.stage(partition.clone(), record);
            }
        }
        manager.on_revoked(partitions).await;
        self.state.reset_positions(partitions);
    }

    pub async fn assign(&self, partitions: &[Partition]) {
        let mut manager = self.state.manager.lock().await;
        self.state.reset_positions(partitions);
        manager.on_assigned(partitions).await;
    }

    fn start_call(&self) -> Result<(), SendError> {
        let index = self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.contains(&index) {
            return Err(SendError::Canceled);
        }
        Ok(())
    }

    fn append(&self, event: &Event) -> Result<(), SendError> {
        let payload = event.to_payload()?;
        let partition = self.next_partition.fetch_add(1, Ordering::SeqCst) % self.partition_count;
        self.state.logs[partition]
            .lock()
            .unwrap()
            .push(Bytes::from(payload));
        Ok(())
    }
}

#[async_trait]
impl DeliverySender for LoopbackBroker {
    async fn send_one(&self, event: &Event) -> Result<(), SendError> {
        self.start_call()?;
        self.append(event)
    }

    async fn send_batch(&self, events: &[Event]) -> Result<(), SendError> {
        if events.is_empty() {
            return Err(SendError::EmptyBatch);
        }
        self.start_call()?;
        for event in events {
            self.append(event)?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for LoopbackBroker {
    async fn consume(&self, handler: Arc<dyn PartitionQueueHandler>) -> Result<(), VerifierError> {
        if self.fail_consume {
            return Err(VerifierError::InvalidConfig(
                "no brokers reachable".to_string(),
            ));
        }

        let mut poll_handle = self.poll_handle.lock().await;
        if poll_handle.is_some() {
            return Err(VerifierError::AlreadyConsuming);
        }

        {
            let mut manager = self.state.manager.lock().await;
            manager.set_queue_handler(handler);
            manager.on_assigned(&self.partitions()).await;
        }

        let state = self.state.clone();
        *poll_handle = Some(tokio::spawn(async move {
            while state.running.load(Ordering::SeqCst) {
                state.poll_round().await;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }));

        Ok(())
    }

    async fn shutdown(&self) {
        self.state.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poll_handle.lock().await.take() {
            handle.await.unwrap();
        }
        self.state.manager.lock().await.shutdown().await;
    }
}
