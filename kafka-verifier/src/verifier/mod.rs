//! Verification engine: sends synthetic events, receives them back through the partitioned
//! consumer and reconciles what was sent against what was received.

pub mod receiver;
pub mod report;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::error::{SendError, VerifierError};
use crate::event::Event;
use crate::kafka::consumer::EventConsumer;
use crate::kafka::producer::DeliverySender;

pub use receiver::BatchReceiver;
pub use report::{Finding, Outcome, VerificationReport};
pub use store::{Counts, StatusBucket, VerificationStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// One send call per event
    Single,
    /// Send calls of exactly `size` events, the last one carrying the remainder
    Batch { size: usize },
}

#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub event_count: usize,
    pub send_mode: SendMode,
    pub completion_poll_interval: Duration,
    /// Completion checks before giving up with a partial report
    pub completion_max_attempts: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            event_count: 100_000,
            send_mode: SendMode::Single,
            completion_poll_interval: Duration::from_secs(1),
            completion_max_attempts: 30,
        }
    }
}

/// Drives one verification run. All run state lives in a fresh [`VerificationStore`].
pub struct Verifier<S, C>
where
    S: DeliverySender,
    C: EventConsumer,
{
    sender: Arc<S>,
    consumer: Arc<C>,
    store: Arc<VerificationStore>,
    config: VerificationConfig,
}

impl<S, C> Verifier<S, C>
where
    S: DeliverySender,
    C: EventConsumer,
{
    pub fn new(sender: Arc<S>, consumer: Arc<C>, config: VerificationConfig) -> Self {
        Self {
            sender,
            consumer,
            store: Arc::new(VerificationStore::new()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<VerificationStore> {
        &self.store
    }

    /// Run the whole scenario: start consuming, send `event_count` random events, wait for them
    /// to come back and reconcile.
    ///
    /// Fails only if consumption cannot start, before anything is sent.
    pub async fn verify(&self) -> Result<VerificationReport, VerifierError> {
        self.start_consumption().await?;

        let mut rng = StdRng::from_entropy();
        let events: Vec<Event> = (0..self.config.event_count)
            .map(|_| Event::random(&mut rng))
            .collect();
        self.send_events(events).await;

        let (outcome, attempts) = self.wait_for_completion().await;
        Ok(self.report(outcome, attempts))
    }

    /// Hand the receive path to the consumer
    pub async fn start_consumption(&self) -> Result<(), VerifierError> {
        let receiver = Arc::new(BatchReceiver::new(self.store.clone()));
        self.consumer.consume(receiver).await
    }

    /// Send `events` in the configured mode. Returns how many were durably accepted.
    ///
    /// Failed sends are recorded as unexpected errors and their events are not registered.
    pub async fn send_events(&self, events: Vec<Event>) -> u64 {
        info!(
            count = events.len(),
            mode = ?self.config.send_mode,
            "Sending events"
        );

        let mut sent = 0;
        match self.config.send_mode {
            SendMode::Single => {
                for event in &events {
                    match self.sender.send_one(event).await {
                        Ok(()) => {
                            if self.store.record_sent(event) {
                                sent += 1;
                            }
                        }
                        Err(e) => self.store.add_unexpected_error(
                            send_error_kind(&e),
                            format!("failed to send event {}: {}", event.id(), e),
                        ),
                    }
                }
            }
            SendMode::Batch { size } => {
                for batch in events.chunks(size.max(1)) {
                    match self.sender.send_batch(batch).await {
                        Ok(()) => {
                            for event in batch {
                                if self.store.record_sent(event) {
                                    sent += 1;
                                }
                            }
                        }
                        Err(e) => self.store.add_unexpected_error(
                            send_error_kind(&e),
                            format!("failed to send batch of {} events: {}", batch.len(), e),
                        ),
                    }
                }
            }
        }

        info!("Sent {} of {} events", sent, events.len());
        sent
    }

    /// Check for completion on a fixed interval, the first check immediately.
    /// Returns the outcome and the number of checks performed.
    pub async fn wait_for_completion(&self) -> (Outcome, u32) {
        let max_attempts = self.config.completion_max_attempts.max(1);
        let mut interval = tokio::time::interval(
            self.config
                .completion_poll_interval
                .max(Duration::from_millis(1)),
        );

        for attempt in 1..=max_attempts {
            interval.tick().await;

            if self.store.is_complete() {
                info!("Verification complete after {} checks", attempt);
                return (Outcome::Complete, attempt);
            }

            let counts = self.store.counts();
            debug!(
                attempt = attempt,
                generated = counts.generated,
                received = counts.received(),
                "Waiting for deliveries"
            );
        }

        let counts = self.store.counts();
        warn!(
            generated = counts.generated,
            received = counts.received(),
            "Giving up after {} completion checks",
            max_attempts
        );
        (Outcome::Partial, max_attempts)
    }

    pub fn report(&self, outcome: Outcome, attempts: u32) -> VerificationReport {
        VerificationReport::reconcile(&self.store, outcome, attempts)
    }
}

fn send_error_kind(e: &SendError) -> &'static str {
    match e {
        SendError::Serialization(_) => "serialization",
        SendError::Kafka(_) | SendError::Canceled => "send",
        SendError::EmptyBatch => "empty_batch",
    }
}
