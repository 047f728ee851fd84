//! Shared state of one verification run.
//!
//! The send path writes the generated index, the receive path writes the status buckets. Both
//! may run concurrently from many tasks, so buckets use per-key atomic upserts and the counters
//! are plain atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::event::{Event, EventState, EventStatus};
use crate::metrics_consts::{
    DUPLICATE_DELIVERIES_TOTAL, EVENTS_RECEIVED_TOTAL, EVENTS_SENT_TOTAL, UNEXPECTED_ERRORS_TOTAL,
};

/// Longest prefix of a malformed record kept in its diagnostic
const MAX_RECORD_PREVIEW: usize = 128;

/// Delivery bookkeeping for every ID observed with one status
#[derive(Debug, Default)]
pub struct StatusBucket {
    entries: DashMap<String, EventState>,
}

impl StatusBucket {
    /// Record one delivery of `id`, returning its delivery count afterwards
    pub fn upsert(&self, id: &str) -> u64 {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                state.delivery_count += 1;
                state.delivery_count
            }
            Entry::Vacant(entry) => {
                entry.insert(EventState::first_delivery(id));
                1
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<EventState> {
        self.entries.get(id).map(|s| s.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Distinct IDs in the bucket
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// IDs delivered more than once, and the number of deliveries beyond the first
    pub fn redeliveries(&self) -> (usize, u64) {
        self.entries
            .iter()
            .filter(|s| s.delivery_count > 1)
            .fold((0, 0), |(ids, extra), s| {
                (ids + 1, extra + s.delivery_count - 1)
            })
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|s| s.key().clone()).collect()
    }
}

/// Point-in-time copy of the aggregate counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub generated: u64,
    pub success: u64,
    pub failed: u64,
    pub in_progress: u64,
}

impl Counts {
    /// Delivery events observed across all buckets
    pub fn received(&self) -> u64 {
        self.success + self.failed + self.in_progress
    }

    pub fn for_status(&self, status: EventStatus) -> u64 {
        match status {
            EventStatus::Success => self.success,
            EventStatus::Failed => self.failed,
            EventStatus::InProgress => self.in_progress,
        }
    }
}

#[derive(Debug, Default)]
pub struct VerificationStore {
    generated: DashMap<String, EventStatus>,
    success: StatusBucket,
    failed: StatusBucket,
    in_progress: StatusBucket,
    generated_count: AtomicU64,
    success_count: AtomicU64,
    failed_count: AtomicU64,
    in_progress_count: AtomicU64,
    errors: Mutex<Vec<String>>,
}

impl VerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event the broker durably accepted.
    /// Returns false, counting nothing, if the ID was already registered.
    pub fn record_sent(&self, event: &Event) -> bool {
        match self.generated.entry(event.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(event.status());
                self.generated_count.fetch_add(1, Ordering::SeqCst);
                metrics::counter!(EVENTS_SENT_TOTAL, "status" => event.status().as_str())
                    .increment(1);
                true
            }
        }
    }

    /// Bucket one delivered event, returning its delivery count in that bucket
    pub fn record_received(&self, event: &Event) -> u64 {
        let status = event.status();
        let count = self.bucket(status).upsert(event.id());
        self.counter(status).fetch_add(1, Ordering::SeqCst);

        metrics::counter!(EVENTS_RECEIVED_TOTAL, "status" => status.as_str()).increment(1);
        if count > 1 {
            metrics::counter!(DUPLICATE_DELIVERIES_TOTAL, "status" => status.as_str())
                .increment(1);
        }
        count
    }

    /// Parse and bucket every record of one handed-off batch. Malformed records are recorded as
    /// unexpected errors and skipped.
    pub fn receive_batch(&self, batch: &[Bytes]) {
        for value in batch {
            match Event::from_payload(value) {
                Ok(event) => {
                    self.record_received(&event);
                }
                Err(e) => {
                    let preview = &value[..value.len().min(MAX_RECORD_PREVIEW)];
                    self.add_unexpected_error(
                        "malformed_record",
                        format!(
                            "failed to parse record {:?}: {}",
                            String::from_utf8_lossy(preview),
                            e
                        ),
                    );
                }
            }
        }
    }

    /// Append a diagnostic to the unexpected error list
    pub fn add_unexpected_error(&self, kind: &'static str, message: String) {
        warn!(kind = kind, "{}", message);
        metrics::counter!(UNEXPECTED_ERRORS_TOTAL, "kind" => kind).increment(1);
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    pub fn unexpected_errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn counts(&self) -> Counts {
        Counts {
            generated: self.generated_count.load(Ordering::SeqCst),
            success: self.success_count.load(Ordering::SeqCst),
            failed: self.failed_count.load(Ordering::SeqCst),
            in_progress: self.in_progress_count.load(Ordering::SeqCst),
        }
    }

    /// Whether the receive side has caught up with the send side.
    ///
    /// The received delivery events must reach the generated count and every generated ID must be
    /// in its expected bucket. Redeliveries can balance or overshoot the counters while IDs are
    /// still missing.
    pub fn is_complete(&self) -> bool {
        let counts = self.counts();

        counts.received() >= counts.generated
            && self
                .generated
                .iter()
                .all(|entry| self.bucket(*entry.value()).contains(entry.key()))
    }

    pub fn bucket(&self, status: EventStatus) -> &StatusBucket {
        match status {
            EventStatus::Success => &self.success,
            EventStatus::Failed => &self.failed,
            EventStatus::InProgress => &self.in_progress,
        }
    }

    fn counter(&self, status: EventStatus) -> &AtomicU64 {
        match status {
            EventStatus::Success => &self.success_count,
            EventStatus::Failed => &self.failed_count,
            EventStatus::InProgress => &self.in_progress_count,
        }
    }

    /// Status an ID was sent with
    pub fn expected_status(&self, id: &str) -> Option<EventStatus> {
        self.generated.get(id).map(|s| *s.value())
    }

    /// Every generated ID with the status it was sent with, in ID order
    pub fn generated(&self) -> Vec<(String, EventStatus)> {
        let mut generated: Vec<(String, EventStatus)> = self
            .generated
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        generated.sort_by(|a, b| a.0.cmp(&b.0));
        generated
    }

    pub fn generated_len(&self) -> usize {
        self.generated.len()
    }
}
