use std::collections::HashSet;
use std::fmt;

use crate::event::EventStatus;
use crate::verifier::store::{Counts, VerificationStore};

/// How the completion wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The receive side caught up with the send side
    Complete,
    /// The attempt budget ran out first
    Partial,
}

/// A reconciliation mismatch for one generated ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Sent but never observed in any bucket.
    Missing { id: String, expected: EventStatus },

    /// Observed in a bucket other than the one it was sent with.
    Misplaced {
        id: String,
        expected: EventStatus,
        observed: EventStatus,
    },
}

impl Finding {
    pub fn id(&self) -> &str {
        match self {
            Self::Missing { id, .. } | Self::Misplaced { id, .. } => id,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { id, expected } => {
                write!(f, "LOST: {id} sent as {expected} was never received")
            }
            Self::Misplaced {
                id,
                expected,
                observed,
            } => {
                write!(
                    f,
                    "MISPLACED: {id} sent as {expected} was received as {observed}"
                )
            }
        }
    }
}

/// Outcome of a verification run
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub outcome: Outcome,
    /// Completion checks performed
    pub attempts: u32,
    pub counts: Counts,
    /// Generated IDs observed in their expected bucket
    pub confirmed: usize,
    /// IDs delivered more than once into the same bucket
    pub redelivered_ids: usize,
    /// Deliveries beyond the first, summed over all buckets
    pub redeliveries: u64,
    /// Received IDs this run never generated, e.g. left on the topic by an earlier run
    pub unknown_ids: usize,
    pub findings: Vec<Finding>,
    pub unexpected_errors: Vec<String>,
}

impl VerificationReport {
    /// Reconcile every generated ID against the buckets
    pub fn reconcile(store: &VerificationStore, outcome: Outcome, attempts: u32) -> Self {
        let mut findings = Vec::new();
        let mut confirmed = 0;

        for (id, expected) in store.generated() {
            let mut observed_anywhere = false;

            for status in EventStatus::ALL {
                if !store.bucket(status).contains(&id) {
                    continue;
                }
                observed_anywhere = true;
                if status == expected {
                    confirmed += 1;
                } else {
                    findings.push(Finding::Misplaced {
                        id: id.clone(),
                        expected,
                        observed: status,
                    });
                }
            }

            if !observed_anywhere {
                findings.push(Finding::Missing { id, expected });
            }
        }

        let mut redelivered_ids = 0;
        let mut redeliveries = 0;
        let mut received_ids = HashSet::new();
        for status in EventStatus::ALL {
            let bucket = store.bucket(status);
            let (ids, extra) = bucket.redeliveries();
            redelivered_ids += ids;
            redeliveries += extra;
            received_ids.extend(bucket.ids());
        }
        let unknown_ids = received_ids
            .iter()
            .filter(|id| store.expected_status(id).is_none())
            .count();

        Self {
            outcome,
            attempts,
            counts: store.counts(),
            confirmed,
            redelivered_ids,
            redeliveries,
            unknown_ids,
            findings,
            unexpected_errors: store.unexpected_errors(),
        }
    }

    /// Complete, with no findings and no unexpected errors
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Complete
            && self.findings.is_empty()
            && self.unexpected_errors.is_empty()
    }

    pub fn missing(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| matches!(f, Finding::Missing { .. }))
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match (self.outcome, self.passed()) {
            (_, true) => "PASSED",
            (Outcome::Complete, false) => "FAILED",
            (Outcome::Partial, false) => "INCOMPLETE",
        };
        writeln!(
            f,
            "verification {verdict} after {} completion checks",
            self.attempts
        )?;
        writeln!(
            f,
            "generated={} success={} failed={} in-progress={}",
            self.counts.generated, self.counts.success, self.counts.failed, self.counts.in_progress
        )?;
        writeln!(
            f,
            "confirmed={} redelivered_ids={} redeliveries={} unknown_ids={}",
            self.confirmed, self.redelivered_ids, self.redeliveries, self.unknown_ids
        )?;

        if !self.findings.is_empty() {
            writeln!(f, "{} findings:", self.findings.len())?;
            for finding in &self.findings {
                writeln!(f, "  {finding}")?;
            }
        }

        if !self.unexpected_errors.is_empty() {
            writeln!(f, "{} unexpected errors:", self.unexpected_errors.len())?;
            for error in &self.unexpected_errors {
                writeln!(f, "  {error}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    #[test]
    fn test_report_names_missing_id_and_expected_status() {
        let store = VerificationStore::new();
        store.record_sent(&Event::new("A", EventStatus::Success));
        store.record_sent(&Event::new("B", EventStatus::InProgress));
        store.record_received(&Event::new("A", EventStatus::Success));

        let report = VerificationReport::reconcile(&store, Outcome::Partial, 3);

        assert!(!report.passed());
        assert_eq!(report.confirmed, 1);
        assert_eq!(
            report.findings,
            vec![Finding::Missing {
                id: "B".to_string(),
                expected: EventStatus::InProgress
            }]
        );
        let rendered = report.to_string();
        assert!(rendered.contains("INCOMPLETE"));
        assert!(rendered.contains("LOST: B sent as in-progress was never received"));
    }

    #[test]
    fn test_report_flags_cross_bucket_observations() {
        let store = VerificationStore::new();
        store.record_sent(&Event::new("A", EventStatus::Success));
        store.record_received(&Event::new("A", EventStatus::Success));
        store.record_received(&Event::new("A", EventStatus::Failed));

        let report = VerificationReport::reconcile(&store, Outcome::Complete, 1);

        assert_eq!(report.confirmed, 1);
        assert_eq!(
            report.findings,
            vec![Finding::Misplaced {
                id: "A".to_string(),
                expected: EventStatus::Success,
                observed: EventStatus::Failed
            }]
        );
        assert_eq!(report.missing().count(), 0);
        assert!(!report.passed());
    }

    #[test]
    fn test_report_counts_redeliveries_and_unknown_ids() {
        let store = VerificationStore::new();
        store.record_sent(&Event::new("A", EventStatus::Failed));
        store.record_received(&Event::new("A", EventStatus::Failed));
        store.record_received(&Event::new("A", EventStatus::Failed));
        store.record_received(&Event::new("Z", EventStatus::Success));

        let report = VerificationReport::reconcile(&store, Outcome::Complete, 1);

        assert!(report.passed());
        assert_eq!(report.redelivered_ids, 1);
        assert_eq!(report.redeliveries, 1);
        assert_eq!(report.unknown_ids, 1);
        assert!(report.to_string().starts_with("verification PASSED"));
    }

    #[test]
    fn test_unexpected_errors_fail_a_complete_run() {
        let store = VerificationStore::new();
        store.add_unexpected_error("send", "failed to send event X".to_string());

        let report = VerificationReport::reconcile(&store, Outcome::Complete, 1);

        assert!(!report.passed());
        assert!(report.to_string().contains("failed to send event X"));
    }
}
