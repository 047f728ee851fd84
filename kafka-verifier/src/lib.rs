//! Kafka delivery verifier.
//!
//! Publishes uniquely identified synthetic events, consumes them back through a rebalancing
//! consumer group and checks every published event is observed in the status it was sent with.
//!
//! Each assigned partition is consumed by its own task, which hands fetched batches to the
//! receive path and commits only after the handoff was accepted. Rebalance callbacks drain
//! revoked partitions before they return.

pub mod config;
pub mod error;
pub mod event;
pub mod kafka;
pub mod metrics_consts;
pub mod service;
pub mod verifier;

// Used in "mod tests" and tests/ directory (integration tests)
pub mod test_utils;

pub use event::{Event, EventState, EventStatus};
pub use verifier::{VerificationReport, Verifier};
