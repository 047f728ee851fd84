//! Synthetic events exchanged between the send and receive sides of a run.
//!
//! On the wire an event is a JSON object with exactly two fields:
//!
//! ```json
//! {"ID": "0b8c1b0e-6f5e-4c1e-a0a6-0d2c7c1f6a11", "State": "in-progress"}
//! ```
//!
//! Lower-case field names are accepted on read. Anything else, including an unknown status, is
//! a malformed record.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal status carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "in-progress")]
    InProgress,
}

impl EventStatus {
    pub const ALL: [EventStatus; 3] = [
        EventStatus::Success,
        EventStatus::Failed,
        EventStatus::InProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Failed => "failed",
            EventStatus::InProgress => "in-progress",
        }
    }

    /// Pick a status uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable synthetic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    #[serde(rename = "ID", alias = "id")]
    id: String,
    #[serde(rename = "State", alias = "state", alias = "status")]
    status: EventStatus,
}

impl Event {
    pub fn new(id: impl Into<String>, status: EventStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }

    /// A fresh event with a random v4 UUID and a uniformly random status.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(Uuid::new_v4().to_string(), EventStatus::random(rng))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Delivery bookkeeping for one ID inside one status bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventState {
    pub id: String,
    /// Times this ID was observed with this status, always >= 1.
    pub delivery_count: u64,
}

impl EventState {
    pub fn first_delivery(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delivery_count: 1,
        }
    }
}
