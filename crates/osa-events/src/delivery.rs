//! Delivery model: one row per (event, consumer group) pair.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::{DomainEvent, EventEnvelope};

/// Lifecycle of a delivery row.
///
/// ```text
/// pending → claimed → (delivered | skipped | failed)
/// claimed → pending          (retry, stale-claim reset)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Claimed,
    Delivered,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Claimed => "claimed",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "claimed" => Some(DeliveryStatus::Claimed),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            "skipped" => Some(DeliveryStatus::Skipped),
            _ => None,
        }
    }

    /// Terminal acknowledgement states a worker may set on a claimed row.
    pub fn is_ack(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Skipped
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event claimed for processing, carrying the delivery row id the worker
/// acknowledges against.
#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    pub delivery_id: Uuid,
    pub envelope: EventEnvelope,
}

impl ClaimedEvent {
    pub fn event_id(&self) -> Uuid {
        self.envelope.event_id
    }

    pub fn decode<E: DomainEvent>(&self) -> anyhow::Result<E> {
        self.envelope.decode()
    }
}

/// Result of one claim attempt.
#[derive(Debug, Clone)]
pub struct ClaimResult {
    pub events: Vec<ClaimedEvent>,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimResult {
    pub fn empty(claimed_at: DateTime<Utc>) -> Self {
        ClaimResult {
            events: Vec::new(),
            claimed_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
