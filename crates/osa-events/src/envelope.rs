//! Event envelope: the persisted form of a domain event.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Implemented by every event struct. The type name is the discriminator
/// stored in the `event_type` column and used for subscription matching, so
/// it MUST stay stable across releases.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    const EVENT_TYPE: &'static str;

    fn event_id(&self) -> Uuid;
}

/// An event as stored in the append-only log: type discriminator plus the
/// opaque JSON payload. Envelopes are write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wrap a typed event for persistence.
    pub fn encode<E: DomainEvent>(event: &E) -> Result<Self> {
        let payload = serde_json::to_value(event)
            .with_context(|| format!("serialize event payload for '{}'", E::EVENT_TYPE))?;
        Ok(EventEnvelope {
            event_id: event.event_id(),
            event_type: E::EVENT_TYPE.to_string(),
            payload,
            created_at: Utc::now(),
        })
    }

    /// Decode the payload into a typed event.
    ///
    /// # Errors
    /// Fails when the envelope's type does not match `E` or the payload does
    /// not deserialize. Both are permanent conditions; callers mark the
    /// delivery skipped rather than retrying.
    pub fn decode<E: DomainEvent>(&self) -> Result<E> {
        if self.event_type != E::EVENT_TYPE {
            anyhow::bail!(
                "event type mismatch: envelope is '{}', expected '{}'",
                self.event_type,
                E::EVENT_TYPE
            );
        }
        serde_json::from_value(self.payload.clone())
            .with_context(|| format!("deserialize event payload for '{}'", E::EVENT_TYPE))
    }
}
