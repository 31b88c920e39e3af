//! Event type registry: name → payload decoder, assembled at startup.
//!
//! Replaces runtime type reflection: every event type the node can persist
//! or claim is registered here once, and startup validation fails fast when
//! a handler subscribes to an unregistered type or a type name is registered
//! twice.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::envelope::DomainEvent;

type DecodeCheck = fn(&Value) -> Result<(), String>;

fn check_decode<E: DomainEvent>(payload: &Value) -> Result<(), String> {
    serde_json::from_value::<E>(payload.clone())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Frozen after startup; cloning is cheap enough for sharing via `Arc`.
pub struct EventTypeRegistry {
    decoders: BTreeMap<&'static str, DecodeCheck>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        EventTypeRegistry {
            decoders: BTreeMap::new(),
        }
    }

    /// Register an event type.
    ///
    /// # Errors
    /// Fails on duplicate registration — two event structs sharing one
    /// discriminator is a wiring bug.
    pub fn register<E: DomainEvent>(&mut self) -> Result<(), RegistryError> {
        if self.decoders.insert(E::EVENT_TYPE, check_decode::<E>).is_some() {
            return Err(RegistryError::Duplicate(E::EVENT_TYPE));
        }
        Ok(())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.decoders.keys().copied().collect()
    }

    /// Check that a stored payload decodes as its declared type.
    ///
    /// # Errors
    /// `Unknown` for unregistered names (the caller marks the delivery
    /// skipped); `Undecodable` when the payload does not parse.
    pub fn check(&self, event_type: &str, payload: &Value) -> Result<(), RegistryError> {
        let decode = self
            .decoders
            .get(event_type)
            .ok_or_else(|| RegistryError::Unknown(event_type.to_string()))?;
        decode(payload).map_err(|e| RegistryError::Undecodable {
            event_type: event_type.to_string(),
            message: e,
        })
    }
}

impl Default for EventTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTypeRegistry")
            .field("types", &self.names())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Duplicate(&'static str),
    Unknown(String),
    Undecodable { event_type: String, message: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Duplicate(name) => write!(f, "event type registered twice: '{name}'"),
            RegistryError::Unknown(name) => write!(f, "unknown event type: '{name}'"),
            RegistryError::Undecodable { event_type, message } => {
                write!(f, "payload for '{event_type}' does not decode: {message}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}
