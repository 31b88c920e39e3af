//! Handler contracts and the typed-decoding adapter.
//!
//! Workers drive [`EventHandler`], which operates on claimed envelopes.
//! Handler implementations are written against [`Handles<E>`] with typed
//! events; [`TypedHandler`] bridges the two, turning undecodable payloads
//! into per-delivery skips so a poison message never burns retries.

use std::marker::PhantomData;

use async_trait::async_trait;
use uuid::Uuid;

use crate::delivery::ClaimedEvent;
use crate::envelope::DomainEvent;

/// How a handler invocation failed.
///
/// `Skipped` is not an error from the pipeline's point of view: the listed
/// events are permanently not-applicable (unknown payload, removed backend)
/// and are acknowledged as skipped while the rest of the batch is delivered.
/// Everything else is treated as transient and retried under the worker's
/// retry budget.
#[derive(Debug)]
pub enum HandlerError {
    Skipped {
        /// Event ids (not delivery ids) to mark skipped; the worker maps
        /// them back onto its claimed batch.
        event_ids: Vec<Uuid>,
        reason: String,
    },
    Other(anyhow::Error),
}

impl HandlerError {
    pub fn skipped(event_ids: Vec<Uuid>, reason: impl Into<String>) -> Self {
        HandlerError::Skipped {
            event_ids,
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::Other(err)
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerError::Skipped { event_ids, reason } => {
                write!(f, "skipped {} event(s): {reason}", event_ids.len())
            }
            HandlerError::Other(err) => write!(f, "{err:#}"),
        }
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// Envelope-level handler driven by the worker. One implementation exists
/// per consumer group; instances are rebuilt for every poll cycle so their
/// repositories share that cycle's transaction.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_batch(&self, events: &[ClaimedEvent]) -> HandlerResult;
}

/// Typed handler written by the pipeline domains.
///
/// `handle` is required; `handle_batch` defaults to a per-event loop and is
/// overridden by handlers that benefit from real batching.
#[async_trait]
pub trait Handles<E: DomainEvent>: Send + Sync {
    async fn handle(&self, event: E) -> HandlerResult;

    async fn handle_batch(&self, events: Vec<E>) -> HandlerResult {
        for event in events {
            self.handle(event).await?;
        }
        Ok(())
    }
}

/// Adapter from a typed [`Handles<E>`] to the envelope-level
/// [`EventHandler`].
///
/// Decode failures never fail the batch: good events are processed, bad ones
/// are reported as skipped.
pub struct TypedHandler<E, H> {
    inner: H,
    /// Dispatch `handle_batch` (true) or `handle` (false), mirroring the
    /// worker's `batch_size > 1` configuration.
    batched: bool,
    _event: PhantomData<fn() -> E>,
}

impl<E, H> TypedHandler<E, H> {
    pub fn new(inner: H, batched: bool) -> Self {
        TypedHandler {
            inner,
            batched,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<E, H> EventHandler for TypedHandler<E, H>
where
    E: DomainEvent,
    H: Handles<E>,
{
    async fn handle_batch(&self, events: &[ClaimedEvent]) -> HandlerResult {
        let mut decoded: Vec<E> = Vec::with_capacity(events.len());
        let mut undecodable: Vec<Uuid> = Vec::new();
        let mut decode_reason = String::new();

        for claimed in events {
            match claimed.decode::<E>() {
                Ok(event) => decoded.push(event),
                Err(err) => {
                    if undecodable.is_empty() {
                        decode_reason = format!("{err:#}");
                    }
                    undecodable.push(claimed.event_id());
                }
            }
        }

        if !decoded.is_empty() {
            let result = if self.batched {
                self.inner.handle_batch(decoded).await
            } else {
                // batch_size == 1: at most one decoded event.
                debug_assert!(decoded.len() == 1, "single handler claimed more than one event");
                let first = decoded.swap_remove(0);
                self.inner.handle(first).await
            };

            match result {
                Ok(()) => {}
                Err(HandlerError::Skipped { mut event_ids, reason }) => {
                    event_ids.extend(undecodable);
                    return Err(HandlerError::Skipped { event_ids, reason });
                }
                Err(other) => return Err(other),
            }
        }

        if !undecodable.is_empty() {
            return Err(HandlerError::Skipped {
                event_ids: undecodable,
                reason: format!("payload decode failed: {decode_reason}"),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
