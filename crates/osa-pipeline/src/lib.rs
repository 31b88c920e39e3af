//! Pipeline domains: the services and event-chain handlers that carry a
//! deposition from submission to an indexed, searchable record.
//!
//! ```text
//! SourceRequested ─► PullFromSource ─► SourceRecordReady ─► CreateDepositionFromSource
//!                                    ─► SourceRunCompleted ─► FlushIndexesOnSourceComplete
//!
//! DepositionSubmitted ─► ValidateDeposition
//!                     ├─► ValidationCompleted ─► AutoApproveCuration ─► DepositionApproved
//!                     │       DepositionApproved ─► ConvertDepositionToRecord ─► RecordPublished
//!                     │       RecordPublished ─► FanOutToIndexBackends ─► IndexRecord×N
//!                     │       RecordPublished ─► InsertRecordFeatures
//!                     │       IndexRecord ─► VectorIndexHandler (batched) | KeywordIndexHandler
//!                     └─► ValidationFailed ─► ReturnToDraft
//!
//! ConventionRegistered ─► CreateFeatureTables ─► ConventionReady ─► TriggerInitialSourceRun
//! ServerStarted ─► TriggerSourceOnStartup
//! ```
//!
//! Handlers never call each other directly; every arrow is an event on the
//! outbox, appended inside the emitting handler's transaction.

pub mod convention;
pub mod curation;
pub mod deposition;
pub mod feature;
pub mod index;
pub mod record;
pub mod runner;
pub mod source;
pub mod validation;
