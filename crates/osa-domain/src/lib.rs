//! Domain model for the archive: aggregates, value objects, identity and the
//! repository ports they are persisted through.
//!
//! Aggregates enforce their own state machines; services orchestrate them and
//! emit events. Nothing in this crate performs I/O — persistence and file
//! handling live behind the ports in [`ports`].

pub mod convention;
pub mod deposition;
pub mod hook;
pub mod identity;
pub mod ports;
pub mod record;

pub use convention::{Convention, FileRequirements, InitialRun, SourceDefinition};
pub use deposition::{Deposition, DepositionError, DepositionFile, DepositionStatus};
pub use hook::{
    ColumnType, FeatureColumn, FeatureSchema, HookCardinality, HookDefinition, HookManifest,
    HookSnapshot, ResourceLimits, RunnerKind,
};
pub use identity::{AuthError, AuthPolicy, Identity, Role};
pub use record::{IndexEntry, Record};
