//! Caller identity, roles and authorization policies.
//!
//! Every command handler and event-handler registration carries an
//! [`AuthPolicy`]; an executor checks the policy against the caller identity
//! before the handler runs. Workers always run under [`Identity::System`],
//! which satisfies any policy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered role hierarchy. `AtLeast(Depositor)` admits depositors, curators
/// and admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Depositor,
    Curator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Depositor => "depositor",
            Role::Curator => "curator",
            Role::Admin => "admin",
        }
    }
}

/// The identity a unit of work runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Internal node identity used by workers, schedules and source ingestion.
    /// Satisfies every policy.
    System,
    /// An authenticated user.
    User { id: String, role: Role },
}

impl Identity {
    /// Owner id recorded on aggregates created under this identity.
    pub fn owner_id(&self) -> String {
        match self {
            Identity::System => "system".to_string(),
            Identity::User { id, .. } => id.clone(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Identity::System)
    }
}

/// Authorization gate attached to a handler or command.
#[derive(Clone, Copy)]
pub enum AuthPolicy {
    /// No restriction.
    Public,
    /// Caller must hold at least the given role.
    AtLeast(Role),
    /// Arbitrary predicate over the identity.
    Custom(fn(&Identity) -> bool),
}

impl AuthPolicy {
    /// `System` passes every policy; users are checked against the variant.
    pub fn allows(&self, identity: &Identity) -> bool {
        if identity.is_system() {
            return true;
        }
        match self {
            AuthPolicy::Public => true,
            AuthPolicy::AtLeast(required) => match identity {
                Identity::User { role, .. } => role >= required,
                Identity::System => true,
            },
            AuthPolicy::Custom(check) => check(identity),
        }
    }

    /// # Errors
    /// Returns [`AuthError`] when the identity does not satisfy the policy.
    pub fn authorize(&self, identity: &Identity) -> Result<(), AuthError> {
        if self.allows(identity) {
            Ok(())
        } else {
            Err(AuthError {
                identity: format!("{identity:?}"),
            })
        }
    }
}

impl fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthPolicy::Public => f.write_str("Public"),
            AuthPolicy::AtLeast(role) => write!(f, "AtLeast({role:?})"),
            AuthPolicy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Returned when a caller fails an [`AuthPolicy`] check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthError {
    pub identity: String,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not authorized: {}", self.identity)
    }
}

impl std::error::Error for AuthError {}
