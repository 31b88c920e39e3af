//! Structured Resource Names (SRNs).
//!
//! Every domain entity in the archive is addressed by an SRN of the form
//!
//! ```text
//! urn:osa:{domain}:{type}:{local_id}[@{version}]
//! ```
//!
//! - `domain` is the DNS name of the owning node (e.g. `archive.example.org`).
//! - `type` is one of the resource type tags below.
//! - `local_id` is a node-scoped identifier, `[a-z0-9-]`, 3–64 chars.
//! - `version` is a SemVer for schemas/conventions/ontologies, a positive
//!   integer for records, and absent for everything else.
//!
//! Parsing is strict and case-folds to lowercase. SRNs are immutable value
//! objects; in JSON they serialize as their canonical string form.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// ResourceType
// ---------------------------------------------------------------------------

/// Resource type tag carried in the fourth SRN segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Published record.
    Record,
    /// Deposition (submission in progress).
    Deposition,
    /// Convention (submission template).
    Convention,
    /// Metadata schema.
    Schema,
    /// Ontology.
    Ontology,
    /// Domain event.
    Event,
    /// Validation run.
    ValidationRun,
    /// Snapshot.
    Snapshot,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Record => "rec",
            ResourceType::Deposition => "dep",
            ResourceType::Convention => "conv",
            ResourceType::Schema => "schema",
            ResourceType::Ontology => "onto",
            ResourceType::Event => "evt",
            ResourceType::ValidationRun => "val",
            ResourceType::Snapshot => "snap",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SrnParseError> {
        match s {
            "rec" => Ok(ResourceType::Record),
            "dep" => Ok(ResourceType::Deposition),
            "conv" => Ok(ResourceType::Convention),
            "schema" => Ok(ResourceType::Schema),
            "onto" => Ok(ResourceType::Ontology),
            "evt" => Ok(ResourceType::Event),
            "val" => Ok(ResourceType::ValidationRun),
            "snap" => Ok(ResourceType::Snapshot),
            other => Err(SrnParseError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// SRN version segment.
///
/// Schemas, conventions and ontologies are versioned by SemVer; records by a
/// positive integer assigned at publish time. Depositions, validation runs,
/// events and snapshots carry no version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    Semver(Semver),
    Record(u32),
}

impl Version {
    fn parse(s: &str) -> Result<Self, SrnParseError> {
        if let Ok(sv) = Semver::parse(s) {
            return Ok(Version::Semver(sv));
        }
        // Integer record versions must be positive with no leading zeros.
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) && !s.starts_with('0') {
            let n: u32 = s
                .parse()
                .map_err(|_| SrnParseError::InvalidVersion(s.to_string()))?;
            return Ok(Version::Record(n));
        }
        Err(SrnParseError::InvalidVersion(s.to_string()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Semver(sv) => write!(f, "{sv}"),
            Version::Record(n) => write!(f, "{n}"),
        }
    }
}

/// A validated `MAJOR.MINOR.PATCH[-pre][+build]` version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Semver(String);

impl Semver {
    /// Parse a strict SemVer string (lowercased, no leading zeros in the
    /// numeric fields).
    pub fn parse(s: &str) -> Result<Self, SrnParseError> {
        let lowered = s.trim().to_ascii_lowercase();
        if is_semver(&lowered) {
            Ok(Semver(lowered))
        } else {
            Err(SrnParseError::InvalidVersion(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Semver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_semver(s: &str) -> bool {
    // Split off +build, then -pre, then check X.Y.Z.
    let (core_and_pre, build) = match s.split_once('+') {
        Some((a, b)) => (a, Some(b)),
        None => (s, None),
    };
    let (core, pre) = match core_and_pre.split_once('-') {
        Some((a, b)) => (a, Some(b)),
        None => (core_and_pre, None),
    };

    let mut fields = core.split('.');
    let ok_core = (0..3).all(|_| fields.next().is_some_and(is_numeric_field));
    if !ok_core || fields.next().is_some() {
        return false;
    }

    let ident_ok = |part: &str| {
        !part.is_empty()
            && part
                .split('.')
                .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
    };

    pre.map_or(true, ident_ok) && build.map_or(true, ident_ok)
}

fn is_numeric_field(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'))
}

// ---------------------------------------------------------------------------
// SrnParseError
// ---------------------------------------------------------------------------

/// Returned when an SRN string cannot be parsed or violates the version rules
/// of its resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrnParseError {
    /// Input does not start with `urn:osa:`.
    NotAnOsaUrn,
    /// Wrong number of `:`-separated segments.
    Malformed,
    /// Domain segment is not a DNS name.
    InvalidDomain(String),
    /// Local id is not `[a-z0-9-]{3,64}`.
    InvalidLocalId(String),
    /// Unknown resource type tag.
    UnknownType(String),
    /// Version segment is neither SemVer nor a positive integer.
    InvalidVersion(String),
    /// Resource type requires a version but none was present.
    VersionRequired(ResourceType),
    /// Resource type forbids a version but one was present.
    VersionForbidden(ResourceType),
    /// Parsed type does not match the expected typed wrapper.
    WrongType {
        expected: ResourceType,
        found: ResourceType,
    },
}

impl fmt::Display for SrnParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SrnParseError::NotAnOsaUrn => write!(f, "not an osa SRN (expected urn:osa:...)"),
            SrnParseError::Malformed => {
                write!(f, "malformed SRN (expected urn:osa:{{domain}}:{{type}}:{{id}}[@version])")
            }
            SrnParseError::InvalidDomain(d) => write!(f, "invalid SRN domain: {d:?}"),
            SrnParseError::InvalidLocalId(id) => {
                write!(f, "invalid SRN local id (3-64 chars, [a-z0-9-]): {id:?}")
            }
            SrnParseError::UnknownType(t) => write!(f, "unknown SRN resource type: {t:?}"),
            SrnParseError::InvalidVersion(v) => write!(f, "invalid SRN version: {v:?}"),
            SrnParseError::VersionRequired(t) => write!(f, "SRN type '{t}' requires a version"),
            SrnParseError::VersionForbidden(t) => {
                write!(f, "SRN type '{t}' must not carry a version")
            }
            SrnParseError::WrongType { expected, found } => {
                write!(f, "expected SRN of type '{expected}', found '{found}'")
            }
        }
    }
}

impl std::error::Error for SrnParseError {}

// ---------------------------------------------------------------------------
// Srn
// ---------------------------------------------------------------------------

/// A parsed SRN. Immutable; construct via [`Srn::parse`] or the typed
/// wrapper constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Srn {
    domain: String,
    resource_type: ResourceType,
    local_id: String,
    version: Option<Version>,
}

impl Srn {
    /// Parse a canonical SRN string. Input is trimmed and lowercased first.
    pub fn parse(input: &str) -> Result<Self, SrnParseError> {
        let s = input.trim().to_ascii_lowercase();
        let rest = s.strip_prefix("urn:osa:").ok_or(SrnParseError::NotAnOsaUrn)?;

        let mut segments = rest.splitn(3, ':');
        let (domain, type_str, tail) = match (segments.next(), segments.next(), segments.next()) {
            (Some(d), Some(t), Some(tail)) if !tail.contains(':') => (d, t, tail),
            _ => return Err(SrnParseError::Malformed),
        };

        if !is_dns_name(domain) {
            return Err(SrnParseError::InvalidDomain(domain.to_string()));
        }
        let resource_type = ResourceType::parse(type_str)?;

        let (local_id, version) = match tail.split_once('@') {
            Some((id, ver)) => (id, Some(Version::parse(ver)?)),
            None => (tail, None),
        };
        if !is_local_id(local_id) {
            return Err(SrnParseError::InvalidLocalId(local_id.to_string()));
        }

        let srn = Srn {
            domain: domain.to_string(),
            resource_type,
            local_id: local_id.to_string(),
            version,
        };
        srn.check_version_rule()?;
        Ok(srn)
    }

    /// Build an SRN from already-validated parts.
    ///
    /// # Errors
    /// Fails when any part violates the grammar or the type's version rule.
    pub fn new(
        domain: &str,
        resource_type: ResourceType,
        local_id: &str,
        version: Option<Version>,
    ) -> Result<Self, SrnParseError> {
        let domain = domain.trim().to_ascii_lowercase();
        let local_id = local_id.trim().to_ascii_lowercase();
        if !is_dns_name(&domain) {
            return Err(SrnParseError::InvalidDomain(domain));
        }
        if !is_local_id(&local_id) {
            return Err(SrnParseError::InvalidLocalId(local_id));
        }
        let srn = Srn {
            domain,
            resource_type,
            local_id,
            version,
        };
        srn.check_version_rule()?;
        Ok(srn)
    }

    fn check_version_rule(&self) -> Result<(), SrnParseError> {
        use ResourceType::*;
        match (self.resource_type, &self.version) {
            (Record, Some(Version::Record(_))) => Ok(()),
            (Record, _) => Err(SrnParseError::VersionRequired(Record)),
            (Schema | Convention | Ontology, Some(Version::Semver(_))) => Ok(()),
            (t @ (Schema | Convention | Ontology), Some(_)) => {
                Err(SrnParseError::InvalidVersion(format!("{t} requires semver")))
            }
            (t @ (Schema | Convention | Ontology), None) => Err(SrnParseError::VersionRequired(t)),
            (Deposition | Event | ValidationRun | Snapshot, None) => Ok(()),
            (t, Some(_)) => Err(SrnParseError::VersionForbidden(t)),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Canonical string form.
    pub fn render(&self) -> String {
        match &self.version {
            Some(v) => format!(
                "urn:osa:{}:{}:{}@{}",
                self.domain, self.resource_type, self.local_id, v
            ),
            None => format!("urn:osa:{}:{}:{}", self.domain, self.resource_type, self.local_id),
        }
    }
}

impl fmt::Display for Srn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for Srn {
    type Err = SrnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Srn::parse(s)
    }
}

impl Serialize for Srn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for Srn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Srn::parse(&s).map_err(de::Error::custom)
    }
}

fn is_dns_name(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

fn is_local_id(s: &str) -> bool {
    (3..=64).contains(&s.len())
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

// ---------------------------------------------------------------------------
// Typed wrappers
// ---------------------------------------------------------------------------

macro_rules! typed_srn {
    ($(#[$doc:meta])* $name:ident, $rtype:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(Srn);

        impl $name {
            /// Parse a canonical SRN string, enforcing the resource type.
            pub fn parse(input: &str) -> Result<Self, SrnParseError> {
                let srn = Srn::parse(input)?;
                Self::from_srn(srn)
            }

            /// Wrap an already-parsed SRN, enforcing the resource type.
            pub fn from_srn(srn: Srn) -> Result<Self, SrnParseError> {
                if srn.resource_type() != $rtype {
                    return Err(SrnParseError::WrongType {
                        expected: $rtype,
                        found: srn.resource_type(),
                    });
                }
                Ok(Self(srn))
            }

            pub fn as_srn(&self) -> &Srn {
                &self.0
            }

            pub fn domain(&self) -> &str {
                self.0.domain()
            }

            pub fn local_id(&self) -> &str {
                self.0.local_id()
            }

            pub fn render(&self) -> String {
                self.0.render()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = SrnParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let srn = Srn::deserialize(deserializer)?;
                Self::from_srn(srn).map_err(de::Error::custom)
            }
        }
    };
}

typed_srn!(
    /// SRN of a published record (`rec`, integer version).
    RecordSrn,
    ResourceType::Record
);
typed_srn!(
    /// SRN of a deposition (`dep`, unversioned).
    DepositionSrn,
    ResourceType::Deposition
);
typed_srn!(
    /// SRN of a convention (`conv`, SemVer).
    ConventionSrn,
    ResourceType::Convention
);
typed_srn!(
    /// SRN of a metadata schema (`schema`, SemVer).
    SchemaSrn,
    ResourceType::Schema
);
typed_srn!(
    /// SRN of an ontology (`onto`, SemVer).
    OntologySrn,
    ResourceType::Ontology
);
typed_srn!(
    /// SRN of a domain event (`evt`, unversioned).
    EventSrn,
    ResourceType::Event
);
typed_srn!(
    /// SRN of a validation run (`val`, unversioned).
    ValidationRunSrn,
    ResourceType::ValidationRun
);
typed_srn!(
    /// SRN of a snapshot (`snap`, unversioned).
    SnapshotSrn,
    ResourceType::Snapshot
);

impl RecordSrn {
    /// Build a record SRN with the given integer version (must be >= 1).
    pub fn new(domain: &str, local_id: &str, version: u32) -> Result<Self, SrnParseError> {
        if version == 0 {
            return Err(SrnParseError::InvalidVersion("0".to_string()));
        }
        Srn::new(domain, ResourceType::Record, local_id, Some(Version::Record(version)))
            .map(RecordSrn)
    }

    pub fn record_version(&self) -> u32 {
        match self.0.version() {
            Some(Version::Record(n)) => *n,
            // Unreachable by construction: the version rule is checked on parse.
            _ => 1,
        }
    }
}

impl DepositionSrn {
    pub fn new(domain: &str, local_id: &str) -> Result<Self, SrnParseError> {
        Srn::new(domain, ResourceType::Deposition, local_id, None).map(DepositionSrn)
    }
}

impl ConventionSrn {
    pub fn new(domain: &str, local_id: &str, version: Semver) -> Result<Self, SrnParseError> {
        Srn::new(domain, ResourceType::Convention, local_id, Some(Version::Semver(version)))
            .map(ConventionSrn)
    }
}

impl SchemaSrn {
    pub fn new(domain: &str, local_id: &str, version: Semver) -> Result<Self, SrnParseError> {
        Srn::new(domain, ResourceType::Schema, local_id, Some(Version::Semver(version)))
            .map(SchemaSrn)
    }
}

impl ValidationRunSrn {
    pub fn new(domain: &str, local_id: &str) -> Result<Self, SrnParseError> {
        Srn::new(domain, ResourceType::ValidationRun, local_id, None).map(ValidationRunSrn)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
