//! Error types for the migration run
//!
//! Member-scoped problems become [`MemberFailure`] records and the run goes
//! on without that member. Everything in [`MigrationError`] aborts the run.

use std::path::PathBuf;

use renum_ident::{FatalConfigurationError, Identifier, MapError};
use renum_topology::{SigningError, TopologyError};
use serde::Serialize;

use crate::config::ConfigError;
use crate::relational::DatabaseError;
use crate::state_machine::{MigrationPhase, PhaseError};

/// Directory layout violates the exactly-one-match rules
#[derive(Debug, thiserror::Error)]
pub enum StructuralError {
    /// Path is not a directory
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    /// `ISD`/`AS` prefix followed by something other than a number
    #[error("{path}: expected {expected}<number>")]
    BadName {
        /// Offending entry
        path: PathBuf,
        /// Expected prefix
        expected: &'static str,
    },

    /// Not exactly one candidate file or directory
    #[error("expected exactly one {expected} in {dir}, found {found}")]
    NotUnique {
        /// Directory searched
        dir: PathBuf,
        /// Description of the candidate
        expected: String,
        /// Number found
        found: usize,
    },

    /// Directory listing failed
    #[error("cannot list {path}: {source}")]
    Listing {
        /// Directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort the whole run
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Layout problem
    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Plan does not fit the data
    #[error("fatal configuration error: {0}")]
    Fatal(#[from] FatalConfigurationError),

    /// Operation out of order
    #[error("{0}")]
    Phase(#[from] PhaseError),

    /// Anchor set handed to the wrong realm
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database adapter failure
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Writing results failed
    #[error("cannot write {path}: {source}")]
    Persist {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Rendering results failed
    #[error("cannot render {path}: {source}")]
    Render {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: TopologyError,
    },

    /// Progress output failed
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

impl MigrationError {
    /// Escalate a member error that must not stay member-scoped
    ///
    /// Returns `Ok(error)` for errors that only exclude the member.
    ///
    /// # Errors
    /// Returns the run-level error for fatal and structural cases.
    pub fn escalate(error: TopologyError) -> Result<TopologyError, Self> {
        match error {
            TopologyError::Map(MapError::Fatal(fatal)) => Err(Self::Fatal(fatal)),
            TopologyError::MissingFile {
                dir,
                expected,
                found,
            } => Err(StructuralError::NotUnique {
                dir,
                expected,
                found,
            }
            .into()),
            other => Ok(other),
        }
    }
}

/// Coarse class of a member failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Malformed identifier or name
    Parse,
    /// Malformed file syntax
    Syntax,
    /// Missing or ill-typed fields, identity mismatch, already remapped
    Schema,
    /// Key material or signature problem
    Signing,
    /// Identifier cannot be mapped
    Mapping,
    /// Reference to a member absent from the tree
    Unresolved,
    /// Read or write failure
    Io,
}

impl FailureKind {
    /// Classify a topology error
    #[must_use]
    pub fn of(error: &TopologyError) -> Self {
        match error {
            TopologyError::Parse(_) => Self::Parse,
            TopologyError::Syntax { .. } | TopologyError::Serialize(_) => Self::Syntax,
            TopologyError::Schema(_) => Self::Schema,
            TopologyError::Signing(_) => Self::Signing,
            TopologyError::Map(MapError::Unresolved(_)) => Self::Unresolved,
            TopologyError::Map(_) => Self::Mapping,
            TopologyError::Io { .. } | TopologyError::MissingFile { .. } => Self::Io,
        }
    }
}

/// A member excluded from the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberFailure {
    /// Legacy identifier of the member
    pub member: String,
    /// Phase in which it failed
    pub phase: MigrationPhase,
    /// Class of the failure
    pub kind: FailureKind,
    /// Error message
    pub reason: String,
}

impl MemberFailure {
    /// Record `error` for `member` and log it
    #[must_use]
    pub fn record(member: Identifier, phase: MigrationPhase, error: &TopologyError) -> Self {
        let failure = Self {
            member: member.legacy(),
            phase,
            kind: FailureKind::of(error),
            reason: error.to_string(),
        };
        tracing::error!(
            member = %failure.member,
            phase = %phase,
            kind = ?failure.kind,
            "{}",
            failure.reason
        );
        failure
    }
}
