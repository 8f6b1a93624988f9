//! Migration phases
//!
//! Pass 2 needs the complete old→new table from pass 1, and members can only
//! be re-signed once their realm's anchors are. The phase table rejects any
//! operation run out of that order.

use std::fmt::{self, Display};

use serde::Serialize;

/// Stage a realm or a whole run has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MigrationPhase {
    /// Tree loaded, nothing computed
    Discovered,
    /// Every member has its new identifier
    IdentifiersMapped,
    /// Descriptors rewritten against the global table
    ReferencesResolved,
    /// Trust anchor chains re-signed
    AnchorsReissued,
    /// Member chains re-signed and results persisted
    Complete,
}

impl Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::IdentifiersMapped => "identifiers mapped",
            Self::ReferencesResolved => "references resolved",
            Self::AnchorsReissued => "anchors reissued",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Operation requested in the wrong phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal phase transition: {from} -> {to}")]
pub struct PhaseError {
    /// Current phase
    pub from: MigrationPhase,
    /// Requested phase
    pub to: MigrationPhase,
}

/// Validate a phase transition
///
/// # Errors
/// Returns [`PhaseError`] unless `to` directly follows `from`.
pub fn validate_transition(from: MigrationPhase, to: MigrationPhase) -> Result<(), PhaseError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PhaseError { from, to })
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: MigrationPhase) -> Vec<MigrationPhase> {
    use MigrationPhase::*;
    match from {
        Discovered => vec![IdentifiersMapped],
        IdentifiersMapped => vec![ReferencesResolved],
        ReferencesResolved => vec![AnchorsReissued],
        AnchorsReissued => vec![Complete],
        Complete => vec![],
    }
}
