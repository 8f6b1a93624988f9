//! Renum migration
//!
//! Moves a generated topology tree, and optionally a coordinator database,
//! from the legacy numbering plan to the new one.
//!
//! - [`MigrationOrchestrator`]: phased whole-tree run
//! - [`RealmDirectory`]: one realm on disk and the two-pass rewrite
//! - [`CertificateReissuer`]: anchor-first certificate re-signing
//! - [`RelationalUpdater`]: SQL updates driven by a [`SchemaMapping`]

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod reissue;
pub mod relational;
pub mod state_machine;

pub use config::{ConfigError, DatabaseConfig, MigrationConfig};
pub use directory::{discover_tree, Member, RealmDirectory};
pub use error::{FailureKind, MemberFailure, MigrationError, StructuralError};
pub use orchestrator::{IdentifierChange, MigrationOrchestrator, MigrationReport, PlannedWrite, RunMode};
pub use reissue::{AnchorSet, CertificateReissuer, IssuingAnchor};
#[cfg(any(test, feature = "test-utils"))]
pub use relational::memory::MemoryDatabase;
pub use relational::{Database, DatabaseError, RelationalUpdater, Row, SchemaMapping, SqlValue};
pub use state_machine::{MigrationPhase, PhaseError};
