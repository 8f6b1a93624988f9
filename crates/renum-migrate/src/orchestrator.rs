//! Whole-tree migration
//!
//! Discover → map identifiers of every realm → resolve references against
//! the global table → reissue anchors of every realm → reissue members and
//! persist. Persisting renders every file the same way in both run modes;
//! dry-run prints what would be written instead of writing it.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use renum_ident::{Identifier, IdentifierMapper, IdentifierTable, MapCache, MapError};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::MigrationConfig;
use crate::directory::{descriptor_path, discover_tree, RealmDirectory};
use crate::error::{MemberFailure, MigrationError};
use crate::reissue::{AnchorSet, CertificateReissuer};
use crate::state_machine::{validate_transition, MigrationPhase};

/// Whether results are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunMode {
    /// Write every file
    Apply,
    /// Print planned writes only
    DryRun,
}

impl RunMode {
    /// Mode for a dry-run flag
    #[must_use]
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            Self::DryRun
        } else {
            Self::Apply
        }
    }
}

/// One file the run writes, or would write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedWrite {
    /// Target file
    pub path: PathBuf,
    /// SHA-256 of the contents, hex
    pub digest: String,
    #[serde(skip)]
    contents: String,
}

impl PlannedWrite {
    fn new(path: PathBuf, contents: String) -> Self {
        let digest = hex::encode(Sha256::digest(contents.as_bytes()));
        Self {
            path,
            digest,
            contents,
        }
    }

    /// Rendered file contents
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.contents
    }
}

/// Old and new identifier of a migrated member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierChange {
    /// Legacy form
    pub old: String,
    /// Standard form
    pub new: String,
}

/// Outcome of a run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Run mode
    pub mode: RunMode,
    /// Identifier changes of migrated members, by legacy identifier
    pub identifiers: Vec<IdentifierChange>,
    /// Files written or planned
    pub writes: Vec<PlannedWrite>,
    /// Members excluded from the run
    pub failures: Vec<MemberFailure>,
}

impl MigrationReport {
    /// Whether any member was excluded
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Short human readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        let verb = match self.mode {
            RunMode::Apply => "wrote",
            RunMode::DryRun => "would write",
        };
        format!(
            "{} identifiers mapped, {verb} {} files, {} members excluded",
            self.identifiers.len(),
            self.writes.len(),
            self.failures.len()
        )
    }
}

/// Drives a migration of a whole generated tree
#[derive(Debug)]
pub struct MigrationOrchestrator {
    mapper: IdentifierMapper,
    cache: MapCache,
    reissuer: CertificateReissuer,
    phase: MigrationPhase,
    realms: Vec<RealmDirectory>,
    table: IdentifierTable,
    anchors: Vec<AnchorSet>,
}

impl MigrationOrchestrator {
    /// Discover the tree under `root`
    ///
    /// # Errors
    /// Fatal plan errors and [`crate::StructuralError`]s.
    pub fn discover(config: &MigrationConfig, root: &Path) -> Result<Self, MigrationError> {
        let mapper = IdentifierMapper::new(config.plan.clone())?;
        let realms = discover_tree(root)?;
        tracing::info!(root = %root.display(), realms = realms.len(), "discovered tree");
        Ok(Self {
            mapper,
            cache: MapCache::new(),
            reissuer: CertificateReissuer::new(),
            phase: MigrationPhase::Discovered,
            realms,
            table: IdentifierTable::new(),
            anchors: Vec::new(),
        })
    }

    /// Current phase
    #[inline]
    #[must_use]
    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Realms of the tree
    #[inline]
    #[must_use]
    pub fn realms(&self) -> &[RealmDirectory] {
        &self.realms
    }

    /// Global old→new table, filled by [`MigrationOrchestrator::map_identifiers`]
    #[inline]
    #[must_use]
    pub fn table(&self) -> &IdentifierTable {
        &self.table
    }

    fn advance(&mut self, to: MigrationPhase) -> Result<(), MigrationError> {
        validate_transition(self.phase, to)?;
        self.phase = to;
        tracing::debug!(phase = %to, "phase reached");
        Ok(())
    }

    /// Pass 1 over every realm
    ///
    /// # Errors
    /// Phase and fatal configuration errors.
    pub fn map_identifiers(&mut self) -> Result<(), MigrationError> {
        self.advance(MigrationPhase::IdentifiersMapped)?;
        for realm in &mut self.realms {
            let table = realm.map_identifiers(&self.mapper, &mut self.cache)?;
            self.table.extend(&table)?;
        }
        let stats = self.cache.stats();
        tracing::info!(
            mapped = self.table.len(),
            hits = stats.hits,
            misses = stats.misses,
            "mapped identifiers"
        );
        Ok(())
    }

    /// Pass 2 over every realm, against the global table
    ///
    /// # Errors
    /// Phase and fatal configuration errors.
    pub fn resolve_references(&mut self) -> Result<(), MigrationError> {
        self.advance(MigrationPhase::ReferencesResolved)?;
        for realm in &mut self.realms {
            realm.resolve_references(&self.table)?;
        }
        Ok(())
    }

    /// Re-sign the trust anchors of every realm
    ///
    /// # Errors
    /// Phase errors.
    pub fn reissue_anchors(&mut self) -> Result<(), MigrationError> {
        self.advance(MigrationPhase::AnchorsReissued)?;
        self.anchors = self
            .realms
            .iter_mut()
            .map(|realm| self.reissuer.reissue_trust_anchors(realm))
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Re-sign members of every realm, then write or print the results
    ///
    /// # Errors
    /// Phase, rendering, write and output errors.
    pub fn complete(
        &mut self,
        mode: RunMode,
        out: &mut dyn Write,
    ) -> Result<MigrationReport, MigrationError> {
        self.advance(MigrationPhase::Complete)?;
        for (realm, anchors) in self.realms.iter_mut().zip(&self.anchors) {
            self.reissuer.reissue_members(realm, anchors)?;
        }
        self.exclude_dangling();

        let mut migrated: Vec<_> = self
            .realms
            .iter()
            .flat_map(|realm| realm.members().iter())
            .map(|(new, member)| (member.old_id(), *new))
            .collect();
        migrated.sort_unstable();
        let identifiers: Vec<IdentifierChange> = migrated
            .into_iter()
            .map(|(old, new)| IdentifierChange {
                old: old.legacy(),
                new: new.standard(),
            })
            .collect();

        let writes = self.render()?;
        match mode {
            RunMode::Apply => {
                for write in &writes {
                    fs::write(&write.path, write.contents()).map_err(|source| {
                        MigrationError::Persist {
                            path: write.path.clone(),
                            source,
                        }
                    })?;
                }
                for change in &identifiers {
                    tracing::info!(old = %change.old, new = %change.new, "renumbered");
                }
            }
            RunMode::DryRun => {
                for change in &identifiers {
                    writeln!(out, "{} -> {}", change.old, change.new)?;
                }
                for write in &writes {
                    writeln!(out, "would write {} sha256:{}", write.path.display(), write.digest)?;
                }
            }
        }

        let failures = self
            .realms
            .iter()
            .flat_map(|realm| realm.failures().iter().cloned())
            .collect();
        let report = MigrationReport {
            mode,
            identifiers,
            writes,
            failures,
        };
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    /// Exclude members that refer to excluded ones, until none is left
    ///
    /// Descriptors were rewritten against the full table, so a member
    /// excluded after pass 2 would otherwise still be named by its
    /// neighbours and by the certificates it issued.
    fn exclude_dangling(&mut self) {
        loop {
            let present: HashSet<Identifier> = self
                .realms
                .iter()
                .flat_map(|realm| realm.members().keys().copied())
                .collect();

            let mut excluded = 0usize;
            for realm in &mut self.realms {
                for (key, missing) in realm.dangling(&present) {
                    let target = self.table.old_of(&missing).unwrap_or(missing);
                    realm.exclude(&key, &MapError::Unresolved(target).into());
                    excluded += 1;
                }
            }
            if excluded == 0 {
                break;
            }
            tracing::debug!(excluded, "excluded members referring to excluded members");
        }
    }

    fn render(&self) -> Result<Vec<PlannedWrite>, MigrationError> {
        let mut writes = Vec::new();
        for member in self.realms.iter().flat_map(|realm| realm.members().values()) {
            let path = descriptor_path(member);
            let text = member.descriptor().render().map_err(|source| MigrationError::Render {
                path: path.clone(),
                source,
            })?;
            writes.push(PlannedWrite::new(path, text));

            let credentials = member.credentials();
            let path = credentials.chain_path().to_path_buf();
            let text = credentials.chain().render().map_err(|source| MigrationError::Render {
                path: path.clone(),
                source,
            })?;
            writes.push(PlannedWrite::new(path, text));
        }
        Ok(writes)
    }

    /// Run every phase
    ///
    /// # Errors
    /// Any run-level error.
    pub fn run(mut self, mode: RunMode, out: &mut dyn Write) -> Result<MigrationReport, MigrationError> {
        self.map_identifiers()?;
        self.resolve_references()?;
        self.reissue_anchors()?;
        self.complete(mode, out)
    }
}
