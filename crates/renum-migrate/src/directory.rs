//! Generated tree discovery and the two-pass identifier rewrite
//!
//! Layout: `<root>/ISD<realm>/AS<member>/<element>/` where the element
//! directory holds the descriptor, `keys/` and `certs/`.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use renum_ident::{Identifier, IdentifierMapper, IdentifierTable, MapCache, MapError};
use renum_topology::{
    CredentialStore, DescriptorFormat, SchemaError, TopologyDescriptor, TopologyError,
};

use crate::error::{MemberFailure, MigrationError, StructuralError};
use crate::state_machine::{validate_transition, MigrationPhase};

/// Prefix of realm directories
pub const REALM_PREFIX: &str = "ISD";
/// Prefix of member directories
pub const MEMBER_PREFIX: &str = "AS";

/// One member of a realm
#[derive(Debug, Clone)]
pub struct Member {
    old: Identifier,
    new: Option<Identifier>,
    element_dir: PathBuf,
    descriptor: TopologyDescriptor,
    credentials: CredentialStore,
}

impl Member {
    /// Load the member stored in `member_dir`, expected to be `old`
    ///
    /// # Errors
    /// [`TopologyError::MissingFile`] for layout problems (escalated by the
    /// caller); any other error excludes the member.
    pub fn load(member_dir: &Path, old: Identifier) -> Result<Self, TopologyError> {
        let element_dir = element_dir(member_dir)?;
        let descriptor = TopologyDescriptor::load(&element_dir)?;
        let credentials = CredentialStore::load(&element_dir)?;

        if descriptor.is_remapped() {
            return Err(SchemaError::AlreadyRemapped(descriptor.identifier()).into());
        }
        if descriptor.identifier() != old {
            return Err(SchemaError::IdentityMismatch {
                expected: old,
                found: descriptor.identifier(),
            }
            .into());
        }

        Ok(Self {
            old,
            new: None,
            element_dir,
            descriptor,
            credentials,
        })
    }

    /// Legacy identifier
    #[inline]
    #[must_use]
    pub fn old_id(&self) -> Identifier {
        self.old
    }

    /// New identifier, once pass 1 ran
    #[inline]
    #[must_use]
    pub fn new_id(&self) -> Option<Identifier> {
        self.new
    }

    /// Whether the member is a trust anchor
    #[inline]
    #[must_use]
    pub fn is_trust_anchor(&self) -> bool {
        self.descriptor.is_trust_anchor()
    }

    /// Current descriptor
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &TopologyDescriptor {
        &self.descriptor
    }

    /// Current credentials
    #[inline]
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Directory holding descriptor, keys and certificates
    #[inline]
    #[must_use]
    pub fn element_dir(&self) -> &Path {
        &self.element_dir
    }

    pub(crate) fn set_credentials(&mut self, credentials: CredentialStore) {
        self.credentials = credentials;
    }
}

/// Find the unique child of `member_dir` that holds a descriptor
fn element_dir(member_dir: &Path) -> Result<PathBuf, TopologyError> {
    let entries = fs::read_dir(member_dir).map_err(|e| TopologyError::io_error(member_dir, e))?;
    let mut candidates = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| TopologyError::io_error(member_dir, e))?.path();
        let has_descriptor = DescriptorFormat::ALL
            .iter()
            .any(|format| path.join(format.file_name()).is_file());
        if path.is_dir() && has_descriptor {
            candidates.push(path);
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        found => Err(TopologyError::MissingFile {
            dir: member_dir.to_path_buf(),
            expected: "element directory with a topology descriptor".into(),
            found,
        }),
    }
}

/// All members of one realm
#[derive(Debug, Clone)]
pub struct RealmDirectory {
    realm: u16,
    path: PathBuf,
    phase: MigrationPhase,
    members: BTreeMap<Identifier, Member>,
    failures: Vec<MemberFailure>,
}

impl RealmDirectory {
    /// Load every member under `realm_path`
    ///
    /// # Errors
    /// [`StructuralError`] for layout violations. Content errors only
    /// exclude the member and are kept in [`RealmDirectory::failures`].
    pub fn discover(realm_path: &Path) -> Result<Self, MigrationError> {
        let realm: u16 = numbered(realm_path, REALM_PREFIX)?;
        let mut directory = Self {
            realm,
            path: realm_path.to_path_buf(),
            phase: MigrationPhase::Discovered,
            members: BTreeMap::new(),
            failures: Vec::new(),
        };

        for member_dir in prefixed_children(realm_path, MEMBER_PREFIX)? {
            let member: u64 = numbered(&member_dir, MEMBER_PREFIX)?;
            let old = Identifier::new(realm, member);
            match Member::load(&member_dir, old) {
                Ok(loaded) => {
                    directory.members.insert(old, loaded);
                }
                Err(e) => {
                    let e = MigrationError::escalate(e)?;
                    directory.fail(old, &e);
                }
            }
        }

        tracing::info!(
            realm,
            members = directory.members.len(),
            excluded = directory.failures.len(),
            "discovered realm"
        );
        Ok(directory)
    }

    /// Legacy realm number
    #[inline]
    #[must_use]
    pub fn realm(&self) -> u16 {
        self.realm
    }

    /// Directory of the realm
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Phase the realm has reached
    #[inline]
    #[must_use]
    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Members still taking part, keyed by their current identifier
    #[inline]
    #[must_use]
    pub fn members(&self) -> &BTreeMap<Identifier, Member> {
        &self.members
    }

    /// Members excluded so far
    #[inline]
    #[must_use]
    pub fn failures(&self) -> &[MemberFailure] {
        &self.failures
    }

    pub(crate) fn members_mut(&mut self) -> impl Iterator<Item = &mut Member> {
        self.members.values_mut()
    }

    pub(crate) fn advance(&mut self, to: MigrationPhase) -> Result<(), MigrationError> {
        validate_transition(self.phase, to)?;
        self.phase = to;
        Ok(())
    }

    pub(crate) fn fail(&mut self, old: Identifier, error: &TopologyError) {
        self.failures.push(MemberFailure::record(old, self.phase, error));
    }

    pub(crate) fn exclude(&mut self, key: &Identifier, error: &TopologyError) {
        if let Some(member) = self.members.remove(key) {
            self.fail(member.old, error);
        }
    }

    /// Members referring to an identifier outside `present`
    ///
    /// Checks every neighbour and, for reissued non-anchors, the certificate
    /// issuer. Returns each such member's key with the first missing
    /// identifier.
    pub(crate) fn dangling(&self, present: &HashSet<Identifier>) -> Vec<(Identifier, Identifier)> {
        self.members
            .iter()
            .filter_map(|(key, member)| {
                let issuer = if member.is_trust_anchor() {
                    None
                } else {
                    member.credentials().chain().member.issuer.parse::<Identifier>().ok()
                };
                member
                    .descriptor()
                    .neighbors()
                    .chain(issuer)
                    .find(|id| !present.contains(id))
                    .map(|missing| (*key, missing))
            })
            .collect()
    }

    /// Pass 1: compute every member's new identifier
    ///
    /// Re-keys the member index by new identifier and returns this realm's
    /// old→new table.
    ///
    /// # Errors
    /// Fatal configuration or phase errors. Members whose number is not a
    /// valid legacy encoding are excluded.
    pub fn map_identifiers(
        &mut self,
        mapper: &IdentifierMapper,
        cache: &mut MapCache,
    ) -> Result<IdentifierTable, MigrationError> {
        self.advance(MigrationPhase::IdentifiersMapped)?;
        mapper.map_realm(self.realm)?;

        let mut table = IdentifierTable::new();
        let mut rekeyed = BTreeMap::new();
        for (old, mut member) in std::mem::take(&mut self.members) {
            match cache.get_or_map(mapper, old) {
                Ok(new) => {
                    table.insert(old, new)?;
                    member.new = Some(new);
                    rekeyed.insert(new, member);
                }
                Err(MapError::Fatal(fatal)) => return Err(fatal.into()),
                Err(e) => self.fail(old, &e.into()),
            }
        }
        self.members = rekeyed;

        tracing::debug!(realm = self.realm, mapped = table.len(), "mapped identifiers");
        Ok(table)
    }

    /// Pass 2: rewrite every descriptor against `table`
    ///
    /// `table` should hold the mappings of every realm in the run so that
    /// cross-realm links resolve.
    ///
    /// # Errors
    /// Fatal configuration or phase errors. Members with unresolvable
    /// references are excluded.
    pub fn resolve_references(&mut self, table: &IdentifierTable) -> Result<(), MigrationError> {
        self.advance(MigrationPhase::ReferencesResolved)?;

        let mut failed = Vec::new();
        for (key, member) in &mut self.members {
            let mut resolver = table;
            match member.descriptor.remap(&mut resolver) {
                Ok(remapped) => member.descriptor = remapped,
                Err(e) => failed.push((*key, MigrationError::escalate(e)?)),
            }
        }
        for (key, error) in failed {
            self.exclude(&key, &error);
        }
        Ok(())
    }

    /// Both passes for a realm migrated on its own
    ///
    /// # Errors
    /// See [`RealmDirectory::map_identifiers`] and
    /// [`RealmDirectory::resolve_references`].
    pub fn remap(
        &mut self,
        mapper: &IdentifierMapper,
        cache: &mut MapCache,
    ) -> Result<IdentifierTable, MigrationError> {
        let table = self.map_identifiers(mapper, cache)?;
        self.resolve_references(&table)?;
        Ok(table)
    }
}

/// Discover every realm under `root`
///
/// # Errors
/// Returns the first [`StructuralError`].
pub fn discover_tree(root: &Path) -> Result<Vec<RealmDirectory>, MigrationError> {
    if !root.is_dir() {
        return Err(StructuralError::NotADirectory(root.to_path_buf()).into());
    }
    prefixed_children(root, REALM_PREFIX)?
        .iter()
        .map(|path| RealmDirectory::discover(path))
        .collect()
}

/// Child directories of `dir` whose name starts with `prefix`, sorted
fn prefixed_children(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, StructuralError> {
    let listing = |source| StructuralError::Listing {
        path: dir.to_path_buf(),
        source,
    };
    let mut children = Vec::new();
    for entry in fs::read_dir(dir).map_err(listing)? {
        let path = entry.map_err(listing)?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix));
        if matches && path.is_dir() {
            children.push(path);
        }
    }
    children.sort();
    Ok(children)
}

fn numbered<T: std::str::FromStr>(path: &Path, prefix: &'static str) -> Result<T, StructuralError> {
    let bad = || StructuralError::BadName {
        path: path.to_path_buf(),
        expected: prefix,
    };
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(bad)?;
    let digits = name.strip_prefix(prefix).ok_or_else(bad)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    digits.parse().map_err(|_| bad())
}

/// Path of the descriptor a member would be saved to
pub(crate) fn descriptor_path(member: &Member) -> PathBuf {
    member.descriptor().path().map_or_else(
        || member.element_dir().join(member.descriptor().format().file_name()),
        Path::to_path_buf,
    )
}
