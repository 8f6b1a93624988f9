//! Certificate reissue
//!
//! Trust anchors are re-signed first, as self-issued certificates under their
//! new identity. Members are then re-signed by their realm's issuing anchor
//! and carry a copy of that anchor's new certificate. [`AnchorSet`] can only
//! come out of [`CertificateReissuer::reissue_trust_anchors`], so members
//! cannot be handled before their anchors.

use ed25519_dalek::SigningKey;
use renum_ident::Identifier;
use renum_topology::{Certificate, CertificateChain, KeyRole, SigningError, TopologyError};

use crate::directory::{Member, RealmDirectory};
use crate::error::MigrationError;
use crate::state_machine::MigrationPhase;

/// Re-signed trust anchor able to issue member certificates
#[derive(Debug, Clone)]
pub struct IssuingAnchor {
    old: Identifier,
    new: Identifier,
    certificate: Certificate,
    key: SigningKey,
}

impl IssuingAnchor {
    /// Legacy identifier
    #[must_use]
    pub fn old_id(&self) -> Identifier {
        self.old
    }

    /// New identifier
    #[must_use]
    pub fn new_id(&self) -> Identifier {
        self.new
    }

    /// Re-signed self-issued certificate
    #[must_use]
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

/// Reissued trust anchors of one realm, ordered by legacy identifier
#[derive(Debug, Clone)]
pub struct AnchorSet {
    realm: u16,
    anchors: Vec<IssuingAnchor>,
}

impl AnchorSet {
    /// Legacy realm the anchors belong to
    #[must_use]
    pub fn realm(&self) -> u16 {
        self.realm
    }

    /// All anchors
    #[must_use]
    pub fn anchors(&self) -> &[IssuingAnchor] {
        &self.anchors
    }

    /// Anchor that issues member certificates: the lowest legacy identifier
    #[must_use]
    pub fn issuer(&self) -> Option<&IssuingAnchor> {
        self.anchors.first()
    }

    /// Number of anchors
    #[must_use]
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    /// Whether the realm has no usable anchor
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

/// Re-signs certificate chains under new identities
#[derive(Debug, Clone, Copy)]
pub struct CertificateReissuer {
    verify: bool,
}

impl Default for CertificateReissuer {
    fn default() -> Self {
        Self { verify: true }
    }
}

impl CertificateReissuer {
    /// Reissuer that verifies every chain it produces
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle verification of produced chains
    #[inline]
    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Re-sign every trust anchor of `realm` as self-issued
    ///
    /// Anchors lacking a usable trust anchor signing key are excluded.
    ///
    /// # Errors
    /// Phase errors if references are not resolved yet.
    pub fn reissue_trust_anchors(
        &self,
        realm: &mut RealmDirectory,
    ) -> Result<AnchorSet, MigrationError> {
        realm.advance(MigrationPhase::AnchorsReissued)?;

        let mut anchors = Vec::new();
        let mut failed = Vec::new();
        for member in realm.members_mut().filter(|m| m.is_trust_anchor()) {
            let key = current_key(member);
            match self.reissue_anchor(member) {
                Ok(anchor) => anchors.push(anchor),
                Err(e) => failed.push((key, e)),
            }
        }
        for (key, error) in failed {
            realm.exclude(&key, &error);
        }

        anchors.sort_by_key(|a| a.old);
        if anchors.len() > 1 {
            tracing::warn!(
                realm = realm.realm(),
                anchors = anchors.len(),
                issuer = %anchors[0].old,
                "realm has several trust anchors; members are issued by the lowest"
            );
        }
        tracing::info!(realm = realm.realm(), anchors = anchors.len(), "reissued trust anchors");

        Ok(AnchorSet {
            realm: realm.realm(),
            anchors,
        })
    }

    fn reissue_anchor(&self, member: &mut Member) -> Result<IssuingAnchor, TopologyError> {
        let new = renumbered(member)?;
        let key = member.credentials().signing_key(KeyRole::TrustAnchorSigning)?;
        let subject = new.standard();
        let certificate = member
            .credentials()
            .chain()
            .member
            .reissue(subject.clone(), subject, &key)?;

        let chain = CertificateChain::new(certificate.clone(), certificate.clone());
        if self.verify {
            chain.verify(&key.verifying_key())?;
        }
        member.set_credentials(member.credentials().with_chain(chain));

        Ok(IssuingAnchor {
            old: member.old_id(),
            new,
            certificate,
            key,
        })
    }

    /// Re-sign every other member of `realm` with the issuing anchor
    ///
    /// # Errors
    /// - [`SigningError::RealmMismatch`] if `anchors` belongs to another realm
    /// - phase errors if the anchors of `realm` were not reissued
    ///
    /// Members of a realm without anchors are excluded with
    /// [`SigningError::NoTrustAnchor`].
    pub fn reissue_members(
        &self,
        realm: &mut RealmDirectory,
        anchors: &AnchorSet,
    ) -> Result<(), MigrationError> {
        if anchors.realm != realm.realm() {
            return Err(SigningError::RealmMismatch {
                anchors: anchors.realm,
                realm: realm.realm(),
            }
            .into());
        }
        realm.advance(MigrationPhase::Complete)?;

        let mut failed = Vec::new();
        let mut issued = 0usize;
        for member in realm.members_mut().filter(|m| !m.is_trust_anchor()) {
            let key = current_key(member);
            let result = match anchors.issuer() {
                Some(anchor) => self.reissue_member(member, anchor),
                None => Err(SigningError::NoTrustAnchor(anchors.realm).into()),
            };
            match result {
                Ok(()) => issued += 1,
                Err(e) => failed.push((key, e)),
            }
        }
        for (key, error) in failed {
            realm.exclude(&key, &error);
        }

        tracing::info!(realm = realm.realm(), members = issued, "reissued member certificates");
        Ok(())
    }

    fn reissue_member(&self, member: &mut Member, anchor: &IssuingAnchor) -> Result<(), TopologyError> {
        let new = renumbered(member)?;
        let certificate = member.credentials().chain().member.reissue(
            new.standard(),
            anchor.new.standard(),
            &anchor.key,
        )?;

        let chain = CertificateChain::new(certificate, anchor.certificate.clone());
        if self.verify {
            chain.verify(&anchor.key.verifying_key())?;
        }
        member.set_credentials(member.credentials().with_chain(chain));
        Ok(())
    }
}

fn current_key(member: &Member) -> Identifier {
    member.new_id().unwrap_or_else(|| member.old_id())
}

fn renumbered(member: &Member) -> Result<Identifier, TopologyError> {
    member
        .new_id()
        .ok_or_else(|| renum_ident::MapError::Unresolved(member.old_id()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use renum_ident::{IdentifierMapper, MapCache, NumberingPlan};
    use renum_test_utils::{signing_key, GenTreeBuilder};

    fn resolved(tree: &renum_test_utils::GenTree, realm: u16) -> RealmDirectory {
        let mapper = IdentifierMapper::new(NumberingPlan::default()).unwrap();
        let mut directory = RealmDirectory::discover(&tree.realm_dir(realm)).unwrap();
        directory.remap(&mapper, &mut MapCache::new()).unwrap();
        directory
    }

    #[test]
    fn anchors_then_members() {
        let a = Identifier::new(1, 11);
        let b = Identifier::new(1, 12);
        let tree = GenTreeBuilder::new().anchor(1, 11).member(1, 12).link(a, b).build();
        let mut realm = resolved(&tree, 1);

        let reissuer = CertificateReissuer::new();
        let anchors = reissuer.reissue_trust_anchors(&mut realm).unwrap();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors.issuer().unwrap().new_id().standard(), "17-0:1101");

        reissuer.reissue_members(&mut realm, &anchors).unwrap();
        let anchor_key = signing_key(a, KeyRole::TrustAnchorSigning).verifying_key();
        let member = &realm.members()[&Identifier::new(17, 0x1102)];
        let chain = member.credentials().chain();
        assert_eq!(chain.member.subject, "17-0:1102");
        assert_eq!(chain.member.issuer, "17-0:1101");
        assert!(chain.verify(&anchor_key).is_ok());
    }

    #[test]
    fn members_before_anchors_rejected() {
        let tree = GenTreeBuilder::new().anchor(1, 11).member(1, 12).build();
        let mut realm = resolved(&tree, 1);
        let mut other = resolved(&tree, 1);
        let reissuer = CertificateReissuer::new();
        let anchors = reissuer.reissue_trust_anchors(&mut other).unwrap();

        // anchor set exists, but this realm never reissued its anchors
        assert!(matches!(
            reissuer.reissue_members(&mut realm, &anchors),
            Err(MigrationError::Phase(_))
        ));
    }

    #[test]
    fn anchor_set_is_realm_bound() {
        let tree = GenTreeBuilder::new().anchor(1, 11).anchor(2, 21).build();
        let mut one = resolved(&tree, 1);
        let mut two = resolved(&tree, 2);
        let reissuer = CertificateReissuer::new();
        let anchors = reissuer.reissue_trust_anchors(&mut one).unwrap();
        reissuer.reissue_trust_anchors(&mut two).unwrap();
        assert!(matches!(
            reissuer.reissue_members(&mut two, &anchors),
            Err(MigrationError::Signing(SigningError::RealmMismatch { anchors: 1, realm: 2 }))
        ));
    }

    #[test]
    fn realm_without_anchor_excludes_members() {
        let tree = GenTreeBuilder::new().member(3, 31).member(3, 32).build();
        let mut realm = resolved(&tree, 3);
        let reissuer = CertificateReissuer::new();
        let anchors = reissuer.reissue_trust_anchors(&mut realm).unwrap();
        assert!(anchors.is_empty());

        reissuer.reissue_members(&mut realm, &anchors).unwrap();
        assert!(realm.members().is_empty());
        assert_eq!(realm.failures().len(), 2);
    }

    #[test]
    fn lowest_anchor_issues() {
        let tree = GenTreeBuilder::new()
            .anchor(1, 13)
            .anchor(1, 11)
            .member(1, 12)
            .build();
        let mut realm = resolved(&tree, 1);
        let reissuer = CertificateReissuer::new();
        let anchors = reissuer.reissue_trust_anchors(&mut realm).unwrap();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors.issuer().unwrap().old_id(), Identifier::new(1, 11));
    }

    #[test]
    fn anchor_without_key_is_excluded() {
        let a = Identifier::new(1, 11);
        let tree = GenTreeBuilder::new()
            .anchor(1, 11)
            .without_key(a, KeyRole::TrustAnchorSigning)
            .build();
        let mut realm = resolved(&tree, 1);
        let anchors = CertificateReissuer::new().reissue_trust_anchors(&mut realm).unwrap();
        assert!(anchors.is_empty());
        assert_eq!(realm.failures()[0].member, "1-11");
    }
}
