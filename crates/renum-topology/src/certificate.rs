//! Certificates and two-entry certificate chains
//!
//! A chain file is a JSON object with exactly the entries `"0"` (the
//! member's own certificate) and `"1"` (a copy of its issuer's certificate).
//! Signatures are Ed25519 over the JSON encoding of every other field, in
//! field order.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SigningError, TopologyError};

/// Entry holding the member's own certificate
pub const MEMBER_ENTRY: &str = "0";
/// Entry holding the issuer's certificate
pub const ISSUER_ENTRY: &str = "1";

/// Member certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Certificate {
    /// Identity the certificate is issued to
    pub subject: String,
    /// Identity of the issuer
    pub issuer: String,
    /// Certificate version
    pub version: u64,
    /// Trust root configuration version
    #[serde(rename = "TRCVersion")]
    pub trc_version: u64,
    /// Whether the subject may issue certificates
    pub can_issue: bool,
    /// Start of the validity window, unix seconds
    pub issuing_time: u64,
    /// End of the validity window, unix seconds
    pub expiration_time: u64,
    /// Free text
    #[serde(default)]
    pub comment: String,
    /// Encryption algorithm name
    pub enc_algorithm: String,
    /// Signature algorithm name
    pub sign_algorithm: String,
    /// Subject encryption key, base64
    pub subject_enc_key: String,
    /// Subject signing key, base64
    pub subject_sign_key: String,
    /// Signature, base64; empty while unsigned
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    /// Fields this tool does not interpret
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl Certificate {
    /// Bytes covered by the signature
    ///
    /// # Errors
    /// Returns error if the fields cannot be encoded.
    pub fn signing_input(&self) -> Result<Vec<u8>, TopologyError> {
        let unsigned = Self {
            signature: String::new(),
            ..self.clone()
        };
        serde_json::to_vec(&unsigned).map_err(|e| TopologyError::Serialize(e.to_string()))
    }

    /// Copy with new subject and issuer, signed by `key`
    ///
    /// The validity window and all other fields are kept.
    ///
    /// # Errors
    /// Returns error if the fields cannot be encoded.
    pub fn reissue(
        &self,
        subject: impl Into<String>,
        issuer: impl Into<String>,
        key: &SigningKey,
    ) -> Result<Self, TopologyError> {
        Self {
            subject: subject.into(),
            issuer: issuer.into(),
            signature: String::new(),
            ..self.clone()
        }
        .sign(key)
    }

    /// Copy carrying a fresh signature by `key`
    ///
    /// # Errors
    /// Returns error if the fields cannot be encoded.
    pub fn sign(&self, key: &SigningKey) -> Result<Self, TopologyError> {
        let signature: Signature = key.sign(&self.signing_input()?);
        Ok(Self {
            signature: STANDARD.encode(signature.to_bytes()),
            ..self.clone()
        })
    }

    /// Check the signature under `key`
    ///
    /// # Errors
    /// - [`SigningError::MalformedSignature`] if the stored signature cannot be decoded
    /// - [`SigningError::BadSignature`] if it does not verify
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), TopologyError> {
        let bytes = STANDARD
            .decode(&self.signature)
            .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;
        let signature = Signature::from_slice(&bytes)
            .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;
        key.verify(&self.signing_input()?, &signature)
            .map_err(|_| SigningError::BadSignature {
                subject: self.subject.clone(),
            })?;
        Ok(())
    }

    /// Whether subject and issuer coincide
    #[inline]
    #[must_use]
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

/// Member certificate plus a copy of its issuer's
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateChain {
    /// Entry "0"
    pub member: Certificate,
    /// Entry "1"
    pub issuer: Certificate,
}

#[derive(Serialize)]
struct ChainFile<'a> {
    #[serde(rename = "0")]
    member: &'a Certificate,
    #[serde(rename = "1")]
    issuer: &'a Certificate,
}

impl CertificateChain {
    /// Pair a member certificate with its issuer's
    #[must_use]
    pub fn new(member: Certificate, issuer: Certificate) -> Self {
        Self { member, issuer }
    }

    /// Read a chain file
    ///
    /// # Errors
    /// IO, syntax or [`SchemaError::ChainEntries`] errors.
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let text = fs::read_to_string(path).map_err(|e| TopologyError::io_error(path, e))?;
        Self::parse_at(&text, path)
    }

    /// Parse chain file text
    ///
    /// # Errors
    /// Syntax or [`SchemaError::ChainEntries`] errors.
    pub fn parse(text: &str) -> Result<Self, TopologyError> {
        Self::parse_at(text, Path::new("certificate chain"))
    }

    fn parse_at(text: &str, path: &Path) -> Result<Self, TopologyError> {
        let mut entries: IndexMap<String, serde_json::Value> =
            serde_json::from_str(text).map_err(|e| TopologyError::syntax(path, e.to_string()))?;

        let keys: Vec<String> = entries.keys().cloned().collect();
        if entries.len() != 2 {
            return Err(SchemaError::ChainEntries(keys).into());
        }
        let (Some(member), Some(issuer)) = (
            entries.shift_remove(MEMBER_ENTRY),
            entries.shift_remove(ISSUER_ENTRY),
        ) else {
            return Err(SchemaError::ChainEntries(keys).into());
        };

        let decode = |value| {
            serde_json::from_value::<Certificate>(value)
                .map_err(|e| TopologyError::syntax(path, e.to_string()))
        };
        Ok(Self {
            member: decode(member)?,
            issuer: decode(issuer)?,
        })
    }

    /// Serialize as a chain file
    ///
    /// # Errors
    /// Returns error if encoding fails.
    pub fn render(&self) -> Result<String, TopologyError> {
        let file = ChainFile {
            member: &self.member,
            issuer: &self.issuer,
        };
        let mut text =
            serde_json::to_string_pretty(&file).map_err(|e| TopologyError::Serialize(e.to_string()))?;
        text.push('\n');
        Ok(text)
    }

    /// Write to `path`
    ///
    /// # Errors
    /// Returns rendering or IO errors.
    pub fn save(&self, path: &Path) -> Result<(), TopologyError> {
        let text = self.render()?;
        fs::write(path, text).map_err(|e| TopologyError::io_error(path, e))
    }

    /// Check both signatures under `issuer_key` and the subject/issuer linkage
    ///
    /// # Errors
    /// [`SigningError::BrokenLinkage`] or signature errors.
    pub fn verify(&self, issuer_key: &VerifyingKey) -> Result<(), TopologyError> {
        if self.member.issuer != self.issuer.subject || !self.issuer.is_self_issued() {
            return Err(SigningError::BrokenLinkage {
                subject: self.member.subject.clone(),
                named: self.member.issuer.clone(),
                carried: self.issuer.subject.clone(),
            }
            .into());
        }
        self.member.verify(issuer_key)?;
        self.issuer.verify(issuer_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn certificate(subject: &str, issuer: &str) -> Certificate {
        Certificate {
            subject: subject.into(),
            issuer: issuer.into(),
            version: 0,
            trc_version: 0,
            can_issue: false,
            issuing_time: 1_500_000_000,
            expiration_time: 1_600_000_000,
            comment: "AS Certificate".into(),
            enc_algorithm: "curve25519xsalsa20poly1305".into(),
            sign_algorithm: "ed25519".into(),
            subject_enc_key: STANDARD.encode([1u8; 32]),
            subject_sign_key: STANDARD.encode([2u8; 32]),
            signature: String::new(),
            extra: IndexMap::new(),
        }
    }

    #[test]
    fn sign_and_verify() {
        let cert = certificate("1-12", "1-11").sign(&key(1)).unwrap();
        assert!(cert.verify(&key(1).verifying_key()).is_ok());
        assert!(matches!(
            cert.verify(&key(2).verifying_key()),
            Err(TopologyError::Signing(SigningError::BadSignature { .. }))
        ));
    }

    #[test]
    fn tampering_breaks_signature() {
        let mut cert = certificate("1-12", "1-11").sign(&key(1)).unwrap();
        cert.expiration_time += 1;
        assert!(cert.verify(&key(1).verifying_key()).is_err());
    }

    #[test]
    fn reissue_keeps_validity_window() {
        let cert = certificate("1-12", "1-11");
        let new = cert.reissue("17-0:1102", "17-0:1101", &key(1)).unwrap();
        assert_eq!(new.issuing_time, cert.issuing_time);
        assert_eq!(new.expiration_time, cert.expiration_time);
        assert_eq!(new.subject, "17-0:1102");
        // deterministic
        assert_eq!(new, cert.reissue("17-0:1102", "17-0:1101", &key(1)).unwrap());
    }

    #[test]
    fn unsigned_signature_is_malformed() {
        let cert = certificate("1-12", "1-11");
        assert!(matches!(
            cert.verify(&key(1).verifying_key()),
            Err(TopologyError::Signing(SigningError::MalformedSignature(_)))
        ));
    }

    #[test]
    fn chain_render_parse() {
        let anchor = certificate("1-11", "1-11").sign(&key(1)).unwrap();
        let member = certificate("1-12", "1-11").sign(&key(1)).unwrap();
        let chain = CertificateChain::new(member, anchor);

        let text = chain.render().unwrap();
        assert!(text.contains("\"TRCVersion\""));
        assert!(text.contains("\"SubjectSignKey\""));
        let parsed = CertificateChain::parse(&text).unwrap();
        assert_eq!(parsed, chain);
        assert!(parsed.verify(&key(1).verifying_key()).is_ok());
    }

    #[test]
    fn unknown_fields_survive() {
        let mut cert = certificate("1-11", "1-11");
        cert.extra.insert("Extension".into(), serde_json::json!({"a": 1}));
        let cert = cert.sign(&key(1)).unwrap();
        let chain = CertificateChain::new(cert.clone(), cert);
        let parsed = CertificateChain::parse(&chain.render().unwrap()).unwrap();
        assert_eq!(parsed.member.extra["Extension"], serde_json::json!({"a": 1}));
        assert!(parsed.member.verify(&key(1).verifying_key()).is_ok());
    }

    #[test]
    fn chain_needs_both_entries() {
        let cert = serde_json::to_value(certificate("1-11", "1-11")).unwrap();
        let one = serde_json::json!({ "0": cert }).to_string();
        assert!(matches!(
            CertificateChain::parse(&one),
            Err(TopologyError::Schema(SchemaError::ChainEntries(_)))
        ));
        let wrong = serde_json::json!({ "0": cert, "2": cert }).to_string();
        assert!(matches!(
            CertificateChain::parse(&wrong),
            Err(TopologyError::Schema(SchemaError::ChainEntries(_)))
        ));
        let three = serde_json::json!({ "0": cert, "1": cert, "2": cert }).to_string();
        assert!(CertificateChain::parse(&three).is_err());
    }

    #[test]
    fn linkage_checked() {
        let stale = certificate("1-11", "1-11").sign(&key(1)).unwrap();
        let member = certificate("17-0:1102", "17-0:1101").sign(&key(1)).unwrap();
        let chain = CertificateChain::new(member, stale);
        assert!(matches!(
            chain.verify(&key(1).verifying_key()),
            Err(TopologyError::Signing(SigningError::BrokenLinkage { .. }))
        ));
    }
}
