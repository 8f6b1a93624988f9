//! Per-member key material and certificate chain
//!
//! Keys live under `<element>/keys/` as base64 encoded 32-byte seeds, one
//! file per role. The chain is the single `.crt` file under `<element>/certs/`.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};

use crate::certificate::CertificateChain;
use crate::error::{SigningError, TopologyError};

/// Directory holding key files
pub const KEYS_DIR: &str = "keys";
/// Directory holding the certificate chain
pub const CERTS_DIR: &str = "certs";
/// Extension of certificate chain files
pub const CHAIN_EXTENSION: &str = "crt";

/// Purpose of a key file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyRole {
    /// Member signing key
    Signing,
    /// Member decryption key
    Decryption,
    /// Key a trust anchor issues certificates with
    TrustAnchorSigning,
    /// Online root key
    OnlineRoot,
    /// Offline root key
    OfflineRoot,
}

impl KeyRole {
    /// Every role, in file listing order
    pub const ALL: [Self; 5] = [
        Self::Signing,
        Self::Decryption,
        Self::TrustAnchorSigning,
        Self::OnlineRoot,
        Self::OfflineRoot,
    ];

    /// Key file name within the keys directory
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Signing => "as-sig.seed",
            Self::Decryption => "as-decrypt.key",
            Self::TrustAnchorSigning => "core-sig.seed",
            Self::OnlineRoot => "online-root.seed",
            Self::OfflineRoot => "offline-root.seed",
        }
    }
}

impl Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Signing => "signing",
            Self::Decryption => "decryption",
            Self::TrustAnchorSigning => "trust anchor signing",
            Self::OnlineRoot => "online root",
            Self::OfflineRoot => "offline root",
        };
        f.write_str(name)
    }
}

/// Secret key bytes tagged with their role
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    role: KeyRole,
    seed: [u8; SECRET_KEY_LENGTH],
}

impl PrivateKey {
    /// Wrap raw seed bytes
    #[must_use]
    pub fn new(role: KeyRole, seed: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self { role, seed }
    }

    /// Decode a base64 key file body
    ///
    /// # Errors
    /// [`SigningError::InvalidKey`] if the text is not base64 of 32 bytes.
    pub fn decode(role: KeyRole, text: &str) -> Result<Self, SigningError> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|e| SigningError::InvalidKey {
                role,
                reason: e.to_string(),
            })?;
        let seed: [u8; SECRET_KEY_LENGTH] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| SigningError::InvalidKey {
                    role,
                    reason: format!("expected {SECRET_KEY_LENGTH} bytes, got {}", bytes.len()),
                })?;
        Ok(Self { role, seed })
    }

    /// Base64 key file body
    #[must_use]
    pub fn encode(&self) -> String {
        STANDARD.encode(self.seed)
    }

    /// Role of the key
    #[inline]
    #[must_use]
    pub fn role(&self) -> KeyRole {
        self.role
    }

    /// Ed25519 signing key derived from the seed
    #[must_use]
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.seed)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Keys and certificate chain of one member element
#[derive(Debug, Clone)]
pub struct CredentialStore {
    keys: BTreeMap<KeyRole, PrivateKey>,
    chain: CertificateChain,
    chain_path: PathBuf,
}

impl CredentialStore {
    /// Assemble a store from parts
    #[must_use]
    pub fn new(
        keys: impl IntoIterator<Item = PrivateKey>,
        chain: CertificateChain,
        chain_path: PathBuf,
    ) -> Self {
        Self {
            keys: keys.into_iter().map(|k| (k.role(), k)).collect(),
            chain,
            chain_path,
        }
    }

    /// Load keys and chain of the element directory `dir`
    ///
    /// Absent key files are tolerated here; a role that is needed later and
    /// missing fails in [`CredentialStore::signing_key`].
    ///
    /// # Errors
    /// - [`TopologyError::MissingFile`] if `keys` is absent or `certs` does
    ///   not hold exactly one chain
    /// - decoding errors for key files and the chain
    pub fn load(dir: &Path) -> Result<Self, TopologyError> {
        let keys_dir = dir.join(KEYS_DIR);
        if !keys_dir.is_dir() {
            return Err(TopologyError::MissingFile {
                dir: dir.to_path_buf(),
                expected: "keys directory".into(),
                found: 0,
            });
        }

        let mut keys = BTreeMap::new();
        for role in KeyRole::ALL {
            let path = keys_dir.join(role.file_name());
            if !path.is_file() {
                continue;
            }
            let text = fs::read_to_string(&path).map_err(|e| TopologyError::io_error(&path, e))?;
            keys.insert(role, PrivateKey::decode(role, &text)?);
        }

        let chain_path = locate_chain(&dir.join(CERTS_DIR))?;
        let chain = CertificateChain::load(&chain_path)?;
        tracing::trace!(dir = %dir.display(), keys = keys.len(), "loaded credentials");

        Ok(Self {
            keys,
            chain,
            chain_path,
        })
    }

    /// Key of `role`, if present
    #[must_use]
    pub fn key(&self, role: KeyRole) -> Option<&PrivateKey> {
        self.keys.get(&role)
    }

    /// Signing key for `role`
    ///
    /// # Errors
    /// [`SigningError::MissingKey`] if the role is absent.
    pub fn signing_key(&self, role: KeyRole) -> Result<SigningKey, SigningError> {
        self.key(role)
            .map(PrivateKey::signing_key)
            .ok_or(SigningError::MissingKey { role })
    }

    /// Public half of the `role` key
    ///
    /// # Errors
    /// [`SigningError::MissingKey`] if the role is absent.
    pub fn verifying_key(&self, role: KeyRole) -> Result<VerifyingKey, SigningError> {
        self.signing_key(role).map(|k| k.verifying_key())
    }

    /// Current certificate chain
    #[inline]
    #[must_use]
    pub fn chain(&self) -> &CertificateChain {
        &self.chain
    }

    /// Replace the chain, keeping keys and location
    #[must_use]
    pub fn with_chain(&self, chain: CertificateChain) -> Self {
        Self {
            keys: self.keys.clone(),
            chain,
            chain_path: self.chain_path.clone(),
        }
    }

    /// Location of the chain file
    #[inline]
    #[must_use]
    pub fn chain_path(&self) -> &Path {
        &self.chain_path
    }

    /// Write the chain back to its file
    ///
    /// # Errors
    /// Returns rendering or IO errors.
    pub fn save(&self) -> Result<(), TopologyError> {
        self.chain.save(&self.chain_path)
    }
}

fn locate_chain(certs: &Path) -> Result<PathBuf, TopologyError> {
    let mut found = Vec::new();
    let entries = match fs::read_dir(certs) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TopologyError::MissingFile {
                dir: certs.to_path_buf(),
                expected: "certificate chain".into(),
                found: 0,
            })
        }
        Err(e) => return Err(TopologyError::io_error(certs, e)),
    };

    for entry in entries {
        let path = entry.map_err(|e| TopologyError::io_error(certs, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == CHAIN_EXTENSION) {
            found.push(path);
        }
    }

    match found.len() {
        1 => Ok(found.remove(0)),
        n => Err(TopologyError::MissingFile {
            dir: certs.to_path_buf(),
            expected: "certificate chain".into(),
            found: n,
        }),
    }
}
