//! Error types for descriptors and credentials
//!
//! Every error here concerns a single member. Only [`TopologyError::is_fatal`]
//! errors (plan constants that do not fit the data) escape that scope.

use std::path::PathBuf;

use renum_ident::{Identifier, MapError, ParseError, RewriteError};

use crate::credentials::KeyRole;

/// Descriptor or chain content does not have the required shape
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Required field absent
    #[error("missing field '{field}' in {path}")]
    MissingField {
        /// Location of the enclosing document
        path: String,
        /// Field name
        field: String,
    },

    /// Field present with the wrong kind of value
    #[error("field {path} must be a {expected}, found {found}")]
    WrongType {
        /// Location of the field
        path: String,
        /// Expected kind
        expected: &'static str,
        /// Actual kind
        found: &'static str,
    },

    /// Descriptor already carries a renumbered identifier
    #[error("descriptor of {0} is already renumbered")]
    AlreadyRemapped(Identifier),

    /// Directory name and descriptor disagree on the member's identity
    #[error("descriptor identifies as {found}, directory says {expected}")]
    IdentityMismatch {
        /// Identifier derived from the directory layout
        expected: Identifier,
        /// Identifier in the descriptor
        found: Identifier,
    },

    /// Certificate chain is not exactly the entries "0" and "1"
    #[error("certificate chain must hold entries \"0\" and \"1\", found {0:?}")]
    ChainEntries(Vec<String>),
}

/// Key material needed for signing is absent or unusable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    /// Key role not present in the credential store
    #[error("no {role} key in credential store")]
    MissingKey {
        /// Role that was required
        role: KeyRole,
    },

    /// Key file content could not be decoded
    #[error("{role} key is invalid: {reason}")]
    InvalidKey {
        /// Role of the key
        role: KeyRole,
        /// Decoding failure
        reason: String,
    },

    /// Realm has no trust anchor that could issue certificates
    #[error("realm {0} has no reissued trust anchor")]
    NoTrustAnchor(u16),

    /// Anchor set belongs to another realm
    #[error("anchor set of realm {anchors} used for realm {realm}")]
    RealmMismatch {
        /// Realm of the anchor set
        anchors: u16,
        /// Realm being reissued
        realm: u16,
    },

    /// Stored signature is not valid base64 / ed25519
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Signature does not verify under the issuer key
    #[error("signature of certificate for {subject} does not verify")]
    BadSignature {
        /// Subject of the offending certificate
        subject: String,
    },

    /// Member certificate names an issuer other than the chain's issuer entry
    #[error("certificate for {subject} names issuer {named}, chain carries {carried}")]
    BrokenLinkage {
        /// Subject of the member certificate
        subject: String,
        /// Issuer named by the member certificate
        named: String,
        /// Subject of the issuer entry
        carried: String,
    },
}

/// Errors while loading, rewriting or saving topology material
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Not exactly one candidate file was found
    #[error("expected exactly one {expected} in {dir}, found {found}")]
    MissingFile {
        /// Directory searched
        dir: PathBuf,
        /// Description of the expected file
        expected: String,
        /// Number of candidates found
        found: usize,
    },

    /// IO failure
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid JSON/YAML
    #[error("syntax error in {path}: {message}")]
    Syntax {
        /// File involved
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Content has the wrong shape
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Identifier or name text is malformed
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Identifier could not be mapped
    #[error("mapping error: {0}")]
    Map(#[from] MapError),

    /// Key material problem
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// Rendering a document failed
    #[error("serialization failed: {0}")]
    Serialize(String),
}

impl TopologyError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create syntax error for path
    pub fn syntax(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Syntax {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error must abort the whole run
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Map(e) if e.is_fatal())
    }
}

impl From<RewriteError> for TopologyError {
    fn from(value: RewriteError) -> Self {
        match value {
            RewriteError::Parse(e) => Self::Parse(e),
            RewriteError::Map(e) => Self::Map(e),
        }
    }
}
