//! Renum topology
//!
//! On-disk material of one member: its topology descriptor, its key files
//! and its certificate chain.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod certificate;
pub mod credentials;
pub mod descriptor;
pub mod error;
pub mod node;

pub use certificate::{Certificate, CertificateChain};
pub use credentials::{CredentialStore, KeyRole, PrivateKey};
pub use descriptor::{
    DescriptorFormat, InterfaceEntry, RouterEntry, ServiceEntry, TopologyDescriptor,
};
pub use error::{SchemaError, SigningError, TopologyError};
pub use node::{Node, Scalar};
