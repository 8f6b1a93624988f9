//! Testing utilities for the renum workspace
//!
//! Builds legacy generated trees on disk: realms, members, key files,
//! descriptors and signed certificate chains.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use renum_ident::Identifier;
use renum_topology::credentials::{CERTS_DIR, KEYS_DIR};
use renum_topology::{Certificate, CertificateChain, DescriptorFormat, KeyRole, PrivateKey};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

/// Element directory every fixture member uses
pub const ELEMENT: &str = "endhost";

/// Deterministic seed for a member's key of `role`
pub fn seed(id: Identifier, role: KeyRole) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..2].copy_from_slice(&id.realm().to_be_bytes());
    bytes[2..10].copy_from_slice(&id.member().to_be_bytes());
    bytes[10] = role as u8 + 1;
    bytes[31] = 0xA5;
    bytes
}

pub fn signing_key(id: Identifier, role: KeyRole) -> SigningKey {
    SigningKey::from_bytes(&seed(id, role))
}

#[derive(Debug, Clone)]
struct MemberSpec {
    core: bool,
    format: DescriptorFormat,
    neighbors: Vec<Identifier>,
    omitted: Vec<KeyRole>,
}

/// Builder for a legacy generated tree
#[derive(Debug, Clone, Default)]
pub struct GenTreeBuilder {
    members: BTreeMap<Identifier, MemberSpec>,
}

impl GenTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, id: Identifier, core: bool) -> Self {
        self.members.insert(
            id,
            MemberSpec {
                core,
                format: DescriptorFormat::Json,
                neighbors: Vec::new(),
                omitted: Vec::new(),
            },
        );
        self
    }

    pub fn anchor(self, realm: u16, member: u64) -> Self {
        self.add(Identifier::new(realm, member), true)
    }

    pub fn member(self, realm: u16, member: u64) -> Self {
        self.add(Identifier::new(realm, member), false)
    }

    /// Connect two members with a router interface on each side
    pub fn link(mut self, a: Identifier, b: Identifier) -> Self {
        if let Some(spec) = self.members.get_mut(&a) {
            spec.neighbors.push(b);
        }
        if let Some(spec) = self.members.get_mut(&b) {
            spec.neighbors.push(a);
        }
        self
    }

    /// Add a one-sided interface, e.g. towards a member outside the tree
    pub fn neighbor(mut self, from: Identifier, to: Identifier) -> Self {
        if let Some(spec) = self.members.get_mut(&from) {
            spec.neighbors.push(to);
        }
        self
    }

    pub fn yaml(mut self, id: Identifier) -> Self {
        if let Some(spec) = self.members.get_mut(&id) {
            spec.format = DescriptorFormat::Yaml;
        }
        self
    }

    pub fn without_key(mut self, id: Identifier, role: KeyRole) -> Self {
        if let Some(spec) = self.members.get_mut(&id) {
            spec.omitted.push(role);
        }
        self
    }

    pub fn build(self) -> GenTree {
        let dir = tempfile::tempdir().unwrap();
        let tree = GenTree { dir };

        let mut anchors: BTreeMap<u16, Identifier> = BTreeMap::new();
        for (id, spec) in &self.members {
            if spec.core {
                anchors.entry(id.realm()).or_insert(*id);
            }
        }

        for (id, spec) in &self.members {
            let element = tree.element_dir(*id);
            fs::create_dir_all(element.join(KEYS_DIR)).unwrap();
            fs::create_dir_all(element.join(CERTS_DIR)).unwrap();

            for role in KeyRole::ALL {
                if spec.omitted.contains(&role) {
                    continue;
                }
                let key = PrivateKey::new(role, seed(*id, role));
                fs::write(element.join(KEYS_DIR).join(role.file_name()), key.encode()).unwrap();
            }

            let descriptor = legacy_descriptor(*id, spec);
            let text = match spec.format {
                DescriptorFormat::Json => serde_json::to_string_pretty(&descriptor).unwrap(),
                DescriptorFormat::Yaml => yaml_descriptor(*id, spec),
            };
            fs::write(element.join(spec.format.file_name()), text).unwrap();

            let chain = legacy_chain(*id, anchors.get(&id.realm()).copied());
            chain
                .save(&element.join(CERTS_DIR).join(format!("ISD{}-AS{}-V0.crt", id.realm(), id.member())))
                .unwrap();
        }

        tree
    }
}

/// Generated tree on disk, removed on drop
#[derive(Debug)]
pub struct GenTree {
    dir: TempDir,
}

impl GenTree {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn realm_dir(&self, realm: u16) -> PathBuf {
        self.root().join(format!("ISD{realm}"))
    }

    pub fn member_dir(&self, id: Identifier) -> PathBuf {
        self.realm_dir(id.realm()).join(format!("AS{}", id.member()))
    }

    pub fn element_dir(&self, id: Identifier) -> PathBuf {
        self.member_dir(id).join(ELEMENT)
    }

    /// Path of the member's chain file
    pub fn chain_path(&self, id: Identifier) -> PathBuf {
        let certs = self.element_dir(id).join(CERTS_DIR);
        fs::read_dir(certs)
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|e| e == "crt"))
            .unwrap()
    }

    pub fn chain(&self, id: Identifier) -> CertificateChain {
        CertificateChain::load(&self.chain_path(id)).unwrap()
    }

    /// Every file under the root with its contents, sorted by path
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        collect(self.root(), &mut files);
        files
    }
}

fn collect(dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(&path, files);
        } else {
            files.insert(path.clone(), fs::read(&path).unwrap());
        }
    }
}

fn service_name(code: &str, id: Identifier) -> String {
    format!("{code}{}-{}-1", id.realm(), id.member())
}

fn legacy_descriptor(id: Identifier, spec: &MemberSpec) -> Value {
    let address = |port: u16| json!({"Public": [{"Addr": "127.0.0.1", "L4Port": port}]});

    let mut interfaces = Map::new();
    for (n, neighbor) in spec.neighbors.iter().enumerate() {
        interfaces.insert(
            (n + 1).to_string(),
            json!({
                "ISD_AS": neighbor.legacy(),
                "LinkTo": if spec.core { "CORE" } else { "PARENT" },
                "Bandwidth": 1000,
                "MTU": 1472,
            }),
        );
    }

    json!({
        "ISD_AS": id.legacy(),
        "Core": spec.core,
        "MTU": 1472,
        "Overlay": "UDP/IPv4",
        "BeaconService": { service_name("bs", id): address(31041) },
        "CertificateService": { service_name("cs", id): address(31042) },
        "PathService": { service_name("ps", id): address(31043) },
        "BorderRouters": {
            service_name("br", id): {
                "InternalAddrs": [address(31044)],
                "Interfaces": interfaces,
            }
        },
        "ZookeeperService": { "1": {"Addr": "127.0.0.1", "L4Port": 2181} },
    })
}

fn yaml_descriptor(id: Identifier, spec: &MemberSpec) -> String {
    let mut out = format!("ISD_AS: {}\nCore: {}\nMTU: 1472\n", id.legacy(), spec.core);
    out.push_str(&format!(
        "BeaconService:\n  {}:\n    Public:\n    - Addr: 127.0.0.1\n      L4Port: 31041\n",
        service_name("bs", id)
    ));
    out.push_str(&format!("BorderRouters:\n  {}:\n    Interfaces:\n", service_name("br", id)));
    if spec.neighbors.is_empty() {
        out.push_str("      {}\n");
    }
    for (n, neighbor) in spec.neighbors.iter().enumerate() {
        out.push_str(&format!("      {}:\n        ISD_AS: {}\n        Bandwidth: 1000\n", n + 1, neighbor.legacy()));
    }
    out
}

fn certificate(subject: Identifier, issuer: Identifier, can_issue: bool) -> Certificate {
    Certificate {
        subject: subject.legacy(),
        issuer: issuer.legacy(),
        version: 0,
        trc_version: 0,
        can_issue,
        issuing_time: 1_514_764_800,
        expiration_time: 1_546_300_800,
        comment: if can_issue { "Core AS Certificate" } else { "AS Certificate" }.into(),
        enc_algorithm: "curve25519xsalsa20poly1305".into(),
        sign_algorithm: "ed25519".into(),
        subject_enc_key: STANDARD.encode(seed(subject, KeyRole::Decryption)),
        subject_sign_key: STANDARD.encode(
            signing_key(subject, KeyRole::Signing).verifying_key().to_bytes(),
        ),
        signature: String::new(),
        extra: indexmap::IndexMap::new(),
    }
}

/// Legacy chain as the old generator wrote it
pub fn legacy_chain(id: Identifier, anchor: Option<Identifier>) -> CertificateChain {
    let anchor = anchor.unwrap_or(id);
    let anchor_key = signing_key(anchor, KeyRole::TrustAnchorSigning);
    let issuer = certificate(anchor, anchor, true).sign(&anchor_key).unwrap();
    if anchor == id {
        return CertificateChain::new(issuer.clone(), issuer);
    }
    let member = certificate(id, anchor, false).sign(&anchor_key).unwrap();
    CertificateChain::new(member, issuer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_layout() {
        let a = Identifier::new(1, 11);
        let b = Identifier::new(1, 12);
        let tree = GenTreeBuilder::new().anchor(1, 11).member(1, 12).link(a, b).build();

        assert!(tree.element_dir(a).join("topology.json").is_file());
        assert!(tree.element_dir(b).join(KEYS_DIR).join("core-sig.seed").is_file());
        let chain = tree.chain(b);
        assert_eq!(chain.member.issuer, "1-11");
        let anchor_key = signing_key(a, KeyRole::TrustAnchorSigning).verifying_key();
        assert!(chain.verify(&anchor_key).is_ok());
    }

    #[test]
    fn seeds_differ_per_role_and_member() {
        let a = Identifier::new(1, 11);
        assert_ne!(seed(a, KeyRole::Signing), seed(a, KeyRole::TrustAnchorSigning));
        assert_ne!(seed(a, KeyRole::Signing), seed(Identifier::new(1, 12), KeyRole::Signing));
    }
}
