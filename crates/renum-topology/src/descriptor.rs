//! Topology descriptors
//!
//! A member's descriptor names the member itself (`IA`), its services (maps
//! keyed by service name) and its border routers, whose interfaces point at
//! neighbouring members by identifier.
//!
//! Loading normalizes the legacy `ISD_AS` key to `IA` everywhere before the
//! structure is validated. Remapping is a pure transform returning a new
//! descriptor; a descriptor already in the new numbering refuses a second
//! remap.

use std::fs;
use std::path::{Path, PathBuf};

use renum_ident::{rewrite_service_name, IdForm, Identifier, IdentifierResolver, ServiceName};

use crate::error::{SchemaError, TopologyError};
use crate::node::Node;

/// Legacy spelling of the identifier key
pub const LEGACY_IA_KEY: &str = "ISD_AS";
/// Identifier key
pub const IA_KEY: &str = "IA";
/// Trust anchor flag
pub const CORE_KEY: &str = "Core";
/// Border router section
pub const ROUTERS_KEY: &str = "BorderRouters";
/// Interfaces of one border router
pub const INTERFACES_KEY: &str = "Interfaces";
/// Sections holding services keyed by name
pub const SERVICE_SECTIONS: [&str; 5] = [
    "BeaconService",
    "CertificateService",
    "PathService",
    "SibraService",
    "DiscoveryService",
];

/// On-disk encoding of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    /// `topology.json`
    Json,
    /// `topology.yml`
    Yaml,
}

impl DescriptorFormat {
    /// All supported formats
    pub const ALL: [Self; 2] = [Self::Json, Self::Yaml];

    /// File name of a descriptor in this format
    #[inline]
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Json => "topology.json",
            Self::Yaml => "topology.yml",
        }
    }

    fn parse(self, text: &str) -> Result<Node, String> {
        match self {
            Self::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        }
    }

    fn render(self, node: &Node) -> Result<String, TopologyError> {
        match self {
            Self::Json => serde_json::to_string_pretty(node)
                .map(|mut s| {
                    s.push('\n');
                    s
                })
                .map_err(|e| TopologyError::Serialize(e.to_string())),
            Self::Yaml => {
                serde_yaml::to_string(node).map_err(|e| TopologyError::Serialize(e.to_string()))
            }
        }
    }
}

/// Find the single descriptor file in `dir`
///
/// # Errors
/// Returns [`TopologyError::MissingFile`] unless exactly one descriptor exists.
pub fn locate(dir: &Path) -> Result<(PathBuf, DescriptorFormat), TopologyError> {
    let found: Vec<_> = DescriptorFormat::ALL
        .into_iter()
        .map(|format| (dir.join(format.file_name()), format))
        .filter(|(path, _)| path.is_file())
        .collect();

    match found.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(TopologyError::MissingFile {
            dir: dir.to_path_buf(),
            expected: "topology descriptor".into(),
            found: found.len(),
        }),
    }
}

/// Named service of a member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Section the service is listed in
    pub section: String,
    /// Parsed service name
    pub name: ServiceName,
}

/// Interface of a border router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEntry {
    /// Interface key within the router
    pub interface: String,
    /// Neighbouring member on the other end
    pub neighbor: Identifier,
}

/// Border router of a member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterEntry {
    /// Parsed router name
    pub name: ServiceName,
    /// Interfaces in document order
    pub interfaces: Vec<InterfaceEntry>,
}

/// A member's topology descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyDescriptor {
    tree: Node,
    format: DescriptorFormat,
    path: Option<PathBuf>,
    identifier: Identifier,
    form: IdForm,
    trust_anchor: bool,
    services: Vec<ServiceEntry>,
    routers: Vec<RouterEntry>,
}

impl TopologyDescriptor {
    /// Load the single descriptor stored in `dir`
    ///
    /// # Errors
    /// [`TopologyError::MissingFile`] unless exactly one descriptor exists;
    /// syntax, schema and parse errors for malformed content.
    pub fn load(dir: &Path) -> Result<Self, TopologyError> {
        let (path, format) = locate(dir)?;
        let text = fs::read_to_string(&path).map_err(|e| TopologyError::io_error(&path, e))?;
        let tree = format
            .parse(&text)
            .map_err(|message| TopologyError::syntax(&path, message))?;
        let mut descriptor = Self::from_tree(tree, format)?;
        descriptor.path = Some(path);
        Ok(descriptor)
    }

    /// Parse descriptor text
    ///
    /// # Errors
    /// Returns syntax, schema or parse errors.
    pub fn parse(text: &str, format: DescriptorFormat) -> Result<Self, TopologyError> {
        let tree = format
            .parse(text)
            .map_err(|message| TopologyError::syntax(format.file_name(), message))?;
        Self::from_tree(tree, format)
    }

    /// Normalize and validate a document tree
    ///
    /// # Errors
    /// Returns schema or parse errors.
    pub fn from_tree(tree: Node, format: DescriptorFormat) -> Result<Self, TopologyError> {
        let tree = tree.rename_key(LEGACY_IA_KEY, IA_KEY);
        if tree.as_document().is_none() {
            return Err(wrong_type("$", "document", &tree).into());
        }

        let (identifier, form) = Identifier::parse_with_form(required_str(&tree, "$", IA_KEY)?)?;

        let trust_anchor = match tree.get(CORE_KEY) {
            None => false,
            Some(node) => node
                .as_bool()
                .ok_or_else(|| wrong_type(&format!("$.{CORE_KEY}"), "bool", node))?,
        };

        let mut services = Vec::new();
        for section in SERVICE_SECTIONS {
            let Some(node) = tree.get(section) else { continue };
            let entries = node
                .as_document()
                .ok_or_else(|| wrong_type(&format!("$.{section}"), "document", node))?;
            for name in entries.keys() {
                services.push(ServiceEntry {
                    section: section.to_string(),
                    name: name.parse()?,
                });
            }
        }

        let routers_node = required(&tree, "$", ROUTERS_KEY)?;
        let routers_path = format!("$.{ROUTERS_KEY}");
        let routers_map = routers_node
            .as_document()
            .ok_or_else(|| wrong_type(&routers_path, "document", routers_node))?;

        let mut routers = Vec::with_capacity(routers_map.len());
        for (name, router) in routers_map {
            let router_path = format!("{routers_path}.{name}");
            let ifaces_node = required(router, &router_path, INTERFACES_KEY)?;
            let ifaces_path = format!("{router_path}.{INTERFACES_KEY}");
            let ifaces = ifaces_node
                .as_document()
                .ok_or_else(|| wrong_type(&ifaces_path, "document", ifaces_node))?;

            let mut interfaces = Vec::with_capacity(ifaces.len());
            for (ifid, iface) in ifaces {
                let neighbor = required_str(iface, &format!("{ifaces_path}.{ifid}"), IA_KEY)?;
                interfaces.push(InterfaceEntry {
                    interface: ifid.clone(),
                    neighbor: neighbor.parse()?,
                });
            }
            routers.push(RouterEntry {
                name: name.parse()?,
                interfaces,
            });
        }

        Ok(Self {
            tree,
            format,
            path: None,
            identifier,
            form,
            trust_anchor,
            services,
            routers,
        })
    }

    /// Member identifier named by the descriptor
    #[inline]
    #[must_use]
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Whether the member is a trust anchor of its realm
    #[inline]
    #[must_use]
    pub fn is_trust_anchor(&self) -> bool {
        self.trust_anchor
    }

    /// Whether the descriptor already uses the new numbering
    #[inline]
    #[must_use]
    pub fn is_remapped(&self) -> bool {
        self.form.is_renumbered()
    }

    /// Named services
    #[inline]
    #[must_use]
    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }

    /// Border routers
    #[inline]
    #[must_use]
    pub fn routers(&self) -> &[RouterEntry] {
        &self.routers
    }

    /// Every neighbour referenced by any router interface
    pub fn neighbors(&self) -> impl Iterator<Item = Identifier> + '_ {
        self.routers
            .iter()
            .flat_map(|r| r.interfaces.iter().map(|i| i.neighbor))
    }

    /// Underlying document tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &Node {
        &self.tree
    }

    /// Encoding of the source file
    #[inline]
    #[must_use]
    pub fn format(&self) -> DescriptorFormat {
        self.format
    }

    /// File the descriptor was loaded from
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rewrite every identifier through `resolver`
    ///
    /// Rewrites the member's own `IA`, all service and router names and every
    /// interface neighbour. Must run at most once per descriptor: the
    /// numbering offsets are not self-inverse.
    ///
    /// # Errors
    /// - [`SchemaError::AlreadyRemapped`] if the descriptor is already renumbered
    /// - parse or mapping errors from the names and references
    pub fn remap(&self, resolver: &mut impl IdentifierResolver) -> Result<Self, TopologyError> {
        if self.is_remapped() {
            return Err(SchemaError::AlreadyRemapped(self.identifier).into());
        }

        let own = resolver.resolve(self.identifier)?;
        let tree = self.tree.try_map_entries(|key, child| {
            let child = if key == IA_KEY {
                Node::text(own.standard())
            } else if SERVICE_SECTIONS.contains(&key) {
                rename_entries(child, &mut *resolver)?
            } else if key == ROUTERS_KEY {
                remap_routers(child, &mut *resolver)?
            } else {
                child.clone()
            };
            Ok::<_, TopologyError>((key.to_string(), child))
        })?;

        let mut remapped = Self::from_tree(tree, self.format)?;
        remapped.path.clone_from(&self.path);
        Ok(remapped)
    }

    /// Serialize in the source format
    ///
    /// # Errors
    /// Returns error if the tree cannot be encoded.
    pub fn render(&self) -> Result<String, TopologyError> {
        self.format.render(&self.tree)
    }

    /// Write to `path`
    ///
    /// # Errors
    /// Returns rendering or IO errors.
    pub fn save(&self, path: &Path) -> Result<(), TopologyError> {
        let text = self.render()?;
        fs::write(path, text).map_err(|e| TopologyError::io_error(path, e))
    }
}

fn rename_entries(
    section: &Node,
    resolver: &mut impl IdentifierResolver,
) -> Result<Node, TopologyError> {
    section.try_map_entries(|name, child| {
        Ok::<_, TopologyError>((rewrite_service_name(name, &mut *resolver)?, child.clone()))
    })
}

fn remap_routers(
    routers: &Node,
    resolver: &mut impl IdentifierResolver,
) -> Result<Node, TopologyError> {
    routers.try_map_entries(|name, router| {
        let new_name = rewrite_service_name(name, &mut *resolver)?;
        let router = router.try_map_entries(|key, child| {
            let child = if key == INTERFACES_KEY {
                child.try_map_entries(|ifid, iface| {
                    Ok::<_, TopologyError>((ifid.to_string(), remap_neighbor(iface, &mut *resolver)?))
                })?
            } else {
                child.clone()
            };
            Ok::<_, TopologyError>((key.to_string(), child))
        })?;
        Ok::<_, TopologyError>((new_name, router))
    })
}

fn remap_neighbor(
    iface: &Node,
    resolver: &mut impl IdentifierResolver,
) -> Result<Node, TopologyError> {
    iface.try_map_entries(|key, child| {
        if key != IA_KEY {
            return Ok((key.to_string(), child.clone()));
        }
        let old: Identifier = child
            .as_str()
            .ok_or_else(|| wrong_type(IA_KEY, "string", child))?
            .parse()?;
        let new = resolver.resolve(old)?;
        Ok::<_, TopologyError>((key.to_string(), Node::text(new.standard())))
    })
}

fn required<'a>(node: &'a Node, path: &str, field: &str) -> Result<&'a Node, SchemaError> {
    node.get(field).ok_or_else(|| SchemaError::MissingField {
        path: path.to_string(),
        field: field.to_string(),
    })
}

fn required_str<'a>(node: &'a Node, path: &str, field: &str) -> Result<&'a str, SchemaError> {
    let value = required(node, path, field)?;
    value
        .as_str()
        .ok_or_else(|| wrong_type(&format!("{path}.{field}"), "string", value))
}

fn wrong_type(path: &str, expected: &'static str, found: &Node) -> SchemaError {
    SchemaError::WrongType {
        path: path.to_string(),
        expected,
        found: found.kind(),
    }
}
