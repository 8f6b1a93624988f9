//! Descriptor document tree
//!
//! Descriptors are kept as an explicit tree of documents, lists and scalars
//! rather than typed structs so that fields this tool does not understand are
//! written back untouched. All rewrites are pure: they return a new tree.

use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, Serializer};
use serde_json::Number;

/// Leaf value
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Integer or float
    Number(Number),
    /// String
    Text(String),
}

/// Node of a descriptor tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Key/value document, insertion ordered
    Document(IndexMap<String, Node>),
    /// Ordered list
    List(Vec<Node>),
    /// Leaf
    Scalar(Scalar),
}

impl Node {
    /// Text leaf
    #[inline]
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(value.into()))
    }

    /// Short name of the variant, for error messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Document(_) => "document",
            Self::List(_) => "list",
            Self::Scalar(Scalar::Null) => "null",
            Self::Scalar(Scalar::Bool(_)) => "bool",
            Self::Scalar(Scalar::Number(_)) => "number",
            Self::Scalar(Scalar::Text(_)) => "string",
        }
    }

    /// Entries if this is a document
    #[inline]
    #[must_use]
    pub fn as_document(&self) -> Option<&IndexMap<String, Node>> {
        match self {
            Self::Document(map) => Some(map),
            _ => None,
        }
    }

    /// Text if this is a string leaf
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Value if this is a boolean leaf
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Child of a document by key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_document().and_then(|map| map.get(key))
    }

    /// Rename every occurrence of document key `from` to `to`, at any depth
    ///
    /// The renamed entry keeps its position. If a document already holds
    /// `to`, the renamed value replaces it.
    #[must_use]
    pub fn rename_key(&self, from: &str, to: &str) -> Node {
        match self {
            Self::Document(map) => {
                let mut renamed = IndexMap::with_capacity(map.len());
                for (key, child) in map {
                    let key = if key == from { to } else { key.as_str() };
                    renamed.insert(key.to_string(), child.rename_key(from, to));
                }
                Self::Document(renamed)
            }
            Self::List(items) => Self::List(items.iter().map(|n| n.rename_key(from, to)).collect()),
            Self::Scalar(_) => self.clone(),
        }
    }

    /// Rebuild a document entry by entry
    ///
    /// `f` receives each key and child and returns the replacement pair.
    /// Non-document nodes are returned unchanged.
    ///
    /// # Errors
    /// Returns the first error produced by `f`.
    pub fn try_map_entries<E>(
        &self,
        mut f: impl FnMut(&str, &Node) -> Result<(String, Node), E>,
    ) -> Result<Node, E> {
        match self {
            Self::Document(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (key, child) in map {
                    let (key, child) = f(key, child)?;
                    out.insert(key, child);
                }
                Ok(Self::Document(out))
            }
            _ => Ok(self.clone()),
        }
    }

    /// Number of document keys equal to `key`, at any depth
    #[must_use]
    pub fn count_key(&self, key: &str) -> usize {
        match self {
            Self::Document(map) => map
                .iter()
                .map(|(k, child)| usize::from(k == key) + child.count_key(key))
                .sum(),
            Self::List(items) => items.iter().map(|n| n.count_key(key)).sum(),
            Self::Scalar(_) => 0,
        }
    }
}

impl From<IndexMap<String, Node>> for Node {
    fn from(map: IndexMap<String, Node>) -> Self {
        Self::Document(map)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Document(map) => map.serialize(serializer),
            Self::List(items) => items.serialize(serializer),
            Self::Scalar(Scalar::Null) => serializer.serialize_unit(),
            Self::Scalar(Scalar::Bool(b)) => serializer.serialize_bool(*b),
            Self::Scalar(Scalar::Number(n)) => n.serialize(serializer),
            Self::Scalar(Scalar::Text(s)) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a descriptor value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Node, E> {
        Ok(Node::Scalar(Scalar::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Node, E> {
        Ok(Node::Scalar(Scalar::Number(v.into())))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Node, E> {
        Ok(Node::Scalar(Scalar::Number(v.into())))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Node, E> {
        Number::from_f64(v)
            .map(|n| Node::Scalar(Scalar::Number(n)))
            .ok_or_else(|| E::custom("non-finite number"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Node, E> {
        Ok(Node::text(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Node, E> {
        Ok(Node::text(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Scalar(Scalar::Null))
    }

    fn visit_none<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Scalar(Scalar::Null))
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Node, D::Error> {
        Node::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Node, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Node::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Node, A::Error> {
        let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((KeyText(key), value)) = access.next_entry::<KeyText, Node>()? {
            map.insert(key, value);
        }
        Ok(Node::Document(map))
    }
}

/// Document key; YAML allows numeric and boolean keys, which are kept as text
struct KeyText(String);

impl<'de> Deserialize<'de> for KeyText {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = KeyText;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string, integer or boolean key")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<KeyText, E> {
                Ok(KeyText(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<KeyText, E> {
                Ok(KeyText(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<KeyText, E> {
                Ok(KeyText(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<KeyText, E> {
                Ok(KeyText(v.to_string()))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<KeyText, E> {
                Ok(KeyText(v.to_string()))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> Node {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn json_roundtrip_preserves_order() {
        let text = r#"{"z":1,"a":{"y":[true,null,"x"],"b":2.5}}"#;
        let node = parse(text);
        assert_eq!(serde_json::to_string(&node).unwrap(), text);
    }

    #[test]
    fn yaml_numeric_keys_become_text() {
        let node: Node = serde_yaml::from_str("Interfaces:\n  1:\n    IA: 1-12\n").unwrap();
        let ifaces = node.get("Interfaces").unwrap();
        assert_eq!(ifaces.get("1").unwrap().get("IA").unwrap().as_str(), Some("1-12"));
    }

    #[test]
    fn rename_key_reaches_every_level() {
        let node = parse(r#"{"ISD_AS":"1-11","R":{"r1":{"I":{"1":{"ISD_AS":"1-12"}}}},"L":[{"ISD_AS":"1-13"}]}"#);
        assert_eq!(node.count_key("ISD_AS"), 3);

        let renamed = node.rename_key("ISD_AS", "IA");
        assert_eq!(renamed.count_key("ISD_AS"), 0);
        assert_eq!(renamed.count_key("IA"), 3);
        // source tree untouched
        assert_eq!(node.count_key("ISD_AS"), 3);
    }

    #[test]
    fn rename_keeps_position() {
        let node = parse(r#"{"a":1,"ISD_AS":"1-11","b":2}"#).rename_key("ISD_AS", "IA");
        let keys: Vec<_> = node.as_document().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "IA", "b"]);
    }

    #[test]
    fn try_map_entries_rebuilds_document() {
        let node = parse(r#"{"a":"x","b":"y"}"#);
        let mapped = node
            .try_map_entries(|k, v| Ok::<_, ()>((k.to_uppercase(), v.clone())))
            .unwrap();
        assert_eq!(mapped, parse(r#"{"A":"x","B":"y"}"#));

        let err = node.try_map_entries(|_, _| Err::<(String, Node), _>("nope"));
        assert_eq!(err, Err("nope"));
    }

    #[test]
    fn kinds() {
        assert_eq!(parse("{}").kind(), "document");
        assert_eq!(parse("[]").kind(), "list");
        assert_eq!(parse("null").kind(), "null");
        assert_eq!(parse("\"s\"").kind(), "string");
        assert_eq!(parse("1").kind(), "number");
        assert_eq!(parse("true").as_bool(), Some(true));
    }
}
