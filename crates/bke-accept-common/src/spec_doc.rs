//! Structured edits on the BKECluster spec document
//!
//! The document is parsed into a YAML value, edited through typed helpers
//! and serialized again. Only the fields an edit touches change; every
//! other part of the document is carried through as-is.
//!
//! An edit that cannot find what it needs (no `spec.nodes` list, unknown
//! hostname, duplicate hostname) fails with [`Error::SpecPatch`] instead of
//! quietly leaving the document untouched.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::{Error, Result, APPOINTMENT_DELETED_NODES, DEFAULT_ANNOTATION_PREFIX};

/// Metadata fields owned by the API server, dropped before re-applying
const SERVER_MANAGED_METADATA: &[&str] = &[
    "uid",
    "resourceVersion",
    "creationTimestamp",
    "managedFields",
    "generation",
];

/// One entry of `spec.nodes`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node hostname, unique within the list
    pub hostname: String,
    /// Address used to reach the node
    pub ip: String,
    /// Login password as stored by BKE (already encrypted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: String,
    /// Roles for the node (e.g., `node`, `master`, `etcd`)
    #[serde(default)]
    pub role: Vec<String>,
    /// Login user
    #[serde(default = "default_username")]
    pub username: String,
}

fn default_port() -> String {
    "22".to_string()
}

fn default_username() -> String {
    "root".to_string()
}

/// Delete-time safeguards on the cluster resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectionFlag {
    /// Keep the cluster namespace when the cluster is deleted
    IgnoreNamespaceDelete,
    /// Keep the target cluster machines when the cluster is deleted
    IgnoreTargetClusterDelete,
}

impl ProtectionFlag {
    /// Every flag that guards deletion
    pub const ALL: [ProtectionFlag; 2] = [
        ProtectionFlag::IgnoreNamespaceDelete,
        ProtectionFlag::IgnoreTargetClusterDelete,
    ];

    /// Annotation name without the prefix
    pub fn name(&self) -> &'static str {
        match self {
            ProtectionFlag::IgnoreNamespaceDelete => "ignore-namespace-delete",
            ProtectionFlag::IgnoreTargetClusterDelete => "ignore-target-cluster-delete",
        }
    }

    /// Parse a flag from its annotation name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

impl fmt::Display for ProtectionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed cluster spec document
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSpecDocument {
    value: Value,
    annotation_prefix: String,
}

impl ClusterSpecDocument {
    /// Parse a document using the default annotation prefix
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_prefix(text, DEFAULT_ANNOTATION_PREFIX)
    }

    /// Parse a document whose annotations live under `prefix`
    pub fn parse_with_prefix(text: &str, prefix: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        if !value.is_mapping() {
            return Err(Error::spec_patch("parse", "document is not a YAML mapping"));
        }
        Ok(Self {
            value,
            annotation_prefix: prefix.to_string(),
        })
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.value)?)
    }

    /// `metadata.name`, if present
    pub fn name(&self) -> Option<&str> {
        self.value
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
    }

    /// Hostnames in `spec.nodes`, in document order
    pub fn hostnames(&self) -> Vec<String> {
        self.value
            .get("spec")
            .and_then(|s| s.get("nodes"))
            .and_then(Value::as_sequence)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| n.get("hostname").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every entry of `spec.nodes`, in document order
    pub fn nodes(&self) -> Result<Vec<NodeEntry>> {
        let Some(nodes) = self
            .value
            .get("spec")
            .and_then(|s| s.get("nodes"))
            .and_then(Value::as_sequence)
        else {
            return Ok(Vec::new());
        };
        nodes
            .iter()
            .map(|n| Ok(serde_yaml::from_value(n.clone())?))
            .collect()
    }

    /// Look up a node entry by hostname
    pub fn find_node(&self, hostname: &str) -> Result<Option<NodeEntry>> {
        let nodes = self
            .value
            .get("spec")
            .and_then(|s| s.get("nodes"))
            .and_then(Value::as_sequence);
        let Some(nodes) = nodes else {
            return Ok(None);
        };
        match nodes.iter().find(|n| hostname_of(n) == Some(hostname)) {
            Some(node) => Ok(Some(serde_yaml::from_value(node.clone())?)),
            None => Ok(None),
        }
    }

    /// Remove the node entry for `hostname` and mark its address in the
    /// `appointment-deleted-nodes` annotation so BKE drains it.
    ///
    /// Returns the removed entry.
    pub fn remove_node(&mut self, hostname: &str) -> Result<NodeEntry> {
        const OP: &str = "remove-node";
        let nodes = self.nodes_mut(OP)?;
        let index = nodes
            .iter()
            .position(|n| hostname_of(n) == Some(hostname))
            .ok_or_else(|| {
                Error::spec_patch(OP, format!("no node with hostname {}", hostname))
            })?;
        let removed: NodeEntry = serde_yaml::from_value(nodes[index].clone())?;

        let key = self.annotation_key(APPOINTMENT_DELETED_NODES);
        let addresses = match self.annotation(&key) {
            Some(existing) if !existing.trim().is_empty() => {
                if existing.split(',').any(|a| a.trim() == removed.ip) {
                    existing.to_string()
                } else {
                    format!("{},{}", existing, removed.ip)
                }
            }
            _ => removed.ip.clone(),
        };
        self.set_annotation(&key, &addresses)?;
        self.nodes_mut(OP)?.remove(index);
        Ok(removed)
    }

    /// Append a node entry to `spec.nodes`
    pub fn add_node(&mut self, entry: &NodeEntry) -> Result<()> {
        const OP: &str = "add-node";
        let value = serde_yaml::to_value(entry)?;
        let nodes = self.nodes_mut(OP)?;
        if nodes.iter().any(|n| hostname_of(n) == Some(entry.hostname.as_str())) {
            return Err(Error::spec_patch(
                OP,
                format!("node {} is already listed", entry.hostname),
            ));
        }
        nodes.push(value);
        Ok(())
    }

    /// Set a protection annotation to `true` or `false`, adding it if absent
    pub fn set_protection(&mut self, flag: ProtectionFlag, enabled: bool) -> Result<()> {
        let key = self.annotation_key(flag.name());
        self.set_annotation(&key, if enabled { "true" } else { "false" })
    }

    /// Current value of a protection annotation, if present and boolean
    pub fn protection(&self, flag: ProtectionFlag) -> Option<bool> {
        match self.annotation(&self.annotation_key(flag.name())) {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        }
    }

    /// Read an annotation by full key
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.value
            .get("metadata")
            .and_then(|m| m.get("annotations"))
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    /// Set an annotation by full key, creating `metadata.annotations` if needed
    pub fn set_annotation(&mut self, key: &str, value: &str) -> Result<()> {
        let root = self
            .value
            .as_mapping_mut()
            .ok_or_else(|| Error::spec_patch("annotate", "document is not a YAML mapping"))?;
        let metadata = child_mapping(root, "metadata", "annotate")?;
        let annotations = child_mapping(metadata, "annotations", "annotate")?;
        annotations.insert(
            Value::String(key.to_string()),
            Value::String(value.to_string()),
        );
        Ok(())
    }

    /// Drop server-managed metadata so the document can be re-applied
    pub fn strip_server_metadata(&mut self) {
        if let Some(metadata) = self
            .value
            .get_mut("metadata")
            .and_then(Value::as_mapping_mut)
        {
            for field in SERVER_MANAGED_METADATA {
                metadata.remove(*field);
            }
        }
    }

    fn annotation_key(&self, name: &str) -> String {
        format!("{}{}", self.annotation_prefix, name)
    }

    fn nodes_mut(&mut self, op: &str) -> Result<&mut Vec<Value>> {
        self.value
            .get_mut("spec")
            .and_then(|s| s.get_mut("nodes"))
            .and_then(Value::as_sequence_mut)
            .ok_or_else(|| Error::spec_patch(op, "document has no spec.nodes list"))
    }
}

fn hostname_of(node: &Value) -> Option<&str> {
    node.get("hostname").and_then(Value::as_str)
}

fn child_mapping<'a>(parent: &'a mut Mapping, key: &str, op: &str) -> Result<&'a mut Mapping> {
    let entry = parent
        .entry(Value::String(key.to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if entry.is_null() {
        *entry = Value::Mapping(Mapping::new());
    }
    entry
        .as_mapping_mut()
        .ok_or_else(|| Error::spec_patch(op, format!("{} is not a mapping", key)))
}
