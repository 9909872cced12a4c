//! Declarative scale/delete intents as read-modify-write cycles
//!
//! Every edit fetches a fresh copy of the cluster spec immediately before
//! mutating it, then re-submits the whole document. There is no
//! optimistic-concurrency check: a concurrent external change made between
//! fetch and apply is overwritten.

use async_trait::async_trait;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::spec_doc::{ClusterSpecDocument, NodeEntry, ProtectionFlag};
use crate::{Result, DEFAULT_ANNOTATION_PREFIX};

/// System of record for the cluster spec document
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpecStore: Send + Sync {
    /// Fetch the current spec document as YAML text
    async fn fetch(&self) -> Result<String>;

    /// Submit a whole document, returning the tool's output
    async fn apply(&self, document: &str) -> Result<String>;

    /// Delete the cluster resource, returning the tool's output
    async fn delete(&self) -> Result<String>;
}

/// Result of one mutate-and-submit cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchReceipt {
    /// The document that was submitted
    pub applied: String,
    /// Output reported by the store
    pub output: String,
}

/// Applies structured edits to the cluster spec and re-submits it
pub struct ConfigPatcher<S: SpecStore> {
    store: S,
    annotation_prefix: String,
}

impl<S: SpecStore> ConfigPatcher<S> {
    /// Patcher using the default annotation prefix
    pub fn new(store: S) -> Self {
        Self::with_annotation_prefix(store, DEFAULT_ANNOTATION_PREFIX)
    }

    /// Patcher for a cluster resource whose annotations use `prefix`
    pub fn with_annotation_prefix(store: S, prefix: &str) -> Self {
        Self {
            store,
            annotation_prefix: prefix.to_string(),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Remove `hostname` from the node list and schedule its address for
    /// decommissioning. Returns the removed entry with the receipt.
    pub async fn remove_node(&self, hostname: &str) -> Result<(NodeEntry, PatchReceipt)> {
        let (entry, receipt) = self
            .mutate("remove-node", |doc| doc.remove_node(hostname))
            .await?;
        info!(node = %entry.hostname, ip = %entry.ip, "Removed node from cluster spec");
        Ok((entry, receipt))
    }

    /// Insert a node entry into the node list
    pub async fn add_node(&self, entry: &NodeEntry) -> Result<PatchReceipt> {
        let ((), receipt) = self
            .mutate("add-node", |doc| doc.add_node(entry))
            .await?;
        info!(node = %entry.hostname, ip = %entry.ip, "Added node to cluster spec");
        Ok(receipt)
    }

    /// Set protection annotations in a single cycle
    pub async fn set_protection(&self, flags: &[(ProtectionFlag, bool)]) -> Result<PatchReceipt> {
        let ((), receipt) = self
            .mutate("set-protection", |doc| {
                for (flag, enabled) in flags {
                    doc.set_protection(*flag, *enabled)?;
                }
                Ok(())
            })
            .await?;
        for (flag, enabled) in flags {
            info!(flag = %flag, enabled, "Updated protection annotation");
        }
        Ok(receipt)
    }

    /// Turn off every delete-time safeguard
    pub async fn disable_delete_protection(&self) -> Result<PatchReceipt> {
        let flags: Vec<(ProtectionFlag, bool)> =
            ProtectionFlag::ALL.iter().map(|f| (*f, false)).collect();
        self.set_protection(&flags).await
    }

    async fn mutate<T, F>(&self, operation: &str, edit: F) -> Result<(T, PatchReceipt)>
    where
        F: FnOnce(&mut ClusterSpecDocument) -> Result<T>,
    {
        let fetched = self.store.fetch().await?;
        let mut doc = ClusterSpecDocument::parse_with_prefix(&fetched, &self.annotation_prefix)?;
        let value = edit(&mut doc)?;
        doc.strip_server_metadata();
        let applied = doc.to_yaml()?;

        debug!(operation, "Applying patched cluster spec");
        let output = self.store.apply(&applied).await?;
        Ok((value, PatchReceipt { applied, output }))
    }
}
