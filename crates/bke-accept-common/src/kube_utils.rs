//! Kubernetes client construction and cluster queries
//!
//! Node and pod listings go through the kube API directly; only spec
//! mutation shells out (see [`crate::kubectl`]).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::status::{NodeRecord, PodRecord};
use crate::{Error, Result};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client with default timeouts.
///
/// With neither a path nor a context the usual inference applies
/// (`KUBECONFIG`, `~/.kube/config`, in-cluster).
pub async fn create_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    create_client_with_timeout(kubeconfig, context, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
        .await
}

/// Create a kube client from an optional kubeconfig path and context
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    context: Option<&str>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client> {
    let mut config = load_config(kubeconfig, context).await?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

async fn load_config(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Config> {
    if kubeconfig.is_none() && context.is_none() {
        return Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        });
    }

    let kc = match kubeconfig {
        Some(path) => Kubeconfig::read_from(path).map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to read kubeconfig {}: {}", path.display(), e),
            )
        })?,
        None => Kubeconfig::read().map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to read kubeconfig: {}", e))
        })?,
    };
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };
    Config::from_custom_kubeconfig(kc, &options)
        .await
        .map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to load kubeconfig: {}", e))
        })
}

/// Read-only view of cluster state used for snapshots
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterQuery: Send + Sync {
    /// Every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>>;

    /// Every pod across all namespaces
    async fn list_pods(&self) -> Result<Vec<PodRecord>>;
}

/// [`ClusterQuery`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterQuery {
    client: Client,
}

impl KubeClusterQuery {
    /// Query through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterQuery for KubeClusterQuery {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "Listed nodes");
        Ok(list.items.iter().map(NodeRecord::from_node).collect())
    }

    async fn list_pods(&self) -> Result<Vec<PodRecord>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "Listed pods");
        Ok(list.items.iter().map(PodRecord::from_pod).collect())
    }
}
