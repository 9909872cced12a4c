//! CLI commands

use std::path::Path;
use std::time::Duration;

use bke_accept_common::kube_utils::{create_client, KubeClusterQuery};
use bke_accept_common::kubectl::{KubectlSpecStore, KubectlTarget};
use tracing::info;

use crate::config::AcceptanceConfig;
use crate::Result;

pub mod bootstrap;
pub mod get;
pub mod patch;
pub mod run;

/// Build the cluster query for the configured context.
///
/// Without an explicit kubeconfig the kube defaults apply.
pub async fn cluster_query(
    config: &AcceptanceConfig,
    kubeconfig: Option<&Path>,
) -> Result<KubeClusterQuery> {
    let client = create_client(kubeconfig, config.kube_context.as_deref()).await?;
    Ok(KubeClusterQuery::new(client))
}

/// Build the kubectl-backed spec store for the configured cluster resource
pub fn spec_store(config: &AcceptanceConfig, kubeconfig: Option<&Path>) -> KubectlSpecStore {
    let target = KubectlTarget {
        resource: config.resource_kind.clone(),
        name: config.cluster_name.clone(),
        namespace: config.namespace.clone(),
        manifest: config.manifest.clone(),
    };
    let mut store =
        KubectlSpecStore::new(target).with_timeout(config.timing.kubectl_timeout());
    if let Some(path) = kubeconfig {
        store = store.with_kubeconfig(path);
    }
    if let Some(context) = &config.kube_context {
        store = store.with_context(context.clone());
    }
    store
}

/// Wait a fixed delay, logging why
pub async fn settle(delay: Duration, reason: &str) {
    if delay.is_zero() {
        return;
    }
    info!("Waiting {}s {}", delay.as_secs(), reason);
    tokio::time::sleep(delay).await;
}
