//! `bke-accept get`: print one classified snapshot

use std::path::{Path, PathBuf};

use bke_accept_common::kube_utils::ClusterQuery;
use bke_accept_common::status::{render_node_table, render_pod_table};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};

use super::cluster_query;
use crate::config::load_config;
use crate::Result;

/// Print node or pod tables the way the acceptance run records them
#[derive(Args, Debug)]
pub struct GetArgs {
    #[command(subcommand)]
    pub resource: GetResource,

    /// Path to kubeconfig file (default: $KUBECONFIG or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use (default: the configured context)
    #[arg(long, global = true)]
    pub context: Option<String>,
}

/// Resource to get
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetResource {
    /// Every node with status, roles, age and version
    Nodes,
    /// Every pod across all namespaces
    Pods,
}

/// Run the get command
pub async fn run(args: GetArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if args.context.is_some() {
        config.kube_context = args.context.clone();
    }
    let query = cluster_query(&config, args.kubeconfig.as_deref()).await?;
    print!("{}", render(&query, args.resource, &Utc::now()).await?);
    Ok(())
}

/// Render the requested table from a single query
pub async fn render<Q: ClusterQuery + ?Sized>(
    query: &Q,
    resource: GetResource,
    now: &DateTime<Utc>,
) -> Result<String> {
    Ok(match resource {
        GetResource::Nodes => render_node_table(&query.list_nodes().await?, now),
        GetResource::Pods => render_pod_table(&query.list_pods().await?, now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bke_accept_common::status::{NodeRecord, PodRecord, NODE_TABLE_HEADER, POD_TABLE_HEADER};

    struct FixedQuery;

    #[async_trait]
    impl ClusterQuery for FixedQuery {
        async fn list_nodes(&self) -> bke_accept_common::Result<Vec<NodeRecord>> {
            Ok(vec![NodeRecord {
                name: "master-1".to_string(),
                ready: true,
                roles: ["master".to_string()].into(),
                created_at: None,
                version: "v1.31.0".to_string(),
            }])
        }

        async fn list_pods(&self) -> bke_accept_common::Result<Vec<PodRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn nodes_render_header_and_rows() {
        let text = render(&FixedQuery, GetResource::Nodes, &Utc::now())
            .await
            .unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(NODE_TABLE_HEADER));
        let row: Vec<&str> = lines.next().unwrap().split_whitespace().collect();
        assert_eq!(&row[..3], ["master-1", "Ready", "master"]);
    }

    #[tokio::test]
    async fn empty_pod_list_renders_only_the_header() {
        let text = render(&FixedQuery, GetResource::Pods, &Utc::now())
            .await
            .unwrap();
        assert_eq!(text, format!("{}\n", POD_TABLE_HEADER));
    }
}
