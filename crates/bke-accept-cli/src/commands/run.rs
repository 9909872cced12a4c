//! `bke-accept run`: create the cluster and put it through every phase

use std::fs::File;
use std::path::{Path, PathBuf};

use bke_accept_common::capture::CaptureLog;
use bke_accept_common::report::{Marker, ReportWriter};
use clap::Args;
use tracing::{info, warn};

use super::bootstrap::{control_plane_host, create_cluster, fetch_credentials, CredentialFile};
use super::{cluster_query, settle, spec_store};
use crate::config::{load_config, AcceptanceConfig};
use crate::orchestrator::{Orchestrator, RunSettings};
use crate::Result;

/// Run the full lifecycle acceptance test
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Use an existing admin kubeconfig instead of fetching one from the control plane
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Node removed and re-added by the scale phases
    #[arg(long, env = "BKE_ACCEPT_SCALE_NODE")]
    pub scale_node: Option<String>,

    /// Total poll window per scale phase, in seconds
    #[arg(long)]
    pub poll_timeout_secs: Option<u64>,

    /// Interval between snapshots, in seconds
    #[arg(long)]
    pub poll_interval_secs: Option<u64>,

    /// Test an existing cluster instead of creating one
    #[arg(long)]
    pub skip_create: bool,

    /// Keep the capture log after the run
    #[arg(long)]
    pub keep_artifacts: bool,
}

impl RunArgs {
    /// Apply flag overrides on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut AcceptanceConfig) {
        if let Some(context) = &self.context {
            config.kube_context = Some(context.clone());
        }
        if let Some(node) = &self.scale_node {
            config.scale_node = node.clone();
        }
        if let Some(secs) = self.poll_timeout_secs {
            config.timing.poll_timeout_secs = secs;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.timing.poll_interval_secs = secs;
        }
    }
}

/// Run the acceptance test
pub async fn run(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    args.apply_overrides(&mut config);
    config.validate()?;
    let settings = RunSettings::from_config(&config, args.keep_artifacts)?;

    let mut capture = CaptureLog::create(&config.capture_log)?;
    if args.skip_create {
        info!("Skipping cluster creation");
    } else {
        create_cluster(&config, &mut capture).await?;
        settle(
            config.timing.settle_after_create(),
            "for the new cluster to settle",
        )
        .await;
    }

    let credentials = match &args.kubeconfig {
        Some(path) => CredentialFile::existing(path),
        None => {
            let host = control_plane_host(&config)?;
            fetch_credentials(&config.credentials, &host, config.timing.kubectl_timeout()).await?
        }
    };

    let query = cluster_query(&config, Some(credentials.path())).await?;
    let store = spec_store(&config, Some(credentials.path()));
    let report = ReportWriter::new(File::create(&config.report)?);

    let result = Orchestrator::new(query, store, capture, report, settings)
        .run()
        .await?;
    drop(credentials);

    let failed: Vec<&str> = result
        .report
        .sections
        .iter()
        .filter(|s| s.marker == Some(Marker::Failed))
        .map(|s| s.header.as_str())
        .collect();
    if failed.is_empty() {
        info!(report = %config.report.display(), "All phases passed");
    } else {
        warn!(report = %config.report.display(), failed = ?failed, "Some phases failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_given_fields() {
        let args = RunArgs {
            scale_node: Some("worker-2".to_string()),
            poll_interval_secs: Some(10),
            ..Default::default()
        };
        let mut config = AcceptanceConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.scale_node, "worker-2");
        assert_eq!(config.timing.poll_interval_secs, 10);
        assert_eq!(config.timing.poll_timeout_secs, 300);
        assert_eq!(
            config.kube_context.as_deref(),
            Some(crate::config::DEFAULT_CONTEXT)
        );
    }

    #[test]
    fn context_override_wins() {
        let args = RunArgs {
            context: Some("kind-dev".to_string()),
            ..Default::default()
        };
        let mut config = AcceptanceConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.kube_context.as_deref(), Some("kind-dev"));
    }
}
