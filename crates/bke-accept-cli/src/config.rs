//! Acceptance run configuration.
//!
//! Settings live in a JSON file; every field is optional and falls back to
//! the defaults for a stock BKE install.
//!
//! The config file resolution chain (highest priority first):
//! 1. Explicit `--config` flag
//! 2. `BKE_ACCEPT_CONFIG` environment variable
//! 3. `~/.bke-accept/config.json`
//! 4. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use bke_accept_common::poll::PollConfig;
use bke_accept_common::spec_doc::NodeEntry;
use bke_accept_common::DEFAULT_ANNOTATION_PREFIX;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".bke-accept";
const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_ENV: &str = "BKE_ACCEPT_CONFIG";

/// Context name kubeadm writes into the admin kubeconfig of a BKE cluster
pub const DEFAULT_CONTEXT: &str = "bke-cluster-kubernetes-admin@bke-cluster";

/// Everything an acceptance run needs to know about its target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcceptanceConfig {
    /// Name of the BKECluster resource
    pub cluster_name: String,
    /// Namespace holding the BKECluster resource
    pub namespace: String,
    /// Resource kind as passed to kubectl
    pub resource_kind: String,
    /// Manifest the cluster is created from and deleted with
    pub manifest: PathBuf,
    /// Bootstrap program and arguments; the manifest path is appended
    pub bootstrap_command: Vec<String>,
    /// Captured output log
    pub capture_log: PathBuf,
    /// Test report
    pub report: PathBuf,
    /// Context selected from the admin kubeconfig
    pub kube_context: Option<String>,
    /// Prefix of the BKECluster annotations
    pub annotation_prefix: String,
    /// Prefix of per-node lines in bootstrap output
    pub node_log_marker: String,
    /// Text in a node line that marks the node as not ready
    pub node_not_ready_text: String,
    /// Node removed and re-added by the scale phases
    pub scale_node: String,
    /// Entry to add back during scale-up; defaults to the removed entry
    pub scale_node_entry: Option<NodeEntry>,
    /// Admin credential retrieval
    pub credentials: CredentialConfig,
    /// Delays and timeouts
    pub timing: TimingConfig,
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            cluster_name: "bke-cluster".to_string(),
            namespace: "bke-cluster".to_string(),
            resource_kind: "bkecluster".to_string(),
            manifest: PathBuf::from("bkecluster.yaml"),
            bootstrap_command: ["bke", "cluster", "create", "-f"]
                .map(str::to_string)
                .to_vec(),
            capture_log: PathBuf::from("logs.yaml"),
            report: PathBuf::from("test.yaml"),
            kube_context: Some(DEFAULT_CONTEXT.to_string()),
            annotation_prefix: DEFAULT_ANNOTATION_PREFIX.to_string(),
            node_log_marker: "[bke-node]".to_string(),
            node_not_ready_text: "Node is not ready".to_string(),
            scale_node: "worker-3".to_string(),
            scale_node_entry: None,
            credentials: CredentialConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Where the admin kubeconfig comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialConfig {
    /// Control plane host to copy the kubeconfig from. When unset, the
    /// first master entry in the manifest is used.
    pub control_plane_host: Option<String>,
    /// SSH user on the control plane host
    pub ssh_user: String,
    /// Environment variable holding the SSH password (uses sshpass when set)
    pub password_env: String,
    /// Kubeconfig path on the control plane host
    pub remote_path: String,
    /// Local path the kubeconfig is copied to
    pub local_path: PathBuf,
    /// Server address written by kubeadm, replaced by the host address
    pub loopback_server: String,
    /// API server port on the control plane host
    pub api_port: u16,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            control_plane_host: None,
            ssh_user: "root".to_string(),
            password_env: "BKE_SSH_PASSWORD".to_string(),
            remote_path: "/etc/kubernetes/admin.conf".to_string(),
            local_path: PathBuf::from("admin.conf"),
            loopback_server: "https://127.0.0.1:6443".to_string(),
            api_port: 6443,
        }
    }
}

/// Delays and timeouts, in seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after bootstrap before the first check
    pub settle_after_create_secs: u64,
    /// Wait after each scale patch before polling
    pub settle_after_patch_secs: u64,
    /// Total poll window per scale phase
    pub poll_timeout_secs: u64,
    /// Interval between snapshots
    pub poll_interval_secs: u64,
    /// Timeout of a single kubectl invocation
    pub kubectl_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_after_create_secs: 60,
            settle_after_patch_secs: 30,
            poll_timeout_secs: 300,
            poll_interval_secs: 30,
            kubectl_timeout_secs: 60,
        }
    }
}

impl TimingConfig {
    pub fn settle_after_create(&self) -> Duration {
        Duration::from_secs(self.settle_after_create_secs)
    }

    pub fn settle_after_patch(&self) -> Duration {
        Duration::from_secs(self.settle_after_patch_secs)
    }

    pub fn kubectl_timeout(&self) -> Duration {
        Duration::from_secs(self.kubectl_timeout_secs)
    }

    /// Validated poll settings
    pub fn poll(&self) -> Result<PollConfig> {
        Ok(PollConfig::new(
            Duration::from_secs(self.poll_timeout_secs),
            Duration::from_secs(self.poll_interval_secs),
        )?)
    }
}

impl AcceptanceConfig {
    /// Check every field before any side effect happens
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(Error::validation("cluster_name must not be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::validation("namespace must not be empty"));
        }
        if self.resource_kind.trim().is_empty() {
            return Err(Error::validation("resource_kind must not be empty"));
        }
        if self.bootstrap_command.is_empty() {
            return Err(Error::validation("bootstrap_command must name a program"));
        }
        if self.scale_node.trim().is_empty() {
            return Err(Error::validation("scale_node must not be empty"));
        }
        if let Some(entry) = &self.scale_node_entry {
            if entry.hostname != self.scale_node {
                return Err(Error::validation(format!(
                    "scale_node_entry hostname {} does not match scale_node {}",
                    entry.hostname, self.scale_node
                )));
            }
        }
        if self.timing.kubectl_timeout_secs == 0 {
            return Err(Error::validation("kubectl_timeout_secs must be greater than zero"));
        }
        self.timing
            .poll()
            .map_err(|e| Error::validation(e.to_string()))?;
        Ok(())
    }
}

/// Path to `~/.bke-accept/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Resolve the config file path using the priority chain.
///
/// Returns `None` when no file applies and defaults should be used.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path().filter(|path| path.exists())
}

/// Load the configuration through the resolution chain.
///
/// A path named explicitly (flag or environment) must exist. Callers
/// validate after applying their flag overrides.
pub fn load_config(explicit: Option<&Path>) -> Result<AcceptanceConfig> {
    match resolve_config_path(explicit) {
        Some(path) => load_config_from(&path),
        None => {
            debug!("No config file found, using defaults");
            Ok(AcceptanceConfig::default())
        }
    }
}

/// Load one config file
pub fn load_config_from(path: &Path) -> Result<AcceptanceConfig> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::command_failed(format!("failed to read {}: {}", path.display(), e)))?;
    let config = serde_json::from_str(&data)?;
    debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn defaults_match_a_stock_install() {
        let config = AcceptanceConfig::default();
        assert_eq!(config.cluster_name, "bke-cluster");
        assert_eq!(config.namespace, "bke-cluster");
        assert_eq!(config.scale_node, "worker-3");
        assert_eq!(config.kube_context.as_deref(), Some(DEFAULT_CONTEXT));
        assert_eq!(config.timing.poll().unwrap().attempts(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"scale_node": "worker-2", "timing": {"poll_timeout_secs": 120}}"#,
        );

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.scale_node, "worker-2");
        assert_eq!(config.timing.poll_timeout_secs, 120);
        assert_eq!(config.timing.poll_interval_secs, 30);
        assert_eq!(config.report, PathBuf::from("test.yaml"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/config.json"))).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn resolve_explicit_wins() {
        let result = resolve_config_path(Some(Path::new("/explicit/config.json")));
        assert_eq!(result, Some(PathBuf::from("/explicit/config.json")));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "{not json");
        assert!(matches!(load_config(Some(&path)), Err(Error::Json(_))));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = AcceptanceConfig::default();
        config.timing.poll_interval_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Validation { .. })));
    }

    #[test]
    fn interval_longer_than_timeout_is_rejected() {
        let mut config = AcceptanceConfig::default();
        config.timing.poll_timeout_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_namespace_is_rejected() {
        let config = AcceptanceConfig {
            namespace: " ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn scale_entry_must_match_scale_node() {
        let config = AcceptanceConfig {
            scale_node_entry: Some(NodeEntry {
                hostname: "worker-9".to_string(),
                ip: "10.50.8.59".to_string(),
                password: None,
                port: "22".to_string(),
                role: vec!["node".to_string()],
                username: "root".to_string(),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
