//! `kubectl`-backed spec store
//!
//! Fetches, applies and deletes the BKECluster resource through the
//! `kubectl` binary. Documents being applied are written to a temporary
//! file that is removed as soon as the command returns.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::patcher::SpecStore;
use crate::{Error, Result};

/// Default timeout for a single kubectl invocation
pub const DEFAULT_KUBECTL_TIMEOUT: Duration = Duration::from_secs(60);

/// Identifies the cluster resource managed through kubectl
#[derive(Clone, Debug)]
pub struct KubectlTarget {
    /// Resource kind as understood by kubectl (e.g., `bkecluster`)
    pub resource: String,
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
    /// Manifest the cluster was created from, used for deletion
    pub manifest: PathBuf,
}

/// [`SpecStore`] that shells out to kubectl
#[derive(Clone, Debug)]
pub struct KubectlSpecStore {
    target: KubectlTarget,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    timeout: Duration,
}

impl KubectlSpecStore {
    /// Store for `target` using kubectl's default kubeconfig resolution
    pub fn new(target: KubectlTarget) -> Self {
        Self {
            target,
            kubeconfig: None,
            context: None,
            timeout: DEFAULT_KUBECTL_TIMEOUT,
        }
    }

    /// Use an explicit kubeconfig file
    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    /// Use a specific kubeconfig context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Override the per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments selecting kubeconfig and context, shared by every call
    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args
    }

    fn get_args(&self) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(
            [
                "get",
                &self.target.resource,
                &self.target.name,
                "-n",
                &self.target.namespace,
                "-o",
                "yaml",
            ]
            .map(str::to_string),
        );
        args
    }

    async fn run(&self, description: &str, args: Vec<String>) -> Result<String> {
        let mut cmd = Command::new("kubectl");
        cmd.args(&args);
        run_command(&mut cmd, description, self.timeout).await
    }
}

#[async_trait]
impl SpecStore for KubectlSpecStore {
    async fn fetch(&self) -> Result<String> {
        self.run("kubectl get", self.get_args()).await
    }

    async fn apply(&self, document: &str) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("cluster-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(document.as_bytes())?;
        file.flush()?;

        let mut args = self.base_args();
        args.push("apply".to_string());
        args.push("-f".to_string());
        args.push(file.path().to_string_lossy().into_owned());
        let output = self.run("kubectl apply", args).await?;
        info!(resource = %self.target.resource, name = %self.target.name, "Applied cluster spec");
        Ok(output)
    }

    async fn delete(&self) -> Result<String> {
        let mut args = self.base_args();
        args.push("delete".to_string());
        args.push("-f".to_string());
        args.push(self.target.manifest.to_string_lossy().into_owned());
        let output = self.run("kubectl delete", args).await?;
        info!(manifest = %self.target.manifest.display(), "Deleted cluster");
        Ok(output)
    }
}

/// Run a command to completion, returning stdout.
///
/// Non-zero exit maps to [`Error::Command`] carrying stderr.
pub async fn run_command(cmd: &mut Command, description: &str, timeout: Duration) -> Result<String> {
    debug!("{}", description);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            warn!("{} timed out after {:?}", description, timeout);
            Error::CommandTimeout {
                program: description.to_string(),
                seconds: timeout.as_secs(),
            }
        })??;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("{} failed: {}", description, stderr);
        Err(Error::command(description, stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> KubectlTarget {
        KubectlTarget {
            resource: "bkecluster".to_string(),
            name: "bke-cluster".to_string(),
            namespace: "bke-cluster".to_string(),
            manifest: PathBuf::from("bkecluster.yaml"),
        }
    }

    #[test]
    fn get_args_without_kubeconfig() {
        let store = KubectlSpecStore::new(target());
        assert_eq!(
            store.get_args(),
            ["get", "bkecluster", "bke-cluster", "-n", "bke-cluster", "-o", "yaml"]
        );
    }

    #[test]
    fn get_args_with_kubeconfig_and_context() {
        let store = KubectlSpecStore::new(target())
            .with_kubeconfig("/tmp/admin.conf")
            .with_context("bke-cluster-kubernetes-admin@bke-cluster");
        let args = store.get_args();
        assert_eq!(&args[..4], [
            "--kubeconfig",
            "/tmp/admin.conf",
            "--context",
            "bke-cluster-kubernetes-admin@bke-cluster"
        ]);
        assert_eq!(args[4], "get");
    }

    #[tokio::test]
    async fn run_command_returns_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo configured"]);
        let out = run_command(&mut cmd, "sh echo", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.trim(), "configured");
    }

    #[tokio::test]
    async fn run_command_maps_failure_to_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 'not found' >&2; exit 1"]);
        let err = run_command(&mut cmd, "sh fail", Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            Error::Command { program, stderr } => {
                assert_eq!(program, "sh fail");
                assert_eq!(stderr, "not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_command_times_out() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        cmd.kill_on_drop(true);
        let err = run_command(&mut cmd, "sh sleep", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
    }
}
