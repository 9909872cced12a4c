//! Cluster creation and admin credential retrieval
//!
//! Bootstrap output is streamed line by line into the capture log so the
//! deploy and component checks can read it back afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bke_accept_common::capture::CaptureLog;
use bke_accept_common::kubectl::run_command;
use bke_accept_common::spec_doc::ClusterSpecDocument;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{AcceptanceConfig, CredentialConfig};
use crate::{Error, Result};

const MASTER_ROLE: &str = "master";

/// Run the bootstrap command against the manifest, teeing stdout and
/// stderr into `capture` as lines arrive.
pub async fn create_cluster(config: &AcceptanceConfig, capture: &mut CaptureLog) -> Result<()> {
    let (program, args) = config
        .bootstrap_command
        .split_first()
        .ok_or_else(|| Error::validation("bootstrap_command must name a program"))?;

    info!(manifest = %config.manifest.display(), "Creating cluster");
    let mut child = Command::new(program)
        .args(args)
        .arg(&config.manifest)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::command_failed(format!("failed to start {}: {}", program, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::command_failed("bootstrap stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::command_failed("bootstrap stderr not captured"))?;
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;

    loop {
        tokio::select! {
            line = out_lines.next_line(), if out_open => match line? {
                Some(line) => capture.write_line(&line)?,
                None => out_open = false,
            },
            line = err_lines.next_line(), if err_open => match line? {
                Some(line) => capture.write_line(&line)?,
                None => err_open = false,
            },
            else => break,
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(Error::command_failed(format!(
            "{} exited with {}",
            config.bootstrap_command.join(" "),
            status
        )));
    }
    info!("Cluster creation command finished");
    Ok(())
}

/// Admin kubeconfig on local disk.
///
/// Files fetched from the control plane are removed when the guard drops;
/// files supplied by the user are left alone.
#[derive(Debug)]
pub struct CredentialFile {
    path: PathBuf,
    remove_on_drop: bool,
}

impl CredentialFile {
    /// Wrap a kubeconfig the user supplied
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            remove_on_drop: false,
        }
    }

    /// Take ownership of a fetched kubeconfig
    pub fn fetched(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            remove_on_drop: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CredentialFile {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed credential file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove credential file"),
        }
    }
}

/// Host to fetch the admin kubeconfig from: the configured host, else the
/// address of the first master in the manifest
pub fn control_plane_host(config: &AcceptanceConfig) -> Result<String> {
    if let Some(host) = &config.credentials.control_plane_host {
        return Ok(host.clone());
    }
    let text = std::fs::read_to_string(&config.manifest).map_err(|e| {
        Error::command_failed(format!("failed to read {}: {}", config.manifest.display(), e))
    })?;
    let doc = ClusterSpecDocument::parse_with_prefix(&text, &config.annotation_prefix)?;
    doc.nodes()?
        .into_iter()
        .find(|node| node.role.iter().any(|r| r == MASTER_ROLE))
        .map(|node| node.ip)
        .ok_or_else(|| {
            Error::validation(format!(
                "{} lists no {} node; set credentials.control_plane_host",
                config.manifest.display(),
                MASTER_ROLE
            ))
        })
}

/// Copy the admin kubeconfig from `host` and point it at the host address
pub async fn fetch_credentials(
    creds: &CredentialConfig,
    host: &str,
    timeout: Duration,
) -> Result<CredentialFile> {
    let password = std::env::var(&creds.password_env)
        .ok()
        .filter(|p| !p.is_empty());

    let (program, args) = copy_command(creds, host, password.is_some());
    let mut cmd = Command::new(program);
    cmd.args(&args);
    if let Some(password) = &password {
        cmd.env("SSHPASS", password);
    }
    info!(host, "Fetching admin kubeconfig");
    run_command(&mut cmd, "scp admin kubeconfig", timeout).await?;

    let guard = CredentialFile::fetched(&creds.local_path);
    let text = std::fs::read_to_string(guard.path())?;
    let server = format!("https://{}:{}", host, creds.api_port);
    match rewrite_server(&text, &creds.loopback_server, &server) {
        Some(rewritten) => std::fs::write(guard.path(), rewritten)?,
        None => warn!(
            loopback = %creds.loopback_server,
            "Kubeconfig does not use the loopback server, leaving it unchanged"
        ),
    }
    Ok(guard)
}

/// Program and arguments copying the remote kubeconfig. With a password the
/// copy runs through `sshpass -e`, which reads it from `SSHPASS`.
fn copy_command(creds: &CredentialConfig, host: &str, with_password: bool) -> (&'static str, Vec<String>) {
    let mut args = Vec::new();
    if with_password {
        args.push("-e".to_string());
        args.push("scp".to_string());
    }
    args.extend(["-o", "StrictHostKeyChecking=no"].map(str::to_string));
    if !with_password {
        args.extend(["-o", "BatchMode=yes"].map(str::to_string));
    }
    args.push(format!("{}@{}:{}", creds.ssh_user, host, creds.remote_path));
    args.push(creds.local_path.to_string_lossy().into_owned());
    (if with_password { "sshpass" } else { "scp" }, args)
}

/// Replace the first `server: <loopback>` entry with `server: <server>`.
/// Returns `None` when the loopback entry is absent.
pub fn rewrite_server(kubeconfig: &str, loopback: &str, server: &str) -> Option<String> {
    let from = format!("server: {}", loopback);
    kubeconfig
        .contains(&from)
        .then(|| kubeconfig.replacen(&from, &format!("server: {}", server), 1))
}
