//! `bke-accept patch`: preview a spec edit on a local file
//!
//! The edited document is printed, never applied, so the scale and delete
//! edits can be checked against a real BKECluster dump before a run.

use std::path::{Path, PathBuf};

use bke_accept_common::spec_doc::{ClusterSpecDocument, NodeEntry, ProtectionFlag};
use clap::{Args, Subcommand};

use crate::config::load_config;
use crate::{Error, Result};

/// Print a cluster spec with one edit applied
#[derive(Args, Debug)]
pub struct PatchArgs {
    /// Cluster spec file (e.g. the output of `kubectl get bkecluster -o yaml`)
    pub file: PathBuf,

    #[command(subcommand)]
    pub edit: PatchEdit,
}

/// Edit to preview
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PatchEdit {
    /// Remove a node and schedule its address for deletion
    RemoveNode {
        /// Hostname of the node entry
        hostname: String,
    },
    /// Add a node entry
    AddNode {
        /// Hostname of the new node
        hostname: String,

        /// Address of the new node
        #[arg(long)]
        ip: String,

        /// Roles, comma separated
        #[arg(long, value_delimiter = ',', default_value = "node")]
        role: Vec<String>,

        /// Login user
        #[arg(long, default_value = "root")]
        username: String,

        /// SSH port
        #[arg(long, default_value = "22")]
        port: String,

        /// Login password as BKE stores it
        #[arg(long)]
        password: Option<String>,
    },
    /// Set a protection annotation
    Protect {
        /// ignore-namespace-delete or ignore-target-cluster-delete
        flag: String,

        /// New value
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

/// Run the patch command
pub async fn run(args: PatchArgs, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let text = std::fs::read_to_string(&args.file).map_err(|e| {
        Error::command_failed(format!("failed to read {}: {}", args.file.display(), e))
    })?;
    print!("{}", apply_edit(&text, &config.annotation_prefix, &args.edit)?);
    Ok(())
}

/// Apply `edit` to a spec document and return the document as it would be
/// submitted
pub fn apply_edit(text: &str, annotation_prefix: &str, edit: &PatchEdit) -> Result<String> {
    let mut doc = ClusterSpecDocument::parse_with_prefix(text, annotation_prefix)?;
    match edit {
        PatchEdit::RemoveNode { hostname } => {
            doc.remove_node(hostname)?;
        }
        PatchEdit::AddNode {
            hostname,
            ip,
            role,
            username,
            port,
            password,
        } => doc.add_node(&NodeEntry {
            hostname: hostname.clone(),
            ip: ip.clone(),
            password: password.clone(),
            port: port.clone(),
            role: role.clone(),
            username: username.clone(),
        })?,
        PatchEdit::Protect { flag, enabled } => {
            let flag = ProtectionFlag::from_name(flag).ok_or_else(|| {
                Error::validation(format!(
                    "unknown protection flag {}, expected one of: {}",
                    flag,
                    ProtectionFlag::ALL.map(|f| f.name()).join(", ")
                ))
            })?;
            doc.set_protection(flag, *enabled)?;
        }
    }
    doc.strip_server_metadata();
    Ok(doc.to_yaml()?)
}
