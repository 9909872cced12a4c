//! Convergence engine for BKE cluster acceptance runs
//!
//! # Modules
//!
//! - [`age`] - Elapsed-age labels
//! - [`status`] - Node/pod classification and table rendering
//! - [`report`] - Incrementally written test report
//! - [`capture`] - Captured command output log (file + console)
//! - [`spec_doc`] - Structured edits on the cluster spec document
//! - [`patcher`] - Read-modify-write cycles against a spec store
//! - [`kubectl`] - `kubectl`-backed spec store
//! - [`kube_utils`] - Kube client construction and cluster queries
//! - [`poll`] - Poll-until-converged protocol
//! - [`error`] - Infrastructure error type

#![deny(missing_docs)]

pub mod age;
pub mod capture;
pub mod error;
pub mod kube_utils;
pub mod kubectl;
pub mod patcher;
pub mod poll;
pub mod report;
pub mod spec_doc;
pub mod status;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label prefix that marks a node role (`node-role.kubernetes.io/<role>`)
pub const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Role column value for nodes without any role label
pub const NO_ROLE: &str = "<none>";

/// Default annotation prefix on the BKECluster resource
pub const DEFAULT_ANNOTATION_PREFIX: &str = "bke.bocloud.com/";

/// Annotation (after the prefix) listing node addresses to drain and remove
pub const APPOINTMENT_DELETED_NODES: &str = "appointment-deleted-nodes";
