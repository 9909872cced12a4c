//! Error types for acceptance runs
//!
//! Every variant here is an infrastructure failure: the run cannot continue
//! and the error propagates to the caller. A cluster that simply fails to
//! converge in time is not an error, see [`crate::poll::PollOutcome`].

use thiserror::Error;

/// Main error type for the acceptance engine
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Reading or writing a local artifact failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The cluster spec document could not be parsed or serialized
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An external command ran but exited non-zero
    #[error("{program} failed: {stderr}")]
    Command {
        /// Program and subcommand that failed (e.g., "kubectl apply")
        program: String,
        /// Captured standard error
        stderr: String,
    },

    /// An external command did not finish in time
    #[error("{program} timed out after {seconds}s")]
    CommandTimeout {
        /// Program and subcommand that timed out
        program: String,
        /// Timeout that elapsed
        seconds: u64,
    },

    /// A structured edit could not find its target in the spec document
    #[error("spec patch error [{operation}]: {message}")]
    SpecPatch {
        /// Edit being applied (e.g., "remove-node")
        operation: String,
        /// What was missing or malformed
        message: String,
    },

    /// Invalid configuration value
    #[error("config error: {0}")]
    Config(String),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g., "create_client")
        context: String,
    },
}

impl Error {
    /// Create a spec patch error for the given edit operation
    pub fn spec_patch(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SpecPatch {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a command failure with captured stderr
    pub fn command(program: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }
}
