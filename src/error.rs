//! # Errors
//!
//! Error type shared by the harness library.
//!
//! Teardown swallows every kind except [`HarnessError::Cancelled`], so
//! callers classify with [`HarnessError::is_cancellation`] rather than
//! matching on messages.

use thiserror::Error;

/// Result alias for harness operations
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// A shell command ran but exited unsuccessfully
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// A shell command could not be started at all
    #[error("Failed to spawn `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("docker binary not found in PATH: {0}")]
    DockerNotFound(String),

    /// etcd answered the registration PUT with a non-success status
    #[error("Route reflector registration rejected with HTTP {status}: {body}")]
    Registration { status: u16, body: String },

    #[error("HTTP request to key-value store failed: {0}")]
    Http(#[from] reqwest::Error),

    /// CA or client identity material could not be loaded
    #[error("Failed to load TLS material from {path}: {message}")]
    Tls { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A command that ignores the interrupt did not finish in time
    #[error("Command `{command}` timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("Cluster identifier for redundancy group {0} overflows the IPv4 address space")]
    ClusterIdOverflow(usize),

    /// Rotation was requested before setup or after every group was removed
    #[error("No redundancy groups available")]
    NoRedundancyGroups,

    #[error("Host {host} reported an invalid IP address: {value}")]
    InvalidHostIp { host: String, value: String },

    /// User-initiated interrupt; never swallowed by teardown
    #[error("Operation cancelled by user interrupt")]
    Cancelled,
}

impl HarnessError {
    /// Whether this error is a user-initiated cancellation
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, HarnessError::Cancelled)
    }
}
