// Error types for orchestration

use crate::lifecycle::DriverState;
use fleetbench_core::{ConfigError, TemplateError};
use std::time::Duration;
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Run-level errors. Per-host failures never surface here; they are
/// recorded in the step report instead.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Invalid inventory or plan
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A command template references an undefined variable
    #[error("Unresolved variable '{variable}' in task '{task}' for host '{host}'")]
    UnresolvedVariable {
        /// Host the template was rendered for
        host: String,
        /// Task or artifact name
        task: String,
        /// Missing variable
        variable: String,
    },

    /// A command template is not well formed
    #[error("Task '{task}' for host '{host}': {source}")]
    Template {
        host: String,
        task: String,
        #[source]
        source: TemplateError,
    },

    /// Driver asked for a transition its state machine forbids
    #[error("Invalid driver transition from {from} to {to}")]
    InvalidTransition { from: DriverState, to: DriverState },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A host task could not be joined
    #[error("Host task join error: {0}")]
    Join(String),
}

impl OrchestrationError {
    pub(crate) fn from_template(host: &str, task: &str, error: TemplateError) -> Self {
        match error {
            TemplateError::UnresolvedVariable { name, .. } => Self::UnresolvedVariable {
                host: host.to_string(),
                task: task.to_string(),
                variable: name,
            },
            other => Self::Template {
                host: host.to_string(),
                task: task.to_string(),
                source: other,
            },
        }
    }

    /// Returns `true` for errors detected before any remote call.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnresolvedVariable { .. } | Self::Template { .. })
    }
}

/// Errors raised by a transport while talking to a host.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection itself failed
    #[error("Host '{host}' unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// The command outlived its timeout
    #[error("Command on '{host}' timed out after {}s", .after.as_secs())]
    TimedOut { host: String, after: Duration },

    /// A file transfer failed after connecting
    #[error("Transfer from '{host}' failed: {reason}")]
    Transfer { host: String, reason: String },

    /// Local process or filesystem error
    #[error("IO error for host '{host}': {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Errors raised while collecting an artifact from one host.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The remote path does not exist
    #[error("Artifact '{path}' missing on host '{host}'")]
    ArtifactMissing { host: String, path: String },

    /// The host could not be reached
    #[error("Host '{host}' unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// The copy itself failed
    #[error("Failed to transfer artifact from '{host}': {reason}")]
    Transfer { host: String, reason: String },

    /// The remote path template could not be rendered
    #[error("Artifact path: {0}")]
    Template(#[from] TemplateError),

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_template_maps_unresolved() {
        let err = OrchestrationError::from_template(
            "c1",
            "run fio",
            TemplateError::UnresolvedVariable {
                name: "iodepth".to_string(),
                template: "fio --iodepth={{ iodepth }}".to_string(),
            },
        );
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "Unresolved variable 'iodepth' in task 'run fio' for host 'c1'"
        );
    }

    #[test]
    fn test_io_is_not_config() {
        let err = OrchestrationError::from(std::io::Error::other("boom"));
        assert!(!err.is_config());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::TimedOut {
            host: "c1".to_string(),
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "Command on 'c1' timed out after 5s");
        assert!(!err.is_unreachable());
    }
}
