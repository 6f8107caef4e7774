//! Error types for inventory and plan configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating an inventory or plan.
///
/// Every variant is a configuration-level error: it is detected before any
/// remote call is made and aborts the whole run.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A selector or `children` entry names a group absent from the inventory.
    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    /// A group lists a host that is not declared under `hosts`.
    #[error("Group '{group}' references unknown host '{host}'")]
    UnknownHost {
        /// Group containing the bad reference.
        group: String,
        /// Host name that could not be found.
        host: String,
    },

    /// Nested groups form a cycle.
    #[error("Group cycle detected: {0}")]
    GroupCycle(String),

    /// A host or group uses a name reserved by fleetbench.
    #[error("'{0}' is a reserved name")]
    ReservedName(String),

    /// A step marked `require_nonempty` resolved to zero hosts.
    #[error("Step '{step}' requires at least one host but '{selector}' resolved to none")]
    EmptySelection {
        /// Step name.
        step: String,
        /// Selector as written in the plan.
        selector: String,
    },

    /// Two artifact collections would write the same local file.
    #[error(
        "Artifact '{first}' on '{first_host}' and artifact '{second}' on '{second_host}' \
         would both be saved as '{local_name}'"
    )]
    DuplicateArtifact {
        local_name: String,
        first: String,
        first_host: String,
        second: String,
        second_host: String,
    },

    /// A host selector could not be parsed.
    #[error("Invalid host selector: {0}")]
    InvalidSelector(String),

    /// A `when` expression could not be parsed.
    #[error("Invalid condition '{expr}': {reason}")]
    InvalidCondition {
        /// Expression as written.
        expr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Failed to read a plan, inventory or config file.
    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("Failed to parse {}: {source}", display_path(.path.as_ref()))]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_yaml::Error,
    },

    /// Failed to serialize a plan back to YAML.
    #[error("Failed to serialize plan: {0}")]
    Serialize(#[source] serde_yaml::Error),

    /// Any other invalid configuration.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn display_path(path: Option<&PathBuf>) -> String {
    path.map_or_else(|| "<inline>".to_string(), |p| p.display().to_string())
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_group_message() {
        let err = ConfigError::UnknownGroup("targets".to_string());
        assert_eq!(err.to_string(), "Unknown group: targets");
    }

    #[test]
    fn test_parse_error_without_path_says_inline() {
        let source = serde_yaml::from_str::<u32>("not a number").unwrap_err();
        let err = ConfigError::Parse { path: None, source };
        assert!(err.to_string().starts_with("Failed to parse <inline>"));
    }

    #[test]
    fn test_empty_selection_names_step() {
        let err = ConfigError::EmptySelection {
            step: "start server".to_string(),
            selector: "servers".to_string(),
        };
        assert!(err.to_string().contains("start server"));
        assert!(err.to_string().contains("servers"));
    }
}
