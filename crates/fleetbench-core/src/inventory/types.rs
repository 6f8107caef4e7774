//! Inventory file structures and runtime host records.

use crate::vars::Vars;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How fleetbench reaches a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    /// Remote shell via the system `ssh` client.
    #[default]
    Ssh,
    /// Run on the controller itself with `sh -c`.
    Local,
}

impl Connection {
    fn is_default(&self) -> bool {
        *self == Self::Ssh
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh => write!(f, "ssh"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A host entry as written in the inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostDef {
    /// Address to connect to. Defaults to the host name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Connection::is_default")]
    pub connection: Connection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,

    /// Role tags such as `server`, `client` or `target`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,
}

/// A group entry as written in the inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupDef {
    /// Member host names, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    /// Nested group names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,
}

/// Parsed inventory mapping: hosts, groups and global variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryDef {
    /// Global defaults, lowest inventory precedence.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,

    #[serde(default)]
    pub hosts: IndexMap<String, HostDef>,

    #[serde(default)]
    pub groups: IndexMap<String, GroupDef>,
}

/// A resolved host, immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub name: String,
    pub address: String,
    pub connection: Connection,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
    pub tags: Vec<String>,
    pub vars: Vars,
}

impl Host {
    /// Builds a host from its inventory entry.
    pub fn from_def(name: &str, def: &HostDef) -> Self {
        Self {
            name: name.to_string(),
            address: def.address.clone().unwrap_or_else(|| name.to_string()),
            connection: def.connection,
            user: def.user.clone(),
            port: def.port,
            identity_file: def.identity_file.clone(),
            tags: def.tags.clone(),
            vars: def.vars.clone(),
        }
    }

    /// Convenience constructor for a host run on the controller.
    pub fn local(name: &str) -> Self {
        Self::from_def(
            name,
            &HostDef {
                connection: Connection::Local,
                ..HostDef::default()
            },
        )
    }

    /// Returns `true` if the host carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// `user@address`, or just the address when no user is configured.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
