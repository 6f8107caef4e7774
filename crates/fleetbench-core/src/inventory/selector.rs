//! Host selectors used by plan steps and artifact specs.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the implicit group containing every host.
pub const ALL_GROUP: &str = "all";

/// Chooses a set of hosts from the inventory.
///
/// Written in plan files as a string: `servers`, `all`, `tag:client`, or a
/// comma-separated union such as `servers,tag:gpu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GroupSelector {
    /// Every host, in declaration order.
    All,
    /// A named group, including nested children.
    Group(String),
    /// Hosts carrying a role tag.
    Tag(String),
    /// Union of several selectors, first occurrence wins for ordering.
    Union(Vec<GroupSelector>),
}

impl GroupSelector {
    /// Selects a named group.
    pub fn group(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == ALL_GROUP { Self::All } else { Self::Group(name) }
    }

    fn parse_term(term: &str) -> Result<Self, ConfigError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(ConfigError::InvalidSelector("empty selector".to_string()));
        }
        if let Some(tag) = term.strip_prefix("tag:") {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(ConfigError::InvalidSelector(term.to_string()));
            }
            return Ok(Self::Tag(tag.to_string()));
        }
        if term.contains(char::is_whitespace) || term.contains(':') {
            return Err(ConfigError::InvalidSelector(term.to_string()));
        }
        Ok(Self::group(term))
    }
}

impl FromStr for GroupSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(',') {
            let terms = s.split(',').map(Self::parse_term).collect::<Result<Vec<_>, _>>()?;
            Ok(Self::Union(terms))
        } else {
            Self::parse_term(s)
        }
    }
}

impl TryFrom<String> for GroupSelector {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GroupSelector> for String {
    fn from(selector: GroupSelector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for GroupSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "{}", ALL_GROUP),
            Self::Group(name) => write!(f, "{}", name),
            Self::Tag(tag) => write!(f, "tag:{}", tag),
            Self::Union(terms) => {
                let parts: Vec<String> = terms.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selectors() {
        assert_eq!("all".parse::<GroupSelector>().unwrap(), GroupSelector::All);
        assert_eq!(
            "servers".parse::<GroupSelector>().unwrap(),
            GroupSelector::Group("servers".to_string())
        );
        assert_eq!(
            "tag:client".parse::<GroupSelector>().unwrap(),
            GroupSelector::Tag("client".to_string())
        );
        assert_eq!(
            "servers, tag:gpu".parse::<GroupSelector>().unwrap(),
            GroupSelector::Union(vec![
                GroupSelector::Group("servers".to_string()),
                GroupSelector::Tag("gpu".to_string()),
            ])
        );
    }

    #[test]
    fn test_rejects_bad_selectors() {
        assert!("".parse::<GroupSelector>().is_err());
        assert!("tag:".parse::<GroupSelector>().is_err());
        assert!("two words".parse::<GroupSelector>().is_err());
        assert!("servers,".parse::<GroupSelector>().is_err());
    }

    #[test]
    fn test_display_matches_input() {
        for input in ["all", "targets", "tag:server", "servers,tag:gpu"] {
            assert_eq!(input.parse::<GroupSelector>().unwrap().to_string(), input);
        }
    }
}
