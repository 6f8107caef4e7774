//! Inventory model: hosts, nested groups and variable precedence.
//!
//! Host ordering is always declaration order so that repeated runs name and
//! collect results identically.

pub mod selector;
pub mod types;

pub use selector::{ALL_GROUP, GroupSelector};
pub use types::{Connection, GroupDef, Host, HostDef, InventoryDef};

use crate::error::{ConfigError, Result};
use crate::vars::{VarScope, Vars};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Validated inventory.
#[derive(Debug, Clone)]
pub struct Inventory {
    vars: Vars,
    hosts: IndexMap<String, Arc<Host>>,
    groups: IndexMap<String, GroupDef>,
    /// Per host: group names ordered from highest to lowest precedence.
    precedence: IndexMap<String, Vec<String>>,
}

impl Inventory {
    /// Validates an inventory definition.
    pub fn from_def(def: InventoryDef) -> Result<Self> {
        if def.groups.contains_key(ALL_GROUP) {
            return Err(ConfigError::ReservedName(ALL_GROUP.to_string()));
        }
        for name in def.hosts.keys() {
            if name.trim().is_empty() || name.contains(char::is_whitespace) {
                return Err(ConfigError::Invalid(format!("invalid host name '{}'", name)));
            }
        }

        for (group, group_def) in &def.groups {
            for host in &group_def.hosts {
                if !def.hosts.contains_key(host) {
                    return Err(ConfigError::UnknownHost {
                        group: group.clone(),
                        host: host.clone(),
                    });
                }
            }
            for child in &group_def.children {
                if !def.groups.contains_key(child) {
                    return Err(ConfigError::UnknownGroup(child.clone()));
                }
            }
        }
        detect_cycles(&def.groups)?;

        let hosts: IndexMap<String, Arc<Host>> = def
            .hosts
            .iter()
            .map(|(name, host_def)| (name.clone(), Arc::new(Host::from_def(name, host_def))))
            .collect();
        let precedence = hosts
            .keys()
            .map(|name| (name.clone(), group_precedence(name, &def.groups)))
            .collect();

        debug!(hosts = hosts.len(), groups = def.groups.len(), "Inventory loaded");

        Ok(Self {
            vars: def.vars,
            hosts,
            groups: def.groups,
            precedence,
        })
    }

    /// Loads and validates an inventory YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        let def: InventoryDef = serde_yaml::from_str(&content)
            .map_err(|source| ConfigError::Parse {
                path: Some(path.to_path_buf()),
                source,
            })?;
        Self::from_def(def)
    }

    /// All hosts in declaration order.
    pub fn hosts(&self) -> impl Iterator<Item = &Arc<Host>> {
        self.hosts.values()
    }

    /// Looks up a host by name.
    pub fn host(&self, name: &str) -> Option<&Arc<Host>> {
        self.hosts.get(name)
    }

    /// Declared group names, in declaration order.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Returns `true` if `name` is a declared group or `all`.
    pub fn has_group(&self, name: &str) -> bool {
        name == ALL_GROUP || self.groups.contains_key(name)
    }

    /// Resolves a selector to an ordered, duplicate-free host list.
    ///
    /// Fails with [`ConfigError::UnknownGroup`] if the selector names a group
    /// that is not declared. A known group with no members resolves to an
    /// empty list.
    pub fn resolve(&self, selector: &GroupSelector) -> Result<Vec<Arc<Host>>> {
        let mut names = IndexSet::new();
        self.collect(selector, &mut names)?;
        Ok(names.iter().map(|name| Arc::clone(&self.hosts[name.as_str()])).collect())
    }

    fn collect(&self, selector: &GroupSelector, out: &mut IndexSet<String>) -> Result<()> {
        match selector {
            GroupSelector::All => {
                out.extend(self.hosts.keys().cloned());
            }
            GroupSelector::Tag(tag) => {
                out.extend(self.hosts.values().filter(|h| h.has_tag(tag)).map(|h| h.name.clone()));
            }
            GroupSelector::Group(name) => {
                let group =
                    self.groups.get(name).ok_or_else(|| ConfigError::UnknownGroup(name.clone()))?;
                out.extend(group.hosts.iter().cloned());
                for child in &group.children {
                    self.collect(&GroupSelector::Group(child.clone()), out)?;
                }
            }
            GroupSelector::Union(terms) => {
                for term in terms {
                    self.collect(term, out)?;
                }
            }
        }
        Ok(())
    }

    /// Groups containing `host`, highest precedence first.
    pub fn groups_of(&self, host: &str) -> &[String] {
        self.precedence.get(host).map_or(&[], Vec::as_slice)
    }

    /// Resolves a variable for `host`: host vars, then groups by precedence,
    /// then inventory-wide vars, then `default`.
    pub fn lookup_var(&self, host: &Host, key: &str, default: Value) -> Value {
        if let Some(value) = host.vars.get(key) {
            return value.clone();
        }
        for group in self.groups_of(&host.name) {
            if let Some(value) = self.groups.get(group).and_then(|g| g.vars.get(key)) {
                return value.clone();
            }
        }
        self.vars.get(key).cloned().unwrap_or(default)
    }

    /// Builds the full variable scope for `host` on top of `base`.
    ///
    /// Layers, lowest first: `base`, inventory vars, groups by ascending
    /// precedence, host vars, and the host built-ins `inventory_hostname`,
    /// `host_address` and `host_tags`.
    pub fn scope_for(&self, host: &Host, base: &VarScope) -> VarScope {
        let mut scope = base.with_layer("inventory", self.vars.clone());
        for group in self.groups_of(&host.name).iter().rev() {
            if let Some(def) = self.groups.get(group) {
                scope = scope.with_layer(format!("group:{}", group), def.vars.clone());
            }
        }
        scope = scope.with_layer(format!("host:{}", host.name), host.vars.clone());

        let mut builtins = Vars::new();
        builtins.insert(
            "inventory_hostname".to_string(),
            Value::String(host.name.clone()),
        );
        builtins.insert(
            "host_address".to_string(),
            Value::String(host.address.clone()),
        );
        builtins.insert(
            "host_tags".to_string(),
            Value::Array(host.tags.iter().cloned().map(Value::String).collect()),
        );
        scope.with_layer("builtin", builtins)
    }
}

/// Orders the groups containing `host` by precedence.
///
/// Groups listing the host directly come first, later-declared groups ahead of
/// earlier ones. Their parents follow, one nesting level at a time.
fn group_precedence(host: &str, groups: &IndexMap<String, GroupDef>) -> Vec<String> {
    let mut ordered: IndexSet<String> = IndexSet::new();
    let mut level: Vec<String> = groups
        .iter()
        .rev()
        .filter(|(_, def)| def.hosts.iter().any(|h| h == host))
        .map(|(name, _)| name.clone())
        .collect();

    while !level.is_empty() {
        let mut next = Vec::new();
        for name in level {
            if ordered.insert(name.clone()) {
                next.extend(
                    groups
                        .iter()
                        .rev()
                        .filter(|(_, def)| def.children.contains(&name))
                        .map(|(parent, _)| parent.clone()),
                );
            }
        }
        level = next;
    }

    ordered.into_iter().collect()
}

fn detect_cycles(groups: &IndexMap<String, GroupDef>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        name: &str,
        groups: &IndexMap<String, GroupDef>,
        marks: &mut IndexMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                path.push(name.to_string());
                return Err(ConfigError::GroupCycle(path.join(" -> ")));
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::Visiting);
        path.push(name.to_string());
        if let Some(def) = groups.get(name) {
            for child in &def.children {
                visit(child, groups, marks, path)?;
            }
        }
        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }

    let mut marks = IndexMap::new();
    for name in groups.keys() {
        visit(name, groups, &mut marks, &mut Vec::new())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const INVENTORY: &str = r"
vars:
  duration: 10
  parallel: 4
hosts:
  s1:
    address: 10.0.0.1
    tags: [server]
  c1:
    address: 10.0.0.2
    tags: [client]
    vars:
      parallel: 16
  c2:
    address: 10.0.0.3
    tags: [client]
groups:
  servers:
    hosts: [s1]
  clients:
    hosts: [c1, c2]
    vars:
      duration: 30
  fast_clients:
    hosts: [c2]
    vars:
      duration: 60
  targets:
    children: [servers, clients]
    vars:
      iodepth: [1, 8]
";

    fn inventory() -> Inventory {
        Inventory::from_def(serde_yaml::from_str(INVENTORY).unwrap()).unwrap()
    }

    fn names(hosts: &[Arc<Host>]) -> Vec<&str> {
        hosts.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_resolve_nested_group_in_declaration_order() {
        let inv = inventory();
        let hosts = inv.resolve(&GroupSelector::group("targets")).unwrap();
        assert_eq!(names(&hosts), vec!["s1", "c1", "c2"]);
    }

    #[test]
    fn test_resolve_all_and_tags() {
        let inv = inventory();
        assert_eq!(names(&inv.resolve(&GroupSelector::All).unwrap()), vec!["s1", "c1", "c2"]);
        assert_eq!(
            names(&inv.resolve(&"tag:client".parse().unwrap()).unwrap()),
            vec!["c1", "c2"]
        );
    }

    #[test]
    fn test_resolve_union_deduplicates() {
        let inv = inventory();
        let hosts = inv.resolve(&"clients,targets".parse().unwrap()).unwrap();
        assert_eq!(names(&hosts), vec!["c1", "c2", "s1"]);
    }

    #[test]
    fn test_resolve_unknown_group_fails() {
        let err = inventory().resolve(&GroupSelector::group("gpus")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownGroup(name) if name == "gpus"));
    }

    #[test]
    fn test_lookup_var_precedence() {
        let inv = inventory();
        let c1 = inv.host("c1").unwrap();
        let c2 = inv.host("c2").unwrap();
        let s1 = inv.host("s1").unwrap();

        // host beats group beats global
        assert_eq!(inv.lookup_var(c1, "parallel", json!(1)), json!(16));
        assert_eq!(inv.lookup_var(c2, "parallel", json!(1)), json!(4));
        assert_eq!(inv.lookup_var(c1, "duration", json!(0)), json!(30));
        // later-declared direct group wins
        assert_eq!(inv.lookup_var(c2, "duration", json!(0)), json!(60));
        // parent group applies through children
        assert_eq!(inv.lookup_var(s1, "iodepth", json!(null)), json!([1, 8]));
        assert_eq!(inv.lookup_var(s1, "missing", json!("dflt")), json!("dflt"));
    }

    #[test]
    fn test_scope_matches_lookup() {
        let inv = inventory();
        let c2 = inv.host("c2").unwrap();
        let scope = inv.scope_for(c2, &VarScope::new());

        assert_eq!(scope.get("duration"), Some(&json!(60)));
        assert_eq!(scope.get("iodepth"), Some(&json!([1, 8])));
        assert_eq!(scope.get("inventory_hostname"), Some(&json!("c2")));
        assert_eq!(scope.get("host_address"), Some(&json!("10.0.0.3")));
    }

    #[test]
    fn test_unknown_host_reference() {
        let def: InventoryDef =
            serde_yaml::from_str("groups:\n  g:\n    hosts: [ghost]\n").unwrap();
        assert!(matches!(Inventory::from_def(def), Err(ConfigError::UnknownHost { .. })));
    }

    #[test]
    fn test_unknown_child_group() {
        let def: InventoryDef =
            serde_yaml::from_str("groups:\n  g:\n    children: [nope]\n").unwrap();
        assert!(matches!(Inventory::from_def(def), Err(ConfigError::UnknownGroup(_))));
    }

    #[test]
    fn test_group_cycle_detected() {
        let def: InventoryDef = serde_yaml::from_str(
            "groups:\n  a:\n    children: [b]\n  b:\n    children: [a]\n",
        )
        .unwrap();
        assert!(matches!(Inventory::from_def(def), Err(ConfigError::GroupCycle(_))));
    }

    #[test]
    fn test_all_is_reserved() {
        let def: InventoryDef = serde_yaml::from_str("groups:\n  all: {}\n").unwrap();
        assert!(matches!(Inventory::from_def(def), Err(ConfigError::ReservedName(_))));
    }

    #[test]
    fn test_empty_group_resolves_to_nothing() {
        let def: InventoryDef = serde_yaml::from_str("groups:\n  gpus: {}\n").unwrap();
        let inv = Inventory::from_def(def).unwrap();
        assert!(inv.resolve(&GroupSelector::group("gpus")).unwrap().is_empty());
    }
}
