//! Parser for plan YAML files.

use crate::error::{ConfigError, Result};
use crate::plan::Plan;
use std::path::Path;

/// Parser for benchmark plan files.
pub struct PlanParser;

impl PlanParser {
    /// Parse a plan from YAML content.
    ///
    /// Expected format:
    /// ```yaml
    /// name: fio-sweep
    /// inventory_file: hosts.yml
    /// steps:
    ///   - name: run fio
    ///     hosts: targets
    ///     tasks:
    ///       - name: randread
    ///         command: "fio --name=rr --rw=randread --iodepth={{ iodepth }}"
    /// ```
    ///
    /// # Errors
    ///
    /// Returns error if the YAML is invalid or the plan fails structural validation.
    pub fn parse(content: &str) -> Result<Plan> {
        let plan: Plan = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse {
                path: None,
                source: e,
            })?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a plan from a file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Plan> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load {
                path: path.to_path_buf(),
                source: e,
            })?;

        let plan: Plan = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse {
                path: Some(path.to_path_buf()),
                source: e,
            })?;
        plan.validate()?;
        Ok(plan)
    }

    /// Serialize a plan back to YAML.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_yaml(plan: &Plan) -> Result<String> {
        serde_yaml::to_string(plan).map_err(ConfigError::Serialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::GroupSelector;
    use crate::plan::{ConcurrencyMode, ExecMode, Phase};

    const PLAN: &str = r#"
name: iperf-fleet
server_group: servers
inventory:
  vars: { duration: 10 }
  hosts:
    s1: { address: 10.0.0.1, user: bench, tags: [server] }
    c1: { address: 10.0.0.2, tags: [client] }
  groups:
    servers: { hosts: [s1] }
    clients: { hosts: [c1], vars: { parallel: 10 } }
steps:
  - name: start server
    phase: server
    hosts: servers
    critical: true
    tasks:
      - { name: iperf server, command: "iperf -s", mode: fire-and-forget }
  - name: run clients
    hosts: clients
    concurrency: serial-one-at-a-time
    tasks:
      - name: iperf client
        command: "iperf --client {{ server_address }} -P {{ parallel }}"
        timeout_secs: 60
        when: "duration is defined"
artifacts:
  - { name: iperf, hosts: clients, path: "/tmp/iperf-{{ inventory_hostname }}.log" }
"#;

    #[test]
    fn test_parse_valid_plan() {
        let plan = PlanParser::parse(PLAN).unwrap();
        assert_eq!(plan.name, "iperf-fleet");
        assert_eq!(plan.server_group, Some(GroupSelector::Group("servers".to_string())));
        assert_eq!(plan.steps.len(), 2);

        let server = &plan.steps[0];
        assert_eq!(server.phase, Phase::Server);
        assert!(server.critical);
        assert_eq!(server.tasks[0].mode, ExecMode::FireAndForget);

        let clients = &plan.steps[1];
        assert_eq!(clients.phase, Phase::Client);
        assert_eq!(clients.concurrency, ConcurrencyMode::SerialOneAtATime);
        assert_eq!(clients.tasks[0].timeout_secs, Some(60));
        assert!(clients.tasks[0].when.is_some());

        assert!(plan.stop_detached_jobs);
        assert_eq!(plan.artifacts[0].name, "iperf");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = PlanParser::parse("name: [unterminated");
        assert!(matches!(result, Err(ConfigError::Parse { path: None, .. })));
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let content = r#"
name: p
inventory: { hosts: { h1: {} } }
steps:
  - name: s
    hosts: all
    tasks:
      - { name: t, command: "true", mode: eventually }
"#;
        assert!(matches!(PlanParser::parse(content), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_parse_rejects_bad_condition() {
        let content = r#"
name: p
inventory: { hosts: { h1: {} } }
steps:
  - name: s
    hosts: all
    tasks:
      - { name: t, command: "true", when: "just words" }
"#;
        assert!(PlanParser::parse(content).is_err());
    }

    #[test]
    fn test_parse_file_missing() {
        let result = PlanParser::parse_file("/nonexistent/plan.yml");
        assert!(matches!(result, Err(ConfigError::Load { .. })));
    }

    #[test]
    fn test_yaml_round_trip() {
        let plan = PlanParser::parse(PLAN).unwrap();
        let yaml = PlanParser::to_yaml(&plan).unwrap();
        let reparsed = PlanParser::parse(&yaml).unwrap();
        assert_eq!(plan, reparsed);
    }
}
