//! Integration tests for the `fleetbench` binary, using local-connection hosts.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// `fleetbench` isolated from the user's config files and terminal.
fn fleetbench(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fleetbench").unwrap();
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("NO_COLOR", "1")
        .env("FLEETBENCH_REMOTE_WORK_DIR", dir.path().join("jobs"))
        .env_remove("FLEETBENCH_LOG_LEVEL");
    cmd
}

fn write_plan(dir: &TempDir, body: &str) -> PathBuf {
    let work = dir.path().display().to_string();
    let yaml = format!(
        r#"name: local-bench
server_group: servers
vars:
  workdir: "{work}"
inventory:
  hosts:
    srv: {{ connection: local, tags: [server] }}
    cli1: {{ connection: local, tags: [client] }}
    cli2: {{ connection: local, tags: [client] }}
  groups:
    servers: {{ hosts: [srv] }}
    clients: {{ hosts: [cli1, cli2] }}
{body}"#
    );
    let path = dir.path().join("plan.yml");
    fs::write(&path, yaml).unwrap();
    path
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[test]
fn test_run_success_collects_artifacts() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: bench
    hosts: clients
    tasks:
      - name: write result
        command: "echo {{ inventory_hostname }} from {{ server_name }} > {{ workdir }}/{{ inventory_hostname }}.log"
artifacts:
  - { name: bench, hosts: clients, path: "{{ workdir }}/{{ inventory_hostname }}.log" }
"#,
    );

    fleetbench(&dir)
        .arg("run")
        .arg(&plan)
        .arg("--output-dir")
        .arg(dir.path().join("results"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Outcome: success"))
        .stdout(predicate::str::contains("cli1"))
        .stdout(predicate::str::contains("cli2"));

    let collected = files_in(&dir.path().join("results"));
    assert_eq!(collected.len(), 2);
    assert!(collected[0].ends_with("_srv_cli1_bench.log"), "{:?}", collected);
    let content = fs::read_to_string(dir.path().join("results").join(&collected[0])).unwrap();
    assert_eq!(content.trim(), "cli1 from srv");
}

#[test]
fn test_missing_artifact_exits_partial() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: bench
    hosts: clients
    tasks:
      - { name: noop, command: "true" }
artifacts:
  - { name: bench, hosts: clients, path: "{{ workdir }}/never-written.log" }
"#,
    );

    fleetbench(&dir)
        .arg("run")
        .arg(&plan)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("missing"))
        .stdout(predicate::str::contains("Outcome: partial"));
}

#[test]
fn test_critical_failure_exits_4_and_tears_down() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: start server
    phase: server
    hosts: servers
    critical: true
    tasks:
      - { name: start, command: "exit 7" }
  - name: bench
    hosts: clients
    tasks:
      - { name: run, command: "touch {{ workdir }}/bench-ran" }
  - name: cleanup
    phase: teardown
    hosts: servers
    tasks:
      - { name: clean, command: "touch {{ workdir }}/teardown-ran" }
"#,
    );

    fleetbench(&dir)
        .arg("run")
        .arg(&plan)
        .assert()
        .code(4)
        .stdout(predicate::str::contains("critical step 'start server' failed"));

    assert!(!dir.path().join("bench-ran").exists());
    assert!(dir.path().join("teardown-ran").exists());
}

#[test]
fn test_sync_timeout_is_reported() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: slow
    hosts: servers
    tasks:
      - { name: sleep, command: "sleep 5", timeout_secs: 1 }
"#,
    );

    fleetbench(&dir)
        .arg("run")
        .arg(&plan)
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("timed-out"));
}

#[test]
fn test_dry_run_executes_nothing() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: bench
    hosts: clients
    tasks:
      - { name: run, command: "touch {{ workdir }}/ran-{{ inventory_hostname }}" }
"#,
    );

    fleetbench(&dir)
        .arg("run")
        .arg(&plan)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"))
        .stdout(predicate::str::contains(format!("touch {}/ran-cli2", dir.path().display())));

    assert!(!dir.path().join("ran-cli1").exists());
    assert!(!dir.path().join("ran-cli2").exists());
}

#[test]
fn test_group_limit_and_json_report() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: bench
    hosts: all
    tasks:
      - { name: hello, command: "echo hello" }
"#,
    );
    let report_path = dir.path().join("report.json");

    let output = fleetbench(&dir)
        .arg("run")
        .arg(&plan)
        .arg("--group")
        .arg("clients")
        .arg("--json")
        .arg("--report")
        .arg(&report_path)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outcome"], "success");
    let hosts = report["steps"][0]["hosts"].as_object().unwrap();
    let names: Vec<&String> = hosts.keys().collect();
    assert_eq!(names, vec!["cli1", "cli2"]);
    assert_eq!(hosts["cli1"][0]["stdout"], "hello\n");

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(written["run_id"], report["run_id"]);
}

#[test]
fn test_unwritable_report_keeps_run_outcome() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: bench
    hosts: clients
    tasks:
      - { name: fail, command: "exit 3" }
"#,
    );

    fleetbench(&dir)
        .arg("run")
        .arg(&plan)
        .arg("--report")
        .arg(dir.path().join("missing-dir").join("report.json"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Outcome: partial"))
        .stderr(predicate::str::contains("Failed to write report"));
}

#[test]
fn test_unknown_group_is_config_error() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: bench
    hosts: gpus
    tasks:
      - { name: burn, command: "gpu_burn 60" }
"#,
    );

    fleetbench(&dir)
        .arg("run")
        .arg(&plan)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown group: gpus"));
}

#[test]
fn test_missing_plan_is_config_error() {
    let dir = TempDir::new().unwrap();
    fleetbench(&dir)
        .arg("run")
        .arg("nope.yml")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nope.yml"));
}

#[test]
fn test_validate_reports_unresolved_variable() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: bench
    hosts: clients
    tasks:
      - { name: fio, command: "fio --iodepth={{ iodepth }}" }
"#,
    );

    fleetbench(&dir)
        .arg("validate")
        .arg(&plan)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("iodepth"));
}

#[test]
fn test_validate_valid_plan() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(
        &dir,
        r#"steps:
  - name: bench
    hosts: clients
    tasks:
      - { name: fio, command: "fio --iodepth={{ iodepth | default(16) }}" }
"#,
    );

    fleetbench(&dir)
        .arg("validate")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Hosts: 2"));
}

#[test]
fn test_hosts_lists_selection() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(&dir, "steps: []\n");

    fleetbench(&dir)
        .arg("hosts")
        .arg(&plan)
        .arg("--group")
        .arg("tag:client")
        .assert()
        .success()
        .stdout(predicate::str::contains("cli1"))
        .stdout(predicate::str::contains("cli2"))
        .stdout(predicate::str::contains("2 host(s)"));
}

#[test]
fn test_invalid_config_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let plan = write_plan(&dir, "steps: []\n");
    let config = dir.path().join("fleetbench.toml");
    fs::write(&config, "[execution]\npoll_retries = \"many\"\n").unwrap();

    fleetbench(&dir)
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .arg(&plan)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load configuration"));
}
