//! Shared test helpers: a scripted in-memory transport and plan builders.

#![allow(dead_code)]

use async_trait::async_trait;
use fleetbench_core::{FleetConfig, Host, PlanParser};
use fleetbench_orchestrator::transport::shell_quote;
use fleetbench_orchestrator::{CommandOutput, Driver, DriverOptions, Transport, TransportError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a host answers every command.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub delay: Duration,
    pub exit_code: i32,
    pub stdout: String,
    pub unreachable: bool,
}

impl Behavior {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub host: String,
    pub script: String,
    pub started: Instant,
    pub finished: Instant,
}

impl Call {
    /// A job cleanup issued by the executor rather than a task command.
    pub fn is_stop(&self) -> bool {
        self.script.contains("kill_tree")
    }

    pub fn is_exists_check(&self) -> bool {
        self.script.starts_with("test -e ")
    }

    pub fn is_command(&self) -> bool {
        !self.is_stop() && !self.is_exists_check()
    }
}

#[derive(Debug, Default)]
pub struct MockTransport {
    behaviors: Mutex<HashMap<String, Behavior>>,
    files: Mutex<HashMap<(String, String), String>>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn behave(&self, host: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(host.to_string(), behavior);
    }

    /// Makes `path` exist on `host`.
    pub fn add_file(&self, host: &str, path: &str, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert((host.to_string(), path.to_string()), contents.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Task commands only, in start order.
    pub fn command_calls(&self) -> Vec<Call> {
        let mut calls: Vec<Call> = self.calls().into_iter().filter(Call::is_command).collect();
        calls.sort_by_key(|c| c.started);
        calls
    }

    pub fn calls_for(&self, host: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.host == host).collect()
    }

    fn record(&self, host: &Host, script: &str, started: Instant) {
        self.calls.lock().unwrap().push(Call {
            host: host.name.clone(),
            script: script.to_string(),
            started,
            finished: Instant::now(),
        });
    }

    fn file(&self, host: &str, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(&(host.to_string(), path.to_string())).cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn exec(
        &self,
        host: &Host,
        script: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let started = Instant::now();
        let behavior = self.behaviors.lock().unwrap().get(&host.name).cloned().unwrap_or_default();

        if behavior.unreachable {
            self.record(host, script, started);
            return Err(TransportError::Unreachable {
                host: host.name.clone(),
                reason: "connection refused".to_string(),
            });
        }

        if let Some(path) = script.strip_prefix("test -e ") {
            let exists = self
                .files
                .lock()
                .unwrap()
                .keys()
                .any(|(h, p)| *h == host.name && shell_quote(p) == path);
            self.record(host, script, started);
            return Ok(CommandOutput {
                exit_code: i32::from(!exists),
                ..CommandOutput::default()
            });
        }

        if script.contains("kill_tree") {
            self.record(host, script, started);
            return Ok(CommandOutput::default());
        }

        if behavior.delay > timeout {
            tokio::time::sleep(timeout).await;
            self.record(host, script, started);
            return Err(TransportError::TimedOut {
                host: host.name.clone(),
                after: timeout,
            });
        }
        tokio::time::sleep(behavior.delay).await;
        self.record(host, script, started);
        Ok(CommandOutput {
            exit_code: behavior.exit_code,
            stdout: behavior.stdout,
            stderr: String::new(),
        })
    }

    async fn fetch(&self, host: &Host, remote: &str, local: &Path) -> Result<(), TransportError> {
        let contents = self.file(&host.name, remote).ok_or_else(|| TransportError::Transfer {
            host: host.name.clone(),
            reason: format!("{}: no such file", remote),
        })?;
        tokio::fs::write(local, contents).await.map_err(|source| TransportError::Io {
            host: host.name.clone(),
            source,
        })
    }
}

/// Config with connection retries off so unreachable hosts fail fast.
pub fn test_config(work_dir: &Path) -> FleetConfig {
    let mut config = FleetConfig::default();
    config.execution.connect_retries = 0;
    config.execution.grace_period_secs = 1;
    config.execution.remote_work_dir = work_dir.to_string_lossy().into_owned();
    config
}

pub fn options(output_dir: &Path) -> DriverOptions {
    DriverOptions {
        output_dir: output_dir.to_path_buf(),
        ..DriverOptions::default()
    }
}

/// Builds a driver for an inline-inventory plan.
pub fn driver(
    yaml: &str,
    transport: Arc<dyn Transport>,
    config: &FleetConfig,
    options: DriverOptions,
) -> Driver {
    let plan = PlanParser::parse(yaml).unwrap();
    let inventory = plan.load_inventory(Path::new(".")).unwrap();
    Driver::new(plan, inventory, config, transport, options).unwrap()
}
