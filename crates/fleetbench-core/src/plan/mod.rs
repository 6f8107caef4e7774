//! Benchmark plans: ordered steps of tasks run against host selections.

pub mod condition;
pub mod parser;

pub use condition::{Condition, Test};
pub use parser::PlanParser;

use crate::error::{ConfigError, Result};
use crate::inventory::{GroupSelector, Inventory, InventoryDef};
use crate::template::{Template, is_identifier};
use crate::vars::Vars;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a task's remote process is run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecMode {
    /// Wait for the process to exit, bounded by the task timeout.
    #[default]
    #[serde(rename = "sync")]
    Sync,
    /// Launch detached and poll until done or the poll budget runs out.
    #[serde(rename = "async-fire-and-poll", alias = "async")]
    AsyncPoll,
    /// Launch detached and move on immediately.
    #[serde(rename = "fire-and-forget")]
    FireAndForget,
}

impl ExecMode {
    fn is_default(&self) -> bool {
        *self == Self::Sync
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::AsyncPoll => write!(f, "async-fire-and-poll"),
            Self::FireAndForget => write!(f, "fire-and-forget"),
        }
    }
}

/// How a step spreads its task list across the selected hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConcurrencyMode {
    /// Every host at once (optionally capped by `max_parallel`).
    #[default]
    ParallelAll,
    /// One host at a time, in inventory order.
    SerialOneAtATime,
}

impl ConcurrencyMode {
    fn is_default(&self) -> bool {
        *self == Self::ParallelAll
    }
}

impl fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParallelAll => write!(f, "parallel-all"),
            Self::SerialOneAtATime => write!(f, "serial-one-at-a-time"),
        }
    }
}

/// Driver phase a step belongs to. Steps run phase by phase, in declaration
/// order within a phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Server,
    #[default]
    Client,
    Teardown,
}

impl Phase {
    fn is_default(&self) -> bool {
        *self == Self::Client
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare"),
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// Polling budget for `async-fire-and-poll` tasks: `retries` polls spaced
/// `delay_secs` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBudget {
    pub retries: u32,
    pub delay_secs: u64,
}

impl PollBudget {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    /// Upper bound on the time spent polling.
    pub fn total(&self) -> Duration {
        self.delay() * self.retries
    }
}

impl Default for PollBudget {
    fn default() -> Self {
        Self {
            retries: 100,
            delay_secs: 10,
        }
    }
}

/// A single unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,

    /// Command template, run with `sh -c` on the host.
    pub command: String,

    #[serde(default, skip_serializing_if = "ExecMode::is_default")]
    pub mode: ExecMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,

    /// Wall-clock limit for `sync` tasks. Falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Poll budget for `async-fire-and-poll` tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollBudget>,

    /// Registers trimmed stdout as `<name>` and the exit code as `<name>_rc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,
}

impl Task {
    /// Creates a `sync` task.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            mode: ExecMode::Sync,
            when: None,
            timeout_secs: None,
            poll: None,
            register: None,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, when: Condition) -> Self {
        self.when = Some(when);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_poll(mut self, poll: PollBudget) -> Self {
        self.poll = Some(poll);
        self
    }

    #[must_use]
    pub fn with_register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    fn validate(&self, step: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("step '{}' has a task without a name", step)));
        }
        Template::parse(&self.command).map_err(|e| {
            ConfigError::Invalid(format!("task '{}' in step '{}': {}", self.name, step, e))
        })?;
        if let Some(register) = &self.register {
            if !is_identifier(register) {
                return Err(ConfigError::Invalid(format!(
                    "task '{}' registers invalid variable name '{}'",
                    self.name, register
                )));
            }
        }
        if let Some(poll) = &self.poll {
            if poll.retries == 0 {
                return Err(ConfigError::Invalid(format!(
                    "task '{}' has a poll budget of zero retries",
                    self.name
                )));
            }
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(format!("task '{}' has a zero timeout", self.name)));
        }
        Ok(())
    }
}

/// One plan step: a task list, the hosts it runs on, and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,

    #[serde(default, skip_serializing_if = "Phase::is_default")]
    pub phase: Phase,

    pub hosts: GroupSelector,

    #[serde(default, skip_serializing_if = "ConcurrencyMode::is_default")]
    pub concurrency: ConcurrencyMode,

    /// Caps simultaneous hosts for `parallel-all` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// A failed critical step aborts the run.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub critical: bool,

    /// Resolving to zero hosts is a configuration error instead of a no-op.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_nonempty: bool,

    pub tasks: Vec<Task>,
}

impl PlanStep {
    pub fn new(name: impl Into<String>, hosts: GroupSelector, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            phase: Phase::default(),
            hosts,
            concurrency: ConcurrencyMode::default(),
            max_parallel: None,
            critical: false,
            require_nonempty: false,
            tasks,
        }
    }

    #[must_use]
    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: ConcurrencyMode) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    #[must_use]
    pub fn require_nonempty(mut self) -> Self {
        self.require_nonempty = true;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("plan step without a name".to_string()));
        }
        if self.max_parallel == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "step '{}' has max_parallel of zero",
                self.name
            )));
        }
        if self.max_parallel.is_some() && self.concurrency != ConcurrencyMode::ParallelAll {
            return Err(ConfigError::Invalid(format!(
                "step '{}' sets max_parallel but is not parallel-all",
                self.name
            )));
        }
        for task in &self.tasks {
            task.validate(&self.name)?;
        }
        Ok(())
    }
}

/// A remote file to pull back after the benchmark phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
    pub hosts: GroupSelector,
    /// Remote path template, rendered per host.
    pub path: String,
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// A complete benchmark plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inline inventory. Mutually exclusive with `inventory_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventoryDef>,

    /// Inventory YAML file, relative to the plan file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_file: Option<PathBuf>,

    /// Group whose first host is the server identity for artifact naming and
    /// the `server_name`/`server_address` variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_group: Option<GroupSelector>,

    /// Plan-wide variables, below inventory variables in precedence.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: Vars,

    pub steps: Vec<PlanStep>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactSpec>,

    /// Abort the run once more than this many hosts have been unreachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unreachable: Option<usize>,

    /// Stop `fire-and-forget` jobs during teardown.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub stop_detached_jobs: bool,
}

impl Plan {
    /// Creates an empty plan over an inline inventory.
    pub fn new(name: impl Into<String>, inventory: InventoryDef) -> Self {
        Self {
            name: name.into(),
            description: None,
            inventory: Some(inventory),
            inventory_file: None,
            server_group: None,
            vars: Vars::new(),
            steps: Vec::new(),
            artifacts: Vec::new(),
            max_unreachable: None,
            stop_detached_jobs: true,
        }
    }

    /// Structural validation that needs no inventory.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("plan has no name".to_string()));
        }
        match (&self.inventory, &self.inventory_file) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "plan sets both 'inventory' and 'inventory_file'".to_string(),
                ));
            }
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "plan needs 'inventory' or 'inventory_file'".to_string(),
                ));
            }
            _ => {}
        }
        for step in &self.steps {
            step.validate()?;
        }
        for artifact in &self.artifacts {
            if artifact.name.trim().is_empty() {
                return Err(ConfigError::Invalid("artifact without a name".to_string()));
            }
            Template::parse(&artifact.path).map_err(|e| {
                ConfigError::Invalid(format!("artifact '{}': {}", artifact.name, e))
            })?;
        }
        Ok(())
    }

    /// Loads the plan's inventory, reading `inventory_file` relative to
    /// `base_dir` when the inventory is not inline.
    pub fn load_inventory(&self, base_dir: &Path) -> Result<Inventory> {
        match (&self.inventory, &self.inventory_file) {
            (Some(def), _) => Inventory::from_def(def.clone()),
            (None, Some(file)) => Inventory::load(&base_dir.join(file)),
            (None, None) => Err(ConfigError::Invalid(
                "plan needs 'inventory' or 'inventory_file'".to_string(),
            )),
        }
    }

    /// Steps of one phase, in declaration order.
    pub fn steps_in(&self, phase: Phase) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(move |s| s.phase == phase)
    }

    /// Every selector the plan references.
    pub fn selectors(&self) -> impl Iterator<Item = &GroupSelector> {
        self.steps
            .iter()
            .map(|s| &s.hosts)
            .chain(self.artifacts.iter().map(|a| &a.hosts))
            .chain(self.server_group.iter())
    }
}
