//! Orchestration driver.
//!
//! Owns a plan for the duration of one run: preflight, the `prepare`,
//! `server` and `client` phases, artifact collection and teardown, then
//! the final [`RunReport`].

use crate::collector::Collector;
use crate::error::{CollectError, OrchestrationError, Result};
use crate::executor::{Executor, ExecutorSettings, JobHandle};
use crate::fanout::Coordinator;
use crate::lifecycle::{DriverLifecycle, DriverState, RunPhase, Transition};
use crate::result::{
    ArtifactRecord, ArtifactStatus, RunResult, StepReport, StepStatus, TaskStatus,
};
use crate::runner::{TaskDefaults, TaskRunner};
use crate::transport::Transport;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use fleetbench_core::template;
use fleetbench_core::{
    ArtifactSpec, ConcurrencyMode, ConfigError, ExecMode, FleetConfig, GroupSelector, Host,
    Inventory, Phase, Plan, PlanStep, Task, VarScope, Vars,
};
use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-invocation options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    /// Preflight and list rendered commands without contacting any host.
    pub dry_run: bool,
    /// Restrict every step to hosts in this selection.
    pub limit: Option<GroupSelector>,
    /// Local directory artifacts are collected into.
    pub output_dir: PathBuf,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            limit: None,
            output_dir: PathBuf::from("results"),
        }
    }
}

/// Overall result of a run, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    Success,
    /// Some hosts failed or some artifacts are missing.
    Partial,
    /// Some hosts could not be reached.
    Unreachable,
    CriticalFailure,
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Partial => 1,
            Self::Unreachable => 3,
            Self::CriticalFailure => 4,
            Self::Interrupted => 130,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Unreachable => "unreachable",
            Self::CriticalFailure => "critical-failure",
            Self::Interrupted => "interrupted",
        };
        write!(f, "{}", s)
    }
}

/// A command as it would run on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCommand {
    pub task: String,
    pub mode: ExecMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Rendered command. Registered values appear as `<name>`.
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedHost {
    pub host: String,
    pub address: String,
    pub commands: Vec<PlannedCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub step: String,
    pub phase: Phase,
    pub concurrency: ConcurrencyMode,
    pub hosts: Vec<PlannedHost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedArtifact {
    pub artifact: String,
    pub host: String,
    pub remote_path: String,
    pub local_name: String,
}

/// Everything preflight resolved and rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preflight {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    pub steps: Vec<PlannedStep>,
    pub artifacts: Vec<PlannedArtifact>,
    /// Inventory hosts no step or artifact selects.
    pub uncontacted_hosts: Vec<String>,
}

/// Per-host tally across the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostSummary {
    pub host: String,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unreachable: usize,
    pub timed_out: usize,
    pub abandoned: usize,
    pub artifacts_collected: usize,
    pub artifacts_missing: usize,
}

impl HostSummary {
    /// Worst status seen for the host.
    pub fn verdict(&self) -> TaskStatus {
        if self.unreachable > 0 {
            TaskStatus::Unreachable
        } else if self.abandoned > 0 {
            TaskStatus::Abandoned
        } else if self.timed_out > 0 {
            TaskStatus::TimedOut
        } else if self.failed > 0 {
            TaskStatus::Failed
        } else if self.ok == 0 && self.skipped > 0 {
            TaskStatus::Skipped
        } else {
            TaskStatus::Ok
        }
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub plan: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub state: DriverState,
    pub outcome: RunOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub steps: Vec<StepReport>,
    pub artifacts: Vec<ArtifactRecord>,
    pub unreachable_hosts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight: Option<Preflight>,
    pub transitions: Vec<Transition>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    /// One summary per host, in order of first appearance.
    pub fn host_summaries(&self) -> Vec<HostSummary> {
        fn entry<'a>(
            summaries: &'a mut IndexMap<String, HostSummary>,
            host: &str,
        ) -> &'a mut HostSummary {
            summaries
                .entry(host.to_string())
                .or_insert_with(|| HostSummary {
                    host: host.to_string(),
                    ..HostSummary::default()
                })
        }

        let mut summaries: IndexMap<String, HostSummary> = IndexMap::new();
        for result in self.steps.iter().flat_map(StepReport::results) {
            let summary = entry(&mut summaries, &result.host);
            match result.status {
                TaskStatus::Ok => summary.ok += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Skipped => summary.skipped += 1,
                TaskStatus::Unreachable => summary.unreachable += 1,
                TaskStatus::TimedOut => summary.timed_out += 1,
                TaskStatus::Abandoned => summary.abandoned += 1,
            }
        }
        for record in &self.artifacts {
            let summary = entry(&mut summaries, &record.host);
            match record.status {
                ArtifactStatus::Collected => summary.artifacts_collected += 1,
                ArtifactStatus::Unreachable => summary.unreachable += 1,
                ArtifactStatus::Missing | ArtifactStatus::Failed => summary.artifacts_missing += 1,
            }
        }
        summaries.into_values().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Abort {
    CriticalStep(String),
    TooManyUnreachable { count: usize, max: usize },
    Interrupted,
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CriticalStep(step) => write!(f, "critical step '{}' failed", step),
            Self::TooManyUnreachable { count, max } => {
                write!(f, "{} hosts unreachable, more than the allowed {}", count, max)
            }
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Runs one plan against one inventory.
pub struct Driver {
    plan: Plan,
    inventory: Arc<Inventory>,
    options: DriverOptions,
    executor: Arc<Executor>,
    coordinator: Coordinator,
    collector: Collector,
    run_id: String,
    started: NaiveDateTime,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("plan", &self.plan.name)
            .field("run_id", &self.run_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Wires the executor, runner, coordinator and collector for one run.
    ///
    /// Fails if the plan's server group or the `limit` selector cannot be
    /// resolved.
    pub fn new(
        plan: Plan,
        inventory: Inventory,
        config: &FleetConfig,
        transport: Arc<dyn Transport>,
        options: DriverOptions,
    ) -> Result<Self> {
        let inventory = Arc::new(inventory);
        let executor = Arc::new(Executor::new(
            Arc::clone(&transport),
            ExecutorSettings::from_config(&config.execution),
        ));
        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&executor),
            TaskDefaults::from_config(&config.execution),
        ));
        let mut coordinator = Coordinator::new(Arc::clone(&inventory), runner);
        if let Some(limit) = &options.limit {
            coordinator = coordinator.with_limit(limit)?;
        }

        let started = Local::now().naive_local();
        let server = server_host(&plan, &inventory)?
            .map_or_else(|| plan.name.clone(), |host| host.name.clone());
        let collector = Collector::new(
            transport,
            started,
            config.execution.time_bucket_minutes,
            server,
        );

        Ok(Self {
            plan,
            inventory,
            options,
            executor,
            coordinator,
            collector,
            run_id: Uuid::new_v4().to_string(),
            started,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Run built-ins (lowest layer) and plan vars.
    fn base_scope(&self) -> Result<VarScope> {
        let mut builtins = Vars::new();
        builtins.insert("run_id".to_string(), Value::String(self.run_id.clone()));
        builtins.insert(
            "run_date".to_string(),
            Value::String(self.started.format("%Y%m%d").to_string()),
        );
        builtins.insert(
            "run_time".to_string(),
            Value::String(self.started.format("%H%M").to_string()),
        );
        if let Some(server) = server_host(&self.plan, &self.inventory)? {
            builtins.insert(
                "server_name".to_string(),
                Value::String(server.name.clone()),
            );
            builtins.insert(
                "server_address".to_string(),
                Value::String(server.address.clone()),
            );
        }
        Ok(VarScope::new()
            .with_layer("run", builtins)
            .with_layer("plan", self.plan.vars.clone()))
    }

    /// Resolves every selector and renders every command, condition and
    /// artifact path for every host. Makes no remote call.
    pub fn preflight(&self) -> Result<Preflight> {
        let base = self.base_scope()?;
        self.preflight_with(&base)
    }

    fn preflight_with(&self, base: &VarScope) -> Result<Preflight> {
        let mut touched: IndexSet<String> = IndexSet::new();
        let mut steps = Vec::with_capacity(self.plan.steps.len());

        for step in &self.plan.steps {
            let hosts = self.coordinator.resolve(&step.hosts)?;
            if hosts.is_empty() && step.require_nonempty {
                return Err(ConfigError::EmptySelection {
                    step: step.name.clone(),
                    selector: step.hosts.to_string(),
                }
                .into());
            }

            let mut planned = Vec::with_capacity(hosts.len());
            for host in &hosts {
                touched.insert(host.name.clone());
                let scope = self.inventory.scope_for(host, base);
                TaskRunner::check(host, &step.tasks, &scope)?;
                planned.push(PlannedHost {
                    host: host.name.clone(),
                    address: host.address.clone(),
                    commands: preview_commands(host, &step.tasks, &scope)?,
                });
            }
            steps.push(PlannedStep {
                step: step.name.clone(),
                phase: step.phase,
                concurrency: step.concurrency,
                hosts: planned,
            });
        }

        let mut artifacts = Vec::new();
        for spec in &self.plan.artifacts {
            for host in self.coordinator.resolve(&spec.hosts)? {
                touched.insert(host.name.clone());
                let scope = self.inventory.scope_for(&host, base);
                let remote_path = template::render(&spec.path, &scope)
                    .map_err(|e| OrchestrationError::from_template(&host.name, &spec.name, e))?;
                let local_name =
                    self.collector.artifact_name(&host, &spec.name, &remote_path).to_string();
                artifacts.push(PlannedArtifact {
                    artifact: spec.name.clone(),
                    host: host.name.clone(),
                    remote_path,
                    local_name,
                });
            }
        }

        ensure_unique_local_names(&artifacts)?;

        let uncontacted_hosts: Vec<String> = self
            .inventory
            .hosts()
            .filter(|h| !touched.contains(&h.name))
            .map(|h| h.name.clone())
            .collect();
        for host in &uncontacted_hosts {
            warn!(host = %host, "Host is not selected by any step and will not be contacted");
        }

        Ok(Preflight {
            server: server_host(&self.plan, &self.inventory)?.map(|h| h.name.clone()),
            steps,
            artifacts,
            uncontacted_hosts,
        })
    }

    /// Executes the plan.
    ///
    /// Returns `Err` only for configuration errors, which are detected
    /// before any host is contacted. Everything else is in the report.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut lifecycle = DriverLifecycle::new();
        lifecycle.transition(DriverState::Preparing)?;
        info!(
            plan = %self.plan.name,
            run_id = %self.run_id,
            dry_run = self.options.dry_run,
            "Starting run"
        );

        let prepared = self.base_scope().and_then(|base| {
            let preflight = self.preflight_with(&base)?;
            Ok((base, preflight))
        });
        let (base, preflight) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(plan = %self.plan.name, error = %e, "Preflight failed");
                lifecycle.transition(DriverState::Failed)?;
                return Err(e);
            }
        };

        let mut report = RunReport {
            run_id: self.run_id.clone(),
            plan: self.plan.name.clone(),
            started_at,
            finished_at: started_at,
            dry_run: self.options.dry_run,
            state: lifecycle.state(),
            outcome: RunOutcome::Success,
            abort_reason: None,
            steps: Vec::new(),
            artifacts: Vec::new(),
            unreachable_hosts: Vec::new(),
            preflight: None,
            transitions: Vec::new(),
        };

        if self.options.dry_run {
            lifecycle.transition(DriverState::Done)?;
            report.preflight = Some(preflight);
            return Ok(finish(report, &lifecycle));
        }

        let mut unreachable: IndexSet<String> = IndexSet::new();
        let mut detached: Vec<JobHandle> = Vec::new();
        let mut abort: Option<Abort> = None;

        for phase in [Phase::Prepare, Phase::Server, Phase::Client] {
            if abort.is_none() {
                match phase {
                    Phase::Server => {
                        lifecycle.transition(DriverState::Running(RunPhase::Server))?;
                    }
                    Phase::Client => {
                        lifecycle.transition(DriverState::Running(RunPhase::Client))?;
                    }
                    Phase::Prepare | Phase::Teardown => {}
                }
            }

            for step in self.plan.steps_in(phase) {
                if abort.is_none() && cancel.is_cancelled() {
                    abort = Some(Abort::Interrupted);
                }
                if abort.is_some() {
                    report.steps.push(StepReport::not_run(&step.name, step.phase));
                    continue;
                }

                let step_report = self.run_step(step, &base, &unreachable, cancel).await?;
                detached.extend(step_report.results().filter_map(|r| r.job.clone()));
                unreachable.extend(step_report.unreachable_hosts().into_iter().map(String::from));

                if cancel.is_cancelled() {
                    abort = Some(Abort::Interrupted);
                } else if step.critical && step_report.status == StepStatus::Failed {
                    error!(step = %step.name, "Critical step failed, aborting run");
                    abort = Some(Abort::CriticalStep(step.name.clone()));
                } else if let Some(max) = self.plan.max_unreachable
                    && unreachable.len() > max
                {
                    error!(
                        unreachable = unreachable.len(),
                        max,
                        "Too many unreachable hosts, aborting run"
                    );
                    abort = Some(Abort::TooManyUnreachable {
                        count: unreachable.len(),
                        max,
                    });
                }
                report.steps.push(step_report);
            }
        }

        if abort.is_none() {
            lifecycle.transition(DriverState::Collecting)?;
            report.artifacts = self.collect_artifacts(&base, &unreachable).await?;
            unreachable.extend(
                report
                    .artifacts
                    .iter()
                    .filter(|r| r.status == ArtifactStatus::Unreachable)
                    .map(|r| r.host.clone()),
            );
        }

        lifecycle.transition(DriverState::TearingDown)?;
        let teardown = CancellationToken::new();
        for step in self.plan.steps_in(Phase::Teardown) {
            report.steps.push(self.run_step(step, &base, &unreachable, &teardown).await?);
        }
        if self.plan.stop_detached_jobs {
            for job in &detached {
                info!(host = %job.host.name, task = %job.task, "Stopping detached job");
                self.executor.stop(job).await;
            }
        }

        let outcome = match &abort {
            Some(Abort::Interrupted) => RunOutcome::Interrupted,
            Some(Abort::CriticalStep(_)) => RunOutcome::CriticalFailure,
            Some(Abort::TooManyUnreachable { .. }) => RunOutcome::Unreachable,
            None if cancel.is_cancelled() => RunOutcome::Interrupted,
            None if !unreachable.is_empty() => RunOutcome::Unreachable,
            None if report.steps.iter().any(|s| s.status == StepStatus::Failed)
                || report.artifacts.iter().any(|a| a.status != ArtifactStatus::Collected) =>
            {
                RunOutcome::Partial
            }
            None => RunOutcome::Success,
        };

        lifecycle.transition(if abort.is_some() {
            DriverState::Failed
        } else {
            DriverState::Done
        })?;
        info!(plan = %self.plan.name, run_id = %self.run_id, outcome = %outcome, "Run finished");

        report.outcome = outcome;
        report.abort_reason = abort.map(|a| a.to_string());
        report.unreachable_hosts = unreachable.into_iter().collect();
        Ok(finish(report, &lifecycle))
    }

    /// Runs a step, recording hosts already known to be unreachable without
    /// contacting them again.
    async fn run_step(
        &self,
        step: &PlanStep,
        base: &VarScope,
        unreachable: &IndexSet<String>,
        cancel: &CancellationToken,
    ) -> Result<StepReport> {
        let hosts = self.coordinator.resolve(&step.hosts)?;
        let live: Vec<Arc<Host>> =
            hosts.iter().filter(|h| !unreachable.contains(&h.name)).cloned().collect();
        if live.len() == hosts.len() {
            return self.coordinator.run_hosts(step, &hosts, base, cancel).await;
        }

        let mut ran = self.coordinator.run_hosts(step, &live, base, cancel).await?;
        let mut merged = IndexMap::with_capacity(hosts.len());
        for host in &hosts {
            let results = ran.hosts.shift_remove(&host.name).unwrap_or_else(|| {
                vec![RunResult::new(host, &step.name, TaskStatus::Unreachable)
                    .with_message("unreachable earlier in the run")]
            });
            merged.insert(host.name.clone(), results);
        }
        Ok(StepReport::from_hosts(&step.name, step.phase, merged, ran.duration))
    }

    async fn collect_artifacts(
        &self,
        base: &VarScope,
        unreachable: &IndexSet<String>,
    ) -> Result<Vec<ArtifactRecord>> {
        let mut records = Vec::new();
        for spec in &self.plan.artifacts {
            let hosts = self.coordinator.resolve(&spec.hosts)?;
            let pending = hosts.iter().map(|host| self.collect_one(spec, host, base, unreachable));
            records.extend(join_all(pending).await);
        }
        Ok(records)
    }

    async fn collect_one(
        &self,
        spec: &ArtifactSpec,
        host: &Host,
        base: &VarScope,
        unreachable: &IndexSet<String>,
    ) -> ArtifactRecord {
        let scope = self.inventory.scope_for(host, base);
        let mut record = ArtifactRecord {
            artifact: spec.name.clone(),
            host: host.name.clone(),
            remote_path: spec.path.clone(),
            status: ArtifactStatus::Failed,
            local_path: None,
            message: None,
        };

        match template::render(&spec.path, &scope) {
            Ok(path) => record.remote_path = path,
            Err(e) => {
                record.message = Some(e.to_string());
                return record;
            }
        }
        if unreachable.contains(&host.name) {
            record.status = ArtifactStatus::Unreachable;
            record.message = Some("unreachable earlier in the run".to_string());
            return record;
        }

        match self
            .collector
            .collect(host, &spec.name, &record.remote_path, &self.options.output_dir)
            .await
        {
            Ok(path) => {
                record.status = ArtifactStatus::Collected;
                record.local_path = Some(path);
            }
            Err(e) => {
                record.status = match e {
                    CollectError::ArtifactMissing { .. } => ArtifactStatus::Missing,
                    CollectError::Unreachable { .. } => ArtifactStatus::Unreachable,
                    _ => ArtifactStatus::Failed,
                };
                warn!(
                    host = %host.name,
                    artifact = %spec.name,
                    error = %e,
                    "Artifact not collected"
                );
                record.message = Some(e.to_string());
            }
        }
        record
    }
}

/// Rejects plans where two collections land on the same local file.
fn ensure_unique_local_names(artifacts: &[PlannedArtifact]) -> Result<()> {
    let mut seen: HashMap<&str, &PlannedArtifact> = HashMap::with_capacity(artifacts.len());
    for artifact in artifacts {
        if let Some(first) = seen.insert(&artifact.local_name, artifact) {
            return Err(ConfigError::DuplicateArtifact {
                local_name: artifact.local_name.clone(),
                first: first.artifact.clone(),
                first_host: first.host.clone(),
                second: artifact.artifact.clone(),
                second_host: artifact.host.clone(),
            }
            .into());
        }
    }
    Ok(())
}

fn server_host(plan: &Plan, inventory: &Inventory) -> Result<Option<Arc<Host>>> {
    let Some(selector) = &plan.server_group else {
        return Ok(None);
    };
    let hosts = inventory.resolve(selector)?;
    match hosts.into_iter().next() {
        Some(host) => Ok(Some(host)),
        None => Err(ConfigError::EmptySelection {
            step: "server_group".to_string(),
            selector: selector.to_string(),
        }
        .into()),
    }
}

/// Renders each command, showing values registered by earlier tasks as `<name>`.
fn preview_commands(host: &Host, tasks: &[Task], scope: &VarScope) -> Result<Vec<PlannedCommand>> {
    let mut placeholders = Vars::new();
    for name in tasks.iter().filter_map(|t| t.register.as_ref()) {
        placeholders.insert(name.clone(), Value::String(format!("<{}>", name)));
        placeholders.insert(format!("{}_rc", name), Value::String(format!("<{}_rc>", name)));
    }
    let preview = scope.with_layer("preview", placeholders);

    tasks
        .iter()
        .map(|task| {
            let command = template::render(&task.command, &preview)
                .map_err(|e| OrchestrationError::from_template(&host.name, &task.name, e))?;
            Ok(PlannedCommand {
                task: task.name.clone(),
                mode: task.mode,
                when: task.when.as_ref().map(ToString::to_string),
                command,
            })
        })
        .collect()
}

fn finish(mut report: RunReport, lifecycle: &DriverLifecycle) -> RunReport {
    report.finished_at = Utc::now();
    report.state = lifecycle.state();
    report.transitions = lifecycle.history().to_vec();
    report
}
