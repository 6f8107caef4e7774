//! Per-host task results and per-step reports.

use crate::executor::JobHandle;
use crate::transport::CommandOutput;
use chrono::{DateTime, Utc};
use fleetbench_core::{Host, Phase};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Terminal status of one task on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Ok,
    Failed,
    Skipped,
    Unreachable,
    TimedOut,
    Abandoned,
}

impl TaskStatus {
    /// Stops the rest of the host's task list.
    pub fn aborts_host(self) -> bool {
        !matches!(self, Self::Ok | Self::Skipped)
    }

    /// Counts against the step (unreachable hosts are tallied separately).
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Abandoned)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Unreachable => "unreachable",
            Self::TimedOut => "timed-out",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}

/// What a single poll round observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollObservation {
    Running,
    Done,
    Lost,
}

/// One round of an `async-fire-and-poll` loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollRecord {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub observed: PollObservation,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Outcome of one task on one host. Built once by the executor or runner
/// and never mutated after it is folded into a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub host: String,
    pub task: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub poll_history: Vec<PollRecord>,
    /// Detached job left running by a `fire-and-forget` task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunResult {
    pub fn new(host: &Host, task: &str, status: TaskStatus) -> Self {
        Self {
            host: host.name.clone(),
            task: task.to_string(),
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            started_at: Utc::now(),
            poll_history: Vec::new(),
            job: None,
            message: None,
        }
    }

    /// A task whose `when` condition was false.
    pub fn skipped(host: &Host, task: &str) -> Self {
        Self::new(host, task, TaskStatus::Skipped)
    }

    /// `ok` for exit code zero, `failed` otherwise.
    pub fn from_output(host: &Host, task: &str, output: CommandOutput) -> Self {
        let status = if output.success() { TaskStatus::Ok } else { TaskStatus::Failed };
        Self {
            exit_code: Some(output.exit_code),
            stdout: output.stdout,
            stderr: output.stderr,
            ..Self::new(host, task, status)
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_timing(mut self, started_at: DateTime<Utc>, duration: Duration) -> Self {
        self.started_at = started_at;
        self.duration = duration;
        self
    }

    #[must_use]
    pub fn with_polls(mut self, history: Vec<PollRecord>) -> Self {
        self.poll_history = history;
        self
    }

    #[must_use]
    pub fn with_job(mut self, job: JobHandle) -> Self {
        self.job = Some(job);
        self
    }
}

/// Aggregate status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Ok,
    Failed,
    /// Not run because the run was aborted or interrupted first.
    NotRun,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Failed => write!(f, "failed"),
            Self::NotRun => write!(f, "not-run"),
        }
    }
}

/// Results of one step, per host in inventory order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: String,
    pub phase: Phase,
    pub status: StepStatus,
    pub hosts: IndexMap<String, Vec<RunResult>>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl StepReport {
    /// Folds per-host results into a report.
    ///
    /// The step failed iff some host's list ends in `failed`, `timed-out`
    /// or `abandoned`.
    pub fn from_hosts(
        step: &str,
        phase: Phase,
        hosts: IndexMap<String, Vec<RunResult>>,
        duration: Duration,
    ) -> Self {
        let failed = hosts
            .values()
            .any(|results| results.last().is_some_and(|r| r.status.is_failure()));
        Self {
            step: step.to_string(),
            phase,
            status: if failed { StepStatus::Failed } else { StepStatus::Ok },
            hosts,
            duration,
        }
    }

    pub fn not_run(step: &str, phase: Phase) -> Self {
        Self {
            step: step.to_string(),
            phase,
            status: StepStatus::NotRun,
            hosts: IndexMap::new(),
            duration: Duration::ZERO,
        }
    }

    /// Status of the last result recorded for `host`.
    pub fn final_status(&self, host: &str) -> Option<TaskStatus> {
        self.hosts.get(host).and_then(|results| results.last()).map(|r| r.status)
    }

    pub fn unreachable_hosts(&self) -> Vec<&str> {
        self.hosts_ending_in(|s| s == TaskStatus::Unreachable)
    }

    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts_ending_in(TaskStatus::is_failure)
    }

    fn hosts_ending_in(&self, pred: impl Fn(TaskStatus) -> bool) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|(_, results)| results.last().is_some_and(|r| pred(r.status)))
            .map(|(host, _)| host.as_str())
            .collect()
    }

    /// Every result in host order.
    pub fn results(&self) -> impl Iterator<Item = &RunResult> {
        self.hosts.values().flatten()
    }
}

/// Outcome of collecting one artifact from one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Collected,
    Missing,
    Unreachable,
    Failed,
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collected => write!(f, "collected"),
            Self::Missing => write!(f, "missing"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub artifact: String,
    pub host: String,
    pub remote_path: String,
    pub status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
