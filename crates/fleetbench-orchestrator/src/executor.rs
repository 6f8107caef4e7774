//! Remote command execution.
//!
//! The executor turns one rendered command into one [`RunResult`]. It owns
//! the three execution modes, connection retries, polling of detached jobs,
//! and best-effort stopping of remote processes on timeout or cancellation.

use crate::error::TransportError;
use crate::result::{PollObservation, PollRecord, RunResult, TaskStatus};
use crate::retry::RetryPolicy;
use crate::transport::shell::{
    POLL_DONE, POLL_RUNNING, launch_script, poll_script, stop_script, sync_script,
};
use crate::transport::{CommandOutput, Transport};
use chrono::{DateTime, Utc};
use fleetbench_core::{ExecMode, ExecutionConfig, Host, PollBudget};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One command to run on one host.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub task: String,
    /// Fully rendered command.
    pub command: String,
    pub mode: ExecMode,
    /// Wall-clock limit for `sync` mode.
    pub timeout: Duration,
    /// Poll budget for `async-fire-and-poll` mode.
    pub poll: PollBudget,
}

impl ExecRequest {
    /// A `sync` request with the default poll budget.
    pub fn sync(task: impl Into<String>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            task: task.into(),
            command: command.into(),
            mode: ExecMode::Sync,
            timeout,
            poll: PollBudget::default(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_poll(mut self, poll: PollBudget) -> Self {
        self.poll = poll;
        self
    }
}

fn serialize_host_name<S: Serializer>(host: &Arc<Host>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&host.name)
}

/// Reference to a job running on a host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub id: String,
    #[serde(serialize_with = "serialize_host_name")]
    pub host: Arc<Host>,
    pub task: String,
    /// Job bookkeeping directory on the host.
    pub work_dir: String,
    pub launched_at: DateTime<Utc>,
}

impl JobHandle {
    fn new(host: &Arc<Host>, task: &str, remote_work_dir: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let work_dir = format!("{}/{}", remote_work_dir.trim_end_matches('/'), id);
        Self {
            id,
            host: Arc::clone(host),
            task: task.to_string(),
            work_dir,
            launched_at: Utc::now(),
        }
    }
}

/// State of a detached job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Running,
    /// The job exited (or vanished); the result carries its outputs.
    Done(RunResult),
}

/// Executor tuning taken from the `[execution]` config table.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub remote_work_dir: String,
    /// Bound on stopping a remote process.
    pub grace_period: Duration,
    pub retry: RetryPolicy,
    /// Timeout for launch, poll and stop round trips.
    pub control_timeout: Duration,
}

impl ExecutorSettings {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            remote_work_dir: config.remote_work_dir.clone(),
            grace_period: config.grace_period(),
            retry: RetryPolicy::from_config(config),
            control_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

/// Runs commands on hosts through a [`Transport`].
pub struct Executor {
    transport: Arc<dyn Transport>,
    settings: ExecutorSettings,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(transport: Arc<dyn Transport>, settings: ExecutorSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Runs `request` on `host` and returns its terminal result.
    ///
    /// Never fails: connection problems, timeouts and cancellation are all
    /// expressed as a [`TaskStatus`].
    pub async fn execute(
        &self,
        host: &Arc<Host>,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> RunResult {
        debug!(host = %host.name, task = %request.task, mode = %request.mode, "Executing task");
        let started_at = Utc::now();
        let clock = Instant::now();

        let result = match request.mode {
            ExecMode::Sync => self.run_sync(host, request, cancel).await,
            ExecMode::AsyncPoll => self.run_polled(host, request, cancel).await,
            ExecMode::FireAndForget => self.run_detached(host, request).await,
        };

        let result = result.with_timing(started_at, clock.elapsed());
        info!(
            host = %host.name,
            task = %request.task,
            status = %result.status,
            duration_ms = result.duration.as_millis() as u64,
            "Task finished"
        );
        result
    }

    async fn run_sync(
        &self,
        host: &Arc<Host>,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> RunResult {
        let job = JobHandle::new(host, &request.task, &self.settings.remote_work_dir);
        let script = sync_script(&job.work_dir, &request.command);

        tokio::select! {
            outcome = self.exec_with_retry(host, &script, request.timeout) => match outcome {
                Ok(output) => RunResult::from_output(host, &request.task, output),
                Err(TransportError::TimedOut { after, .. }) => {
                    warn!(host = %host.name, task = %request.task, "Task timed out, stopping it");
                    self.stop(&job).await;
                    RunResult::new(host, &request.task, TaskStatus::TimedOut)
                        .with_message(format!("timed out after {}s", after.as_secs_f64()))
                }
                Err(e) => failure_result(host, &request.task, &e),
            },
            () = cancel.cancelled() => {
                warn!(host = %host.name, task = %request.task, "Task cancelled, stopping it");
                self.stop(&job).await;
                RunResult::new(host, &request.task, TaskStatus::Abandoned)
                    .with_message("cancelled while running")
            }
        }
    }

    async fn run_polled(
        &self,
        host: &Arc<Host>,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> RunResult {
        let job = match self.launch(host, &request.task, &request.command).await {
            Ok(job) => job,
            Err(e) => return failure_result(host, &request.task, &e),
        };

        let mut history = Vec::new();
        for attempt in 1..=request.poll.retries {
            tokio::select! {
                () = tokio::time::sleep(request.poll.delay()) => {}
                () = cancel.cancelled() => {
                    warn!(host = %host.name, task = %request.task, "Task cancelled, stopping job");
                    self.stop(&job).await;
                    return RunResult::new(host, &request.task, TaskStatus::Abandoned)
                        .with_message("cancelled while polling")
                        .with_polls(history);
                }
            }

            match self.poll(&job).await {
                Ok(PollState::Running) => {
                    debug!(host = %host.name, task = %request.task, attempt, "Job still running");
                    history.push(PollRecord {
                        attempt,
                        at: Utc::now(),
                        observed: PollObservation::Running,
                    });
                }
                Ok(PollState::Done(result)) => {
                    let observed = if result.exit_code.is_some() {
                        PollObservation::Done
                    } else {
                        PollObservation::Lost
                    };
                    history.push(PollRecord {
                        attempt,
                        at: Utc::now(),
                        observed,
                    });
                    return result.with_polls(history);
                }
                Err(e) => return failure_result(host, &request.task, &e).with_polls(history),
            }
        }

        warn!(host = %host.name, task = %request.task, "Poll budget exhausted, stopping job");
        self.stop(&job).await;
        RunResult::new(host, &request.task, TaskStatus::TimedOut)
            .with_message(format!(
                "still running after {} polls ({}s)",
                request.poll.retries,
                request.poll.total().as_secs()
            ))
            .with_polls(history)
    }

    async fn run_detached(&self, host: &Arc<Host>, request: &ExecRequest) -> RunResult {
        match self.launch(host, &request.task, &request.command).await {
            Ok(job) => RunResult::new(host, &request.task, TaskStatus::Ok).with_job(job),
            Err(e) => failure_result(host, &request.task, &e),
        }
    }

    /// Starts `command` detached on `host` and returns without waiting.
    pub async fn launch(
        &self,
        host: &Arc<Host>,
        task: &str,
        command: &str,
    ) -> Result<JobHandle, TransportError> {
        let job = JobHandle::new(host, task, &self.settings.remote_work_dir);
        let script = launch_script(&job.work_dir, command);
        let output = self
            .exec_with_retry(host, &script, self.settings.control_timeout)
            .await?;
        if !output.success() {
            return Err(TransportError::Transfer {
                host: host.name.clone(),
                reason: format!("could not launch job: {}", output.stderr.trim()),
            });
        }
        debug!(host = %host.name, task = %task, job = %job.id, "Job launched");
        Ok(job)
    }

    /// Checks on a detached job once.
    pub async fn poll(&self, job: &JobHandle) -> Result<PollState, TransportError> {
        let output = self
            .exec_with_retry(&job.host, &poll_script(&job.work_dir), self.settings.control_timeout)
            .await?;
        let (head, stdout) = output.stdout.split_once('\n').unwrap_or((output.stdout.as_str(), ""));
        let mut words = head.split_whitespace();

        match words.next() {
            Some(POLL_RUNNING) => Ok(PollState::Running),
            Some(POLL_DONE) => {
                let exit_code = words.next().and_then(|rc| rc.parse().ok()).unwrap_or(-1);
                let done = CommandOutput {
                    exit_code,
                    stdout: stdout.to_string(),
                    stderr: output.stderr.clone(),
                };
                Ok(PollState::Done(RunResult::from_output(&job.host, &job.task, done)))
            }
            _ => Ok(PollState::Done(
                RunResult::new(&job.host, &job.task, TaskStatus::Failed)
                    .with_message("job exited without recording a status"),
            )),
        }
    }

    /// Best-effort stop of a job, bounded by the grace period.
    pub async fn stop(&self, job: &JobHandle) {
        let grace = self.settings.grace_period;
        match self.transport.exec(&job.host, &stop_script(&job.work_dir), grace).await {
            Ok(_) => debug!(host = %job.host.name, job = %job.id, "Job stopped"),
            Err(e) => warn!(host = %job.host.name, job = %job.id, error = %e, "Failed to stop job"),
        }
    }

    /// Runs `script`, retrying connection failures while the deadline allows.
    async fn exec_with_retry(
        &self,
        host: &Host,
        script: &str,
        limit: Duration,
    ) -> Result<CommandOutput, TransportError> {
        let deadline = Instant::now() + limit;
        let mut retry_count = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::TimedOut {
                    host: host.name.clone(),
                    after: limit,
                });
            }
            match self.transport.exec(host, script, remaining).await {
                Err(TransportError::Unreachable { reason, .. })
                    if retry_count < self.settings.retry.max_retries =>
                {
                    let delay = self.settings.retry.calculate_delay(retry_count);
                    warn!(
                        host = %host.name,
                        retry_count = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Connection failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(TransportError::TimedOut { host: name, .. }) => {
                    return Err(TransportError::TimedOut {
                        host: name,
                        after: limit,
                    });
                }
                other => return other,
            }
        }
    }
}

fn failure_result(host: &Host, task: &str, error: &TransportError) -> RunResult {
    let status = match error {
        TransportError::Unreachable { .. } => TaskStatus::Unreachable,
        TransportError::TimedOut { .. } => TaskStatus::TimedOut,
        TransportError::Transfer { .. } | TransportError::Io { .. } => TaskStatus::Failed,
    };
    RunResult::new(host, task, status).with_message(error.to_string())
}
