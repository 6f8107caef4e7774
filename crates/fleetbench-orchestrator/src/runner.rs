//! Task runner: one host, one ordered task list.

use crate::error::{OrchestrationError, Result};
use crate::executor::{ExecRequest, Executor};
use crate::result::{RunResult, TaskStatus};
use fleetbench_core::{
    Condition, ExecutionConfig, Host, PollBudget, Task, Template, Test, VarScope, Vars,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Defaults applied to tasks that leave timeout or poll budget unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDefaults {
    pub timeout: Duration,
    pub poll: PollBudget,
}

impl TaskDefaults {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            timeout: config.default_timeout(),
            poll: PollBudget {
                retries: config.poll_retries,
                delay_secs: config.poll_delay_secs,
            },
        }
    }
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

/// Runs a task list on a single host, strictly in order.
#[derive(Debug)]
pub struct TaskRunner {
    executor: Arc<Executor>,
    defaults: TaskDefaults,
}

impl TaskRunner {
    pub fn new(executor: Arc<Executor>, defaults: TaskDefaults) -> Self {
        Self { executor, defaults }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Checks every command template against `scope` without running anything.
    ///
    /// Names registered by earlier unconditional tasks count as defined. A
    /// name registered under a `when` only counts for tasks whose own `when`
    /// requires it to be defined, since the registering task may be skipped.
    pub fn check(host: &Host, tasks: &[Task], scope: &VarScope) -> Result<()> {
        let mut certain = HashSet::new();
        let mut conditional = HashSet::new();
        for task in tasks {
            let template = Template::parse(&task.command)
                .map_err(|e| OrchestrationError::from_template(&host.name, &task.name, e))?;

            let mut defined = certain.clone();
            if let Some(name) = task.when.as_ref().and_then(|c| guarded_register(c, &conditional)) {
                defined.extend(register_names(&name));
            }
            template
                .check(scope, &defined)
                .map_err(|e| OrchestrationError::from_template(&host.name, &task.name, e))?;

            if let Some(name) = &task.register {
                if task.when.is_none() {
                    certain.extend(register_names(name));
                } else {
                    conditional.insert(name.clone());
                }
            }
        }
        Ok(())
    }

    /// Runs `tasks` on `host`.
    ///
    /// Fails only if the pre-check fails, in which case nothing was run. The
    /// first task ending in anything other than `ok` or `skipped` stops the
    /// rest of the list for this host.
    pub async fn run(
        &self,
        host: &Arc<Host>,
        tasks: &[Task],
        scope: &VarScope,
        cancel: &CancellationToken,
    ) -> Result<Vec<RunResult>> {
        Self::check(host, tasks, scope)?;

        let mut scope = scope.clone();
        let mut results = Vec::with_capacity(tasks.len());

        for task in tasks {
            if cancel.is_cancelled() {
                results.push(
                    RunResult::new(host, &task.name, TaskStatus::Abandoned)
                        .with_message("run cancelled before task started"),
                );
                break;
            }

            if let Some(condition) = &task.when
                && !condition.evaluate(&scope)
            {
                debug!(
                    host = %host.name,
                    task = %task.name,
                    condition = %condition,
                    "Skipping task"
                );
                results.push(RunResult::skipped(host, &task.name));
                continue;
            }

            let command = match fleetbench_core::template::render(&task.command, &scope) {
                Ok(command) => command,
                Err(e) => {
                    warn!(
                        host = %host.name,
                        task = %task.name,
                        error = %e,
                        "Cannot render command"
                    );
                    results.push(
                        RunResult::new(host, &task.name, TaskStatus::Failed)
                            .with_message(e.to_string()),
                    );
                    break;
                }
            };

            let request = ExecRequest {
                task: task.name.clone(),
                command,
                mode: task.mode,
                timeout: task.timeout_secs.map_or(self.defaults.timeout, Duration::from_secs),
                poll: task.poll.unwrap_or(self.defaults.poll),
            };
            let result = self.executor.execute(host, &request, cancel).await;
            let status = result.status;

            if status == TaskStatus::Ok
                && let Some(name) = &task.register
            {
                scope = scope.with_layer(format!("register:{}", name), registered(name, &result));
            }
            results.push(result);

            if status.aborts_host() {
                warn!(
                    host = %host.name,
                    task = %task.name,
                    status = %status,
                    "Stopping task list for host"
                );
                break;
            }
        }

        Ok(results)
    }
}

/// Variables a `register: name` task defines.
fn register_names(name: &str) -> [String; 2] {
    [name.to_string(), format!("{}_rc", name)]
}

/// The conditionally registered name a `when` requires to be defined, if any.
///
/// Comparisons are false on undefined variables, so they guard as well as
/// `is defined` does.
fn guarded_register(condition: &Condition, conditional: &HashSet<String>) -> Option<String> {
    if condition.test == Test::Undefined {
        return None;
    }
    let var = condition.var.as_str();
    let base = var.strip_suffix("_rc").filter(|b| conditional.contains(*b)).unwrap_or(var);
    conditional.contains(base).then(|| base.to_string())
}

fn registered(name: &str, result: &RunResult) -> Vars {
    let mut vars = Vars::new();
    vars.insert(
        name.to_string(),
        Value::String(result.stdout.trim().to_string()),
    );
    vars.insert(
        format!("{}_rc", name),
        result.exit_code.map_or(Value::Null, Value::from),
    );
    vars
}
