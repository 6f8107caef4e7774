//! Fan-out coordinator: one step across many hosts.

use crate::error::Result;
use crate::result::{RunResult, StepReport, TaskStatus};
use crate::runner::TaskRunner;
use fleetbench_core::{
    ConcurrencyMode, GroupSelector, Host, Inventory, PlanStep, Task, VarScope,
};
use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs plan steps across the hosts their selectors resolve to.
#[derive(Debug, Clone)]
pub struct Coordinator {
    inventory: Arc<Inventory>,
    runner: Arc<TaskRunner>,
    /// Restricts every selection to these hosts (`--group`).
    limit: Option<Arc<IndexSet<String>>>,
}

impl Coordinator {
    pub fn new(inventory: Arc<Inventory>, runner: Arc<TaskRunner>) -> Self {
        Self {
            inventory,
            runner,
            limit: None,
        }
    }

    /// Only ever touch hosts selected by `selector`.
    pub fn with_limit(mut self, selector: &GroupSelector) -> Result<Self> {
        let names: IndexSet<String> = self
            .inventory
            .resolve(selector)?
            .iter()
            .map(|h| h.name.clone())
            .collect();
        self.limit = Some(Arc::new(names));
        Ok(self)
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    /// Resolves `selector`, applying the host limit.
    pub fn resolve(&self, selector: &GroupSelector) -> Result<Vec<Arc<Host>>> {
        let hosts = self.inventory.resolve(selector)?;
        Ok(match &self.limit {
            Some(limit) => hosts.into_iter().filter(|h| limit.contains(&h.name)).collect(),
            None => hosts,
        })
    }

    /// Resolves the step's selector and runs it.
    pub async fn run_step(
        &self,
        step: &PlanStep,
        base: &VarScope,
        cancel: &CancellationToken,
    ) -> Result<StepReport> {
        let hosts = self.resolve(&step.hosts)?;
        self.run_hosts(step, &hosts, base, cancel).await
    }

    /// Runs the step's task list on `hosts`.
    ///
    /// Every host's templates are checked before the first one starts, so a
    /// template error leaves no host touched. Every host gets exactly one
    /// entry in the report, in the given order.
    pub async fn run_hosts(
        &self,
        step: &PlanStep,
        hosts: &[Arc<Host>],
        base: &VarScope,
        cancel: &CancellationToken,
    ) -> Result<StepReport> {
        let clock = Instant::now();
        if hosts.is_empty() {
            info!(step = %step.name, selector = %step.hosts, "No hosts selected, skipping step");
            return Ok(StepReport::from_hosts(
                &step.name,
                step.phase,
                IndexMap::new(),
                clock.elapsed(),
            ));
        }

        for host in hosts {
            let scope = self.inventory.scope_for(host, base);
            TaskRunner::check(host, &step.tasks, &scope)?;
        }

        info!(
            step = %step.name,
            hosts = hosts.len(),
            concurrency = %step.concurrency,
            "Starting step"
        );

        let tasks: Arc<[Task]> = step.tasks.clone().into();
        let mut results = IndexMap::with_capacity(hosts.len());

        match step.concurrency {
            ConcurrencyMode::ParallelAll => {
                let semaphore = step.max_parallel.map(|n| Arc::new(Semaphore::new(n)));
                let handles: Vec<_> = hosts
                    .iter()
                    .map(|host| {
                        self.spawn_host(step, host, &tasks, base, cancel, semaphore.clone())
                    })
                    .collect();
                for (host, joined) in hosts.iter().zip(join_all(handles).await) {
                    results.insert(host.name.clone(), joined_results(step, host, joined));
                }
            }
            ConcurrencyMode::SerialOneAtATime => {
                for host in hosts {
                    let joined = self.spawn_host(step, host, &tasks, base, cancel, None).await;
                    results.insert(host.name.clone(), joined_results(step, host, joined));
                }
            }
        }

        let report = StepReport::from_hosts(&step.name, step.phase, results, clock.elapsed());
        info!(
            step = %step.name,
            status = %report.status,
            failed = report.failed_hosts().len(),
            unreachable = report.unreachable_hosts().len(),
            "Step finished"
        );
        Ok(report)
    }

    fn spawn_host(
        &self,
        step: &PlanStep,
        host: &Arc<Host>,
        tasks: &Arc<[Task]>,
        base: &VarScope,
        cancel: &CancellationToken,
        semaphore: Option<Arc<Semaphore>>,
    ) -> JoinHandle<Vec<RunResult>> {
        let runner = Arc::clone(&self.runner);
        let host = Arc::clone(host);
        let tasks = Arc::clone(tasks);
        let scope = self.inventory.scope_for(&host, base);
        let cancel = cancel.clone();
        let step_name = step.name.clone();

        tokio::spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            debug!(step = %step_name, host = %host.name, "Host started");
            match runner.run(&host, &tasks, &scope, &cancel).await {
                Ok(results) => results,
                Err(e) => {
                    error!(
                        step = %step_name,
                        host = %host.name,
                        error = %e,
                        "Host task list rejected"
                    );
                    vec![
                        RunResult::new(&host, &step_name, TaskStatus::Failed)
                            .with_message(e.to_string()),
                    ]
                }
            }
        })
    }
}

fn joined_results(
    step: &PlanStep,
    host: &Host,
    joined: std::result::Result<Vec<RunResult>, tokio::task::JoinError>,
) -> Vec<RunResult> {
    joined.unwrap_or_else(|e| {
        error!(step = %step.name, host = %host.name, error = %e, "Host task panicked");
        vec![RunResult::new(host, &step.name, TaskStatus::Failed)
            .with_message(format!("host task panicked: {}", e))]
    })
}
