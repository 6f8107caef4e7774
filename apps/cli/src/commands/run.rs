//! Run command implementation.
//!
//! Executes a plan and prints a per-host summary.

use crate::colors::{artifact_tone, outcome_tone, step_tone, task_tone};
use anyhow::Context;
use colored::Colorize;
use comfy_table::{Cell, Table};
use fleetbench_core::FleetConfig;
use fleetbench_orchestrator::{
    Driver, DriverOptions, Preflight, RunReport, TaskStatus, TransportRouter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Arguments of `fleetbench run`.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub plan: PathBuf,
    pub group: Option<String>,
    pub dry_run: bool,
    pub inventory: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub json: bool,
}

/// Execute the run command, returning the process exit code.
pub async fn execute(args: RunArgs, config: &FleetConfig) -> anyhow::Result<i32> {
    let (plan, inventory) = super::load_plan(&args.plan, args.inventory.as_deref())?;
    let options = DriverOptions {
        dry_run: args.dry_run,
        limit: super::parse_selector(args.group.as_deref())?,
        output_dir: args
            .output_dir
            .or_else(|| config.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("results")),
    };
    let output_dir = options.output_dir.clone();

    let transport = Arc::new(TransportRouter::new(&config.ssh));
    let driver = Driver::new(plan, inventory, config, transport, options)?;

    if !args.json {
        println!("{}", "fleetbench run".bold().cyan());
        println!();
        println!("  {} Plan: {}", "•".dimmed(), driver.plan().name.cyan());
        println!("  {} Run: {}", "•".dimmed(), driver.run_id().dimmed());
        if let Some(group) = &args.group {
            println!("  {} Group: {}", "•".dimmed(), group.cyan());
        }
        if !args.dry_run {
            println!(
            "  {} Output: {}",
            "•".dimmed(),
            output_dir.display().to_string().dimmed()
        );
        }
        println!();
    }

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping running jobs");
                cancel.cancel();
            }
        })
    };
    let result = driver.run(&cancel).await;
    interrupt.abort();
    let report = result?;

    if let Some(path) = &args.report
        && let Err(e) = write_report(&report, path)
    {
        error!("Report not written: {:#}", e);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(preflight) = &report.preflight {
        print_preflight(preflight);
    } else {
        print_report(&report);
    }

    Ok(report.exit_code())
}

fn write_report(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

fn print_preflight(preflight: &Preflight) {
    println!("{}", "Dry run, no host was contacted".yellow());
    for step in &preflight.steps {
        println!();
        println!(
            "{} {}",
            step.step.bold(),
            format!("({}, {})", step.phase, step.concurrency).dimmed()
        );
        if step.hosts.is_empty() {
            println!("  {}", "no hosts selected".dimmed());
        }
        for host in &step.hosts {
            println!("  {} {}", host.host.cyan(), format!("[{}]", host.address).dimmed());
            for command in &host.commands {
                let when = command
                    .when
                    .as_ref()
                    .map(|w| format!(" when {}", w))
                    .unwrap_or_default();
                println!(
                    "    {} {}{}",
                    format!("{} ({}):", command.task, command.mode).dimmed(),
                    command.command,
                    when.dimmed()
                );
            }
        }
    }

    if !preflight.artifacts.is_empty() {
        println!();
        println!("{}", "Artifacts".bold());
        for artifact in &preflight.artifacts {
            println!(
                "  {} {}:{} -> {}",
                "•".dimmed(),
                artifact.host.cyan(),
                artifact.remote_path,
                artifact.local_name
            );
        }
    }
    for host in &preflight.uncontacted_hosts {
        println!("  {} Host '{}' is not used by any step", "!".yellow(), host);
    }
}

fn print_report(report: &RunReport) {
    let mut steps = Table::new();
    steps.set_header(vec!["Step", "Phase", "Hosts", "Status", "Duration"]);
    for step in &report.steps {
        steps.add_row(vec![
            Cell::new(&step.step),
            Cell::new(step.phase.to_string()),
            Cell::new(step.hosts.len()),
            Cell::new(step.status.to_string()).fg(step_tone(step.status).cell()),
            Cell::new(format!("{:.1}s", step.duration.as_secs_f64())),
        ]);
    }
    println!("{steps}");
    println!();

    let mut hosts = Table::new();
    hosts.set_header(vec![
        "Host",
        "Ok",
        "Failed",
        "Skipped",
        "Timed out",
        "Unreachable",
        "Abandoned",
        "Artifacts",
        "Result",
    ]);
    for summary in report.host_summaries() {
        let verdict = summary.verdict();
        hosts.add_row(vec![
            Cell::new(&summary.host),
            Cell::new(summary.ok),
            Cell::new(summary.failed),
            Cell::new(summary.skipped),
            Cell::new(summary.timed_out),
            Cell::new(summary.unreachable),
            Cell::new(summary.abandoned),
            Cell::new(format!(
                "{}/{}",
                summary.artifacts_collected,
                summary.artifacts_collected + summary.artifacts_missing
            )),
            Cell::new(verdict.to_string()).fg(task_tone(verdict).cell()),
        ]);
    }
    println!("{hosts}");

    let problems: Vec<_> = report
        .steps
        .iter()
        .flat_map(|s| s.results())
        .filter(|r| !matches!(r.status, TaskStatus::Ok | TaskStatus::Skipped))
        .collect();
    if !problems.is_empty() {
        println!();
        println!("{}", "Problems".bold());
        for result in problems {
            let detail = result
                .message
                .clone()
                .or_else(|| result.exit_code.map(|code| format!("exit code {}", code)))
                .unwrap_or_default();
            println!(
                "  {} {} {}: {} {}",
                "•".dimmed(),
                result.host.cyan(),
                result.task,
                result.status.to_string().color(task_tone(result.status).text()),
                detail.dimmed()
            );
        }
    }

    if !report.artifacts.is_empty() {
        println!();
        println!("{}", "Artifacts".bold());
        for record in &report.artifacts {
            let location = record
                .local_path
                .as_ref()
                .map_or_else(|| record.remote_path.clone(), |p| p.display().to_string());
            println!(
                "  {} {} {}: {} {}",
                "•".dimmed(),
                record.host.cyan(),
                record.artifact,
                record.status.to_string().color(artifact_tone(record.status).text()),
                location.dimmed()
            );
        }
    }

    println!();
    if let Some(reason) = &report.abort_reason {
        println!("  {} Aborted: {}", "!".red(), reason);
    }
    println!(
        "  Outcome: {} (exit {})",
        report.outcome.to_string().color(outcome_tone(report.outcome).text()).bold(),
        report.exit_code()
    );
}
