//! Validate command: parse and preflight a plan without contacting any host.

use colored::Colorize;
use fleetbench_core::FleetConfig;
use fleetbench_orchestrator::{Driver, DriverOptions, TransportRouter};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

pub fn execute(plan: &Path, inventory: Option<&Path>, config: &FleetConfig) -> anyhow::Result<i32> {
    let (plan, inventory) = super::load_plan(plan, inventory)?;
    let name = plan.name.clone();
    let transport = Arc::new(TransportRouter::new(&config.ssh));
    let driver = Driver::new(plan, inventory, config, transport, DriverOptions::default())?;
    let preflight = driver.preflight()?;

    let hosts: HashSet<&str> = preflight
        .steps
        .iter()
        .flat_map(|s| s.hosts.iter().map(|h| h.host.as_str()))
        .collect();

    println!("{}", "fleetbench validate".bold().cyan());
    println!();
    println!("  {} Plan '{}' is valid", "✓".green(), name.cyan());
    println!("  {} Steps: {}", "•".dimmed(), preflight.steps.len());
    println!("  {} Hosts: {}", "•".dimmed(), hosts.len());
    println!("  {} Artifacts: {}", "•".dimmed(), preflight.artifacts.len());
    if let Some(server) = &preflight.server {
        println!("  {} Server: {}", "•".dimmed(), server);
    }
    for host in &preflight.uncontacted_hosts {
        println!("  {} Host '{}' is not used by any step", "!".yellow(), host);
    }
    Ok(0)
}
