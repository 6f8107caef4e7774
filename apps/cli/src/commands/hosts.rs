//! Hosts command: show what a selector resolves to.

use colored::Colorize;
use comfy_table::{Cell, Table};
use fleetbench_core::GroupSelector;
use std::path::Path;

pub fn execute(plan: &Path, group: Option<&str>, inventory: Option<&Path>) -> anyhow::Result<i32> {
    let (plan, inventory) = super::load_plan(plan, inventory)?;
    let selector = super::parse_selector(group)?.unwrap_or(GroupSelector::All);
    let hosts = inventory.resolve(&selector)?;

    println!("{}", "fleetbench hosts".bold().cyan());
    println!();
    println!("  {} Plan: {}", "•".dimmed(), plan.name.cyan());
    println!("  {} Selector: {}", "•".dimmed(), selector.to_string().cyan());
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Host", "Address", "Connection", "Groups", "Tags"]);
    for host in &hosts {
        table.add_row(vec![
            Cell::new(&host.name),
            Cell::new(host.destination()),
            Cell::new(host.connection.to_string()),
            Cell::new(inventory.groups_of(&host.name).join(", ")),
            Cell::new(host.tags.join(", ")),
        ]);
    }
    println!("{table}");
    println!();
    println!("  {} host(s)", hosts.len());
    Ok(0)
}
