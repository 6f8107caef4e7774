//! Command implementations for the fleetbench CLI.

pub mod hosts;
pub mod run;
pub mod validate;

use anyhow::Context;
use fleetbench_core::{GroupSelector, Inventory, Plan, PlanParser};
use std::path::Path;

/// Parses the plan and loads its inventory.
///
/// `inventory` replaces whatever inventory the plan declares. A relative
/// `inventory_file` inside the plan is resolved against the plan's directory.
pub(crate) fn load_plan(
    path: &Path,
    inventory: Option<&Path>,
) -> anyhow::Result<(Plan, Inventory)> {
    let plan = PlanParser::parse_file(path)?;
    let inventory = match inventory {
        Some(file) => Inventory::load(file)?,
        None => {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            plan.load_inventory(base)
                .with_context(|| format!("Failed to load inventory for plan '{}'", plan.name))?
        }
    };
    Ok((plan, inventory))
}

pub(crate) fn parse_selector(group: Option<&str>) -> anyhow::Result<Option<GroupSelector>> {
    group
        .map(|g| g.parse::<GroupSelector>().with_context(|| format!("Invalid --group '{}'", g)))
        .transpose()
}
