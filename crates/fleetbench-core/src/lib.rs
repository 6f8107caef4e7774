//! fleetbench core - inventory, plan and configuration model.
//!
//! This crate holds everything fleetbench knows before it touches a host:
//! - Inventory of hosts and nested groups with layered variables
//! - Benchmark plans parsed from YAML
//! - `{{ var }}` templates and `when` conditions
//! - The TOML configuration file
//!
//! # Example
//!
//! ```rust,no_run
//! use fleetbench_core::{GroupSelector, PlanParser};
//! use std::path::Path;
//!
//! let plan = PlanParser::parse_file("plan.yml")?;
//! let inventory = plan.load_inventory(Path::new("."))?;
//! for host in inventory.resolve(&GroupSelector::All)? {
//!     println!("{} -> {}", host.name, host.address);
//! }
//! # Ok::<(), fleetbench_core::ConfigError>(())
//! ```

pub mod config;
pub mod error;
pub mod inventory;
pub mod plan;
pub mod template;
pub mod vars;

pub use config::{
    ConfigLayer, ExecutionConfig, ExecutionLayer, FleetConfig, FleetConfigError, SshConfig,
    SshLayer,
};
pub use error::{ConfigError, Result};
pub use inventory::{
    ALL_GROUP, Connection, GroupDef, GroupSelector, Host, HostDef, Inventory, InventoryDef,
};
pub use plan::{
    ArtifactSpec, ConcurrencyMode, Condition, ExecMode, Phase, Plan, PlanParser, PlanStep,
    PollBudget, Task, Test,
};
pub use template::{Placeholder, Template, TemplateError};
pub use vars::{VarScope, Vars, render_value};
