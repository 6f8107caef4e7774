//! CLI configuration loading.

use anyhow::Context;
use fleetbench_core::FleetConfig;
use std::path::Path;

/// Load the configuration.
///
/// Precedence, highest first:
/// 1. CLI arguments (applied by each command)
/// 2. `FLEETBENCH_*` environment variables
/// 3. `--config <file>`, or else the local `./.fleetbenchrc`
/// 4. Global config file (`~/.fleetbench/config.toml`)
/// 5. Defaults
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    let Some(path) = path else {
        return FleetConfig::discover_and_load().context("Failed to load configuration");
    };

    let mut config = FleetConfig::load_from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config
        .apply_env_overrides(|key| std::env::var(key).ok())
        .context("Invalid FLEETBENCH_* environment override")?;
    Ok(config)
}
