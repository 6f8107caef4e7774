//! fleetbench CLI - run benchmark plans across a fleet of hosts.
//!
//! Provides the `fleetbench` command: `run` executes a plan, `validate`
//! checks it without contacting any host, `hosts` lists what a selector
//! resolves to.

mod colors;
mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{hosts, run, validate};

/// Exit code for configuration errors: bad plan, inventory or config file.
const EXIT_CONFIG_ERROR: i32 = 2;

/// fleetbench - fleet benchmark orchestrator
#[derive(Parser, Debug)]
#[command(
    name = "fleetbench",
    author,
    version,
    about = "fleetbench - run benchmark plans across a fleet of hosts",
    long_about = "fleetbench runs benchmark plans (server, client and teardown steps) across an inventory of hosts over ssh and collects the results."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (skips ~/.fleetbench/config.toml and ./.fleetbenchrc)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a plan
    ///
    /// Runs the prepare, server and client steps, collects artifacts and
    /// tears down. The exit code reflects the outcome.
    Run {
        /// Plan file (YAML)
        plan: PathBuf,

        /// Only touch hosts in this group or selector
        #[arg(short, long)]
        group: Option<String>,

        /// List rendered commands without contacting any host
        #[arg(long)]
        dry_run: bool,

        /// Inventory file, replacing the plan's own inventory
        #[arg(short, long)]
        inventory: Option<PathBuf>,

        /// Directory collected artifacts are written to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Write the full JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the JSON report instead of the summary table
        #[arg(long)]
        json: bool,
    },

    /// Check a plan without running it
    Validate {
        /// Plan file (YAML)
        plan: PathBuf,

        /// Inventory file, replacing the plan's own inventory
        #[arg(short, long)]
        inventory: Option<PathBuf>,
    },

    /// List the hosts a plan's inventory resolves to
    Hosts {
        /// Plan file (YAML)
        plan: PathBuf,

        /// Group or selector to resolve (defaults to all)
        #[arg(short, long)]
        group: Option<String>,

        /// Inventory file, replacing the plan's own inventory
        #[arg(short, long)]
        inventory: Option<PathBuf>,
    },
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let loaded = config::load_config(args.config.as_deref());

    // --log-level, then --verbose, then the config file
    let level = match (&args.log_level, args.verbose, &loaded) {
        (Some(level), _, _) => parse_level(level),
        (None, true, _) => Level::DEBUG,
        (None, false, Ok(config)) => config.log_level.as_deref().map_or(Level::INFO, parse_level),
        (None, false, Err(_)) => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("{} {}", "Error:".red().bold(), e);
    }

    let result = match loaded {
        Ok(config) => match args.command {
            Command::Run {
                plan,
                group,
                dry_run,
                inventory,
                output_dir,
                report,
                json,
            } => {
                let run_args = run::RunArgs {
                    plan,
                    group,
                    dry_run,
                    inventory,
                    output_dir,
                    report,
                    json,
                };
                run::execute(run_args, &config).await
            }
            Command::Validate { plan, inventory } => {
                validate::execute(&plan, inventory.as_deref(), &config)
            }
            Command::Hosts {
                plan,
                group,
                inventory,
            } => {
                hosts::execute(&plan, group.as_deref(), inventory.as_deref())
            }
        },
        Err(e) => Err(e),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            EXIT_CONFIG_ERROR
        }
    };
    std::process::exit(code);
}
