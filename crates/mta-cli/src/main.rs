//! mtactl - Plan and simulate MTA deployments
//!
//! This CLI lets operators:
//! - Preview the decisions of a deployment against a platform snapshot
//! - Run the full deployment pipeline against an in-memory platform
//!   seeded from that snapshot, and keep the resulting state

use clap::{Args, Parser, Subcommand};
use mta_platform::InMemoryPlatform;
use mta_types::{ApplicationColor, DeploymentPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod error;
mod input;
mod output;

use config::DeployerConfig;
use error::{CliError, CliResult};
use output::OutputFormat;

/// mtactl application
#[derive(Parser)]
#[command(name = "mtactl")]
#[command(about = "MTA deployer - plan and simulate deployments", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MTA_CONFIG")]
    config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Log level (overrides the configured level)
    #[arg(long, env = "MTA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "MTA_LOG_JSON")]
    json: bool,

    #[command(flatten)]
    policy: PolicyArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Policy switches; each one only ever enables a behavior.
#[derive(Args, Debug, Default)]
struct PolicyArgs {
    /// Allow deleting and recreating services
    #[arg(long)]
    delete_services: bool,

    /// Allow deleting and recreating service keys
    #[arg(long)]
    delete_service_keys: bool,

    /// Downgrade missing broker permissions to warnings
    #[arg(long)]
    no_fail_on_missing_permissions: bool,

    /// Deploy a new blue-green generation
    #[arg(long)]
    blue_green: bool,

    /// Blue-green with original names and -live/-idle suffixes
    #[arg(long)]
    keep_original_app_names: bool,

    /// Live color to assume when both colors are deployed
    #[arg(long)]
    color: Option<ApplicationColor>,
}

impl PolicyArgs {
    fn apply(&self, policy: &mut DeploymentPolicy) -> CliResult<()> {
        policy.delete_services |= self.delete_services;
        policy.delete_service_keys |= self.delete_service_keys;
        policy.no_fail_on_missing_permissions |= self.no_fail_on_missing_permissions;
        policy.blue_green |= self.blue_green || self.keep_original_app_names;
        policy.keep_original_app_names |= self.keep_original_app_names;
        if self.color.is_some() {
            if !policy.blue_green {
                return Err(CliError::InvalidArgument(
                    "--color requires a blue-green deployment".into(),
                ));
            }
            policy.color_override = self.color;
        }
        Ok(())
    }
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Show what a deployment would do, without changing anything
    Plan {
        /// Desired state document (JSON)
        #[arg(short, long)]
        desired: PathBuf,

        /// Platform snapshot document (JSON); empty platform when omitted
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },

    /// Run a deployment against an in-memory copy of the snapshot
    Simulate {
        /// Desired state document (JSON)
        #[arg(short, long)]
        desired: PathBuf,

        /// Platform snapshot document (JSON); empty platform when omitted
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        /// Write the resulting platform state to this file
        #[arg(short, long)]
        write_snapshot: Option<PathBuf>,

        /// Pause between ticks in milliseconds
        #[arg(long, default_value = "0")]
        tick_interval_ms: u64,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DeployerConfig::load(cli.config.as_deref()).map_err(CliError::from)?;
    cli.policy.apply(&mut config.policy)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Plan { desired, snapshot } => {
            let desired = input::load_desired(&desired)?;
            let platform = InMemoryPlatform::from_snapshot(input::load_snapshot(snapshot.as_deref())?);
            commands::plan::execute(desired, &platform, &config.policy, cli.output).await?;
        }
        Commands::Simulate {
            desired,
            snapshot,
            write_snapshot,
            tick_interval_ms,
        } => {
            let desired = input::load_desired(&desired)?;
            let platform = Arc::new(InMemoryPlatform::from_snapshot(input::load_snapshot(
                snapshot.as_deref(),
            )?));
            let scheduler = mta_control::SchedulerConfig {
                tick_interval_ms,
                ..config.scheduler.clone()
            };

            let report = commands::simulate::simulate(
                &desired,
                platform.clone(),
                config.policy.clone(),
                config.polling.clone(),
                &scheduler,
            )
            .await?;
            if let Some(path) = write_snapshot {
                input::write_snapshot(&path, &platform.snapshot())?;
            }
            if !commands::simulate::print_report(&report, cli.output)? {
                output::print_error(&format!("Deployment stopped: {}", report.state.status));
                std::process::exit(2);
            }
        }
        Commands::Config => {
            output::print_single(&config)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_policy_flags_only_enable() {
        let mut policy = DeploymentPolicy {
            delete_services: true,
            ..Default::default()
        };
        let args = PolicyArgs {
            keep_original_app_names: true,
            color: Some(ApplicationColor::Green),
            ..Default::default()
        };
        args.apply(&mut policy).unwrap();

        assert!(policy.delete_services);
        assert!(policy.blue_green);
        assert!(policy.keep_original_app_names);
        assert_eq!(policy.color_override, Some(ApplicationColor::Green));
    }

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "mtactl",
            "--blue-green",
            "simulate",
            "--desired",
            "desired.json",
        ])
        .unwrap();
        assert!(cli.policy.blue_green);
        assert!(matches!(cli.command, Commands::Simulate { tick_interval_ms: 0, .. }));
    }

    #[test]
    fn test_color_requires_blue_green() {
        let mut policy = DeploymentPolicy::default();
        let args = PolicyArgs {
            color: Some(ApplicationColor::Blue),
            ..Default::default()
        };
        let err = args.apply(&mut policy).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
        assert_eq!(policy.color_override, None);
    }
}
