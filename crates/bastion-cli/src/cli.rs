//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use bastion_common_config::{BastionConfig, ConfigLoader, Environment};
use clap::{ArgAction, Parser, Subcommand, ValueHint};

use crate::commands::{self, BootstrapArgs, ForgetArgs, ResetArgs};
use crate::error::CliError;

/// Bastion - database migrations, bootstrap and health for PostgreSQL
#[derive(Debug, Parser)]
#[command(
    name = "bastion",
    author,
    version,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Increase verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "BASTION_CONFIG",
        value_hint = ValueHint::FilePath
    )]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply pending migrations
    #[command(visible_alias = "up")]
    Migrate,

    /// Show applied, pending and failed migrations
    Status,

    /// Compare ledger checksums against the embedded migrations
    Verify,

    /// Delete a migration's ledger row so the next migrate runs it again
    ///
    /// Schema changes it already made are not reverted.
    Forget(ForgetArgs),

    /// Migrate and seed the database
    Bootstrap(BootstrapArgs),

    /// Check database connectivity
    Health,

    /// Show pool statistics and recent query metrics
    Stats,

    /// Drop every Bastion table (never in production)
    Reset(ResetArgs),
}

/// Shared state for command execution
#[derive(Debug)]
pub struct CommandContext {
    pub config: BastionConfig,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl Cli {
    /// Load configuration from `--config`, or from `.bastion/config.yaml` under the working directory.
    pub fn load_config(&self) -> Result<BastionConfig, CliError> {
        Environment::init().map_err(|e| CliError::config(e.to_string()))?;

        let config = match &self.config {
            Some(path) => ConfigLoader::load_file(path)?,
            None => ConfigLoader::new(".").load()?,
        };
        Ok(config)
    }

    /// Execute the selected command
    pub async fn execute(&self, config: BastionConfig) -> Result<(), CliError> {
        let ctx = CommandContext {
            config,
            format: self.format,
            quiet: self.quiet,
        };

        match &self.command {
            Command::Migrate => commands::migrate::run(&ctx).await,
            Command::Status => commands::migrate::status(&ctx).await,
            Command::Verify => commands::migrate::verify(&ctx).await,
            Command::Forget(args) => commands::migrate::forget(&ctx, args).await,
            Command::Bootstrap(args) => commands::bootstrap::run(&ctx, args).await,
            Command::Health => commands::health::health(&ctx).await,
            Command::Stats => commands::health::stats(&ctx).await,
            Command::Reset(args) => commands::bootstrap::reset(&ctx, args).await,
        }
    }
}
