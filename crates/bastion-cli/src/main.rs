//! Bastion CLI
//!
//! Main entry point for the `bastion` binary.

use std::process::ExitCode;

use anyhow::Context;
use bastion_common_log::{LogConfig, LogLevel};
use clap::Parser;
use tracing::error;

mod cli;
mod commands;
mod error;
mod output;

use cli::Cli;
use error::CliError;

/// Application exit codes
#[repr(u8)]
pub enum Exit {
    Success = 0,
    GeneralError = 1,
    ConfigError = 2,
    DatabaseError = 3,
    MigrationError = 4,
    ValidationError = 5,
    Interrupted = 130,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(&cli);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Exit::GeneralError.into();
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => Exit::Success.into(),
        Err(e) => {
            error!(code = e.code(), "{e}");
            eprintln!("error[{}]: {e}", e.code());
            e.exit_code().into()
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.load_config()?;

    tokio::select! {
        result = cli.execute(config) => result,
        _ = tokio::signal::ctrl_c() => Err(CliError::Interrupted),
    }
}

fn init_logging(cli: &Cli) {
    let mut config = LogConfig::from_env();
    // Explicit flags beat BASTION_LOG_LEVEL.
    if cli.verbose > 0 || cli.quiet {
        config = config.with_level(LogLevel::from_verbosity(cli.verbose, cli.quiet));
    }
    if let Err(e) = bastion_common_log::init(config) {
        eprintln!("warning: logging disabled: {e}");
    }
}
