//! Command implementations.

pub mod bootstrap;
pub mod health;
pub mod migrate;

use bastion_database::{Bootstrapper, ConnectionManager, MigrationRunner};

pub use bootstrap::{BootstrapArgs, ResetArgs};
pub use migrate::ForgetArgs;

use crate::cli::CommandContext;
use crate::error::CliError;

/// Open a pool for the configured database.
async fn connect(ctx: &CommandContext) -> Result<ConnectionManager, CliError> {
    let manager = ConnectionManager::new(ctx.config.database.clone());
    manager.initialize().await?;
    Ok(manager)
}

async fn runner(ctx: &CommandContext) -> Result<(ConnectionManager, MigrationRunner), CliError> {
    let manager = connect(ctx).await?;
    let runner = MigrationRunner::builtin(manager.clone(), ctx.config.migrations.clone())?;
    Ok((manager, runner))
}

/// The bootstrapper connects lazily; its own errors are reported in the result.
fn bootstrapper(ctx: &CommandContext) -> Result<(ConnectionManager, Bootstrapper), CliError> {
    let manager = ConnectionManager::new(ctx.config.database.clone());
    let bootstrapper = Bootstrapper::from_config(manager.clone(), &ctx.config)?;
    Ok((manager, bootstrapper))
}
