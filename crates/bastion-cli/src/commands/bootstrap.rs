//! `bootstrap` and `reset`.

use std::fmt::Write as _;

use anyhow::anyhow;
use bastion_database::bootstrap::check_reset_guard;
use bastion_database::{BootstrapResult, BootstrapStatus, ResetReport};
use clap::Args;

use super::bootstrapper;
use crate::cli::{CommandContext, OutputFormat};
use crate::error::CliError;
use crate::output::{flag, print_output, FormattedOutput};

#[derive(Debug, Args)]
pub struct BootstrapArgs {
    /// Also create demo projects
    #[arg(long)]
    pub sample_data: bool,

    /// Do not apply pending migrations
    #[arg(long)]
    pub skip_migrations: bool,

    /// Do not create baseline seed rows
    #[arg(long)]
    pub skip_seed: bool,

    /// Report what is present without changing anything
    #[arg(long, conflicts_with_all = ["sample_data", "skip_migrations", "skip_seed"])]
    pub status: bool,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Confirmation token; must be exactly RESET_ALL_DATA
    #[arg(long)]
    pub confirm: String,
}

impl FormattedOutput for BootstrapResult {
    fn format_text(&self) -> String {
        let mut out = String::new();
        let outcome = if self.success { "succeeded" } else { "failed" };
        let _ = writeln!(out, "Bootstrap {outcome} in {} ms", self.duration_ms);
        let _ = writeln!(out, "  migrations run:      {}", self.migrations_run);
        let _ = writeln!(out, "  seed data created:   {}", flag(self.seed_data_created));
        let _ = writeln!(out, "  admin user created:  {}", flag(self.admin_user_created));
        let _ = write!(out, "  sample data created: {}", flag(self.sample_data_created));
        if let Some(notice) = password_notice(self) {
            let _ = write!(out, "\n{notice}");
        }
        for error in &self.errors {
            let _ = write!(out, "\n  error: {error}");
        }
        out
    }
}

/// One-time notice for a generated admin password.
fn password_notice(result: &BootstrapResult) -> Option<String> {
    result
        .generated_admin_password
        .as_ref()
        .map(|password| format!("  generated admin password: {password} (shown once; change it after first login)"))
}

impl FormattedOutput for BootstrapStatus {
    fn format_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Initialized:    {}", flag(self.initialized));
        let _ = writeln!(out, "  tenant:         {}", flag(self.has_tenant));
        let _ = writeln!(out, "  admin:          {}", flag(self.has_admin));
        let _ = writeln!(out, "  reference data: {}", flag(self.has_reference_data));
        let _ = writeln!(out, "  sample data:    {}", flag(self.has_sample_data));
        let _ = write!(
            out,
            "  migrations:     {} applied, {} pending, {} failed",
            self.migrations.executed.len(),
            self.migrations.pending.len(),
            self.migrations.failed.len()
        );
        out
    }
}

impl FormattedOutput for ResetReport {
    fn format_text(&self) -> String {
        if self.tables_dropped.is_empty() {
            "Nothing to drop.".to_string()
        } else {
            format!("Dropped {}.", self.tables_dropped.join(", "))
        }
    }
}

pub async fn run(ctx: &CommandContext, args: &BootstrapArgs) -> Result<(), CliError> {
    let (manager, bootstrapper) = bootstrapper(ctx)?;

    if args.status {
        let result = match manager.initialize().await {
            Ok(()) => bootstrapper.get_status().await,
            Err(e) => Err(e),
        };
        manager.close().await;
        return print_output(ctx, &result?);
    }

    let mut options = bootstrapper.default_options().clone();
    options.run_migrations &= !args.skip_migrations;
    options.create_seed_data &= !args.skip_seed;
    options.create_sample_data |= args.sample_data;

    let result = bootstrapper.initialize(&options).await;
    manager.close().await;

    print_output(ctx, &result)?;
    // Quiet text output would otherwise lose the only copy.
    if ctx.quiet && ctx.format == OutputFormat::Text {
        if let Some(notice) = password_notice(&result) {
            println!("{}", notice.trim_start());
        }
    }
    if result.success {
        Ok(())
    } else {
        Err(CliError::Other(anyhow!("bootstrap failed: {}", result.errors.join("; "))))
    }
}

pub async fn reset(ctx: &CommandContext, args: &ResetArgs) -> Result<(), CliError> {
    check_reset_guard(ctx.config.environment, &args.confirm)?;

    let (manager, bootstrapper) = bootstrapper(ctx)?;
    let result = match manager.initialize().await {
        Ok(()) => bootstrapper.reset(&args.confirm).await,
        Err(e) => Err(e),
    };
    manager.close().await;

    print_output(ctx, &result?)
}
