//! `migrate`, `verify` and `forget`.

use std::fmt::Write as _;

use bastion_database::migration::{MigrationReport, MigrationStatus, MigrationVersion};
use bastion_database::{ChecksumDrift, DbError};
use clap::Args;
use serde::Serialize;
use tracing::info;

use super::runner;
use crate::cli::CommandContext;
use crate::error::CliError;
use crate::output::{print_output, FormattedOutput};

#[derive(Debug, Args)]
pub struct ForgetArgs {
    /// Migration version, e.g. 003
    #[arg(id = "migration_version", value_name = "VERSION")]
    pub version: String,
}

impl FormattedOutput for MigrationReport {
    fn format_text(&self) -> String {
        let mut out = String::new();
        if self.applied.is_empty() {
            out.push_str("Database is up to date.");
        } else {
            let _ = write!(out, "Applied {} migration(s):", self.applied.len());
            for m in &self.applied {
                let _ = write!(out, "\n  {} {} ({} ms)", m.version, m.name, m.execution_time_ms);
            }
        }
        for file in &self.skipped_invalid {
            let _ = write!(out, "\n  skipped {file}: not a forward migration");
        }
        out
    }
}

impl FormattedOutput for MigrationStatus {
    fn format_text(&self) -> String {
        let mut out = String::new();
        for summary in &self.available {
            let marker = if self.failed.iter().any(|f| f.version == summary.version) {
                "failed "
            } else if self.pending.iter().any(|p| p.version == summary.version) {
                "pending"
            } else {
                "applied"
            };
            let _ = writeln!(out, "  [{marker}] {} {}", summary.version, summary.name);
        }
        let _ = write!(
            out,
            "{} available, {} applied, {} pending",
            self.available.len(),
            self.executed.len(),
            self.pending.len()
        );
        out
    }
}

impl FormattedOutput for ChecksumDrift {
    fn format_text(&self) -> String {
        if self.is_clean() {
            "All applied migrations match their checksums.".to_string()
        } else {
            format!("Checksum drift: {self}")
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForgetOutcome {
    version: String,
    removed: bool,
}

impl FormattedOutput for ForgetOutcome {
    fn format_text(&self) -> String {
        if self.removed {
            format!(
                "Removed ledger row for {}; schema changes were not reverted.",
                self.version
            )
        } else {
            format!("No ledger row recorded for {}.", self.version)
        }
    }
}

pub async fn run(ctx: &CommandContext) -> Result<(), CliError> {
    let (manager, runner) = runner(ctx).await?;
    let result = runner.migrate().await;
    manager.close().await;

    let report = result?;
    info!(applied = report.migrations_run(), "Migrate finished");
    print_output(ctx, &report)
}

pub async fn status(ctx: &CommandContext) -> Result<(), CliError> {
    let (manager, runner) = runner(ctx).await?;
    let result = runner.get_status().await;
    manager.close().await;

    print_output(ctx, &result?)
}

pub async fn verify(ctx: &CommandContext) -> Result<(), CliError> {
    let (manager, runner) = runner(ctx).await?;
    let result = runner.verify().await;
    manager.close().await;

    let drift = result?;
    print_output(ctx, &drift)?;
    if drift.is_clean() {
        Ok(())
    } else {
        Err(DbError::ChecksumMismatch(drift.to_string()).into())
    }
}

pub async fn forget(ctx: &CommandContext, args: &ForgetArgs) -> Result<(), CliError> {
    if MigrationVersion::parse(&args.version).is_none() {
        return Err(CliError::validation(format!(
            "'{}' is not a migration version",
            args.version
        )));
    }

    let (manager, runner) = runner(ctx).await?;
    let result = runner.forget(&args.version).await;
    manager.close().await;

    print_output(
        ctx,
        &ForgetOutcome {
            version: args.version.clone(),
            removed: result?,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_database::migration::{ChecksumMismatch, MigrationResult, MigrationSummary};

    fn summary(version: &str, name: &str) -> MigrationSummary {
        MigrationSummary {
            version: version.to_string(),
            name: name.to_string(),
            description: None,
            checksum: "00".to_string(),
        }
    }

    #[test]
    fn test_empty_report_says_up_to_date() {
        assert_eq!(MigrationReport::default().format_text(), "Database is up to date.");
    }

    #[test]
    fn test_report_lists_applied() {
        let report = MigrationReport {
            applied: vec![MigrationResult {
                version: "002".to_string(),
                name: "audit_log".to_string(),
                execution_time_ms: 7,
            }],
            skipped_invalid: vec!["2 audit log".to_string()],
        };
        let text = report.format_text();
        assert!(text.starts_with("Applied 1 migration(s):"));
        assert!(text.contains("002 audit_log (7 ms)"));
        assert!(text.contains("skipped 2 audit log"));
    }

    #[test]
    fn test_forget_outcome_text() {
        let removed = ForgetOutcome {
            version: "003".to_string(),
            removed: true,
        };
        assert_eq!(
            removed.format_text(),
            "Removed ledger row for 003; schema changes were not reverted."
        );
        let absent = ForgetOutcome {
            version: "004".to_string(),
            removed: false,
        };
        assert_eq!(absent.format_text(), "No ledger row recorded for 004.");
    }

    #[test]
    fn test_status_marks_pending() {
        let status = MigrationStatus {
            available: vec![summary("001", "baseline_schema"), summary("002", "audit_log")],
            executed: vec![],
            pending: vec![summary("002", "audit_log")],
            failed: vec![],
        };
        let text = status.format_text();
        assert!(text.contains("[applied] 001 baseline_schema"));
        assert!(text.contains("[pending] 002 audit_log"));
        assert!(text.ends_with("2 available, 0 applied, 1 pending"));
    }

    #[test]
    fn test_drift_text() {
        assert!(ChecksumDrift::default().format_text().starts_with("All applied"));
        let drift = ChecksumDrift {
            mismatched: vec![ChecksumMismatch {
                version: "001".to_string(),
                name: "baseline_schema".to_string(),
                expected: "aa".to_string(),
                recorded: "bb".to_string(),
            }],
            missing: vec![],
        };
        assert_eq!(
            drift.format_text(),
            "Checksum drift: 001 (baseline_schema) expected aa found bb"
        );
    }
}
