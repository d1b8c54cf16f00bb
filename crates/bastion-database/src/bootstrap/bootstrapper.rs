//! Orchestrates connect, migrate and seed; guarded destructive reset.

use super::seed::{self, AdminSeed, SeedSummary, TenantSeed};
use crate::error::{DbError, ResetGuardReason, Result};
use crate::manager::ConnectionManager;
use crate::migration::{MigrationRunner, MigrationStatus, LEDGER_TABLE};
use crate::params::SqlParam;
use bastion_common_config::{BastionConfig, BootstrapConfig, RuntimeEnvironment};
use serde::Serialize;
use sqlx::{PgConnection, Row};
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Literal that must be passed to [`Bootstrapper::reset`].
pub const RESET_CONFIRMATION_TOKEN: &str = "RESET_ALL_DATA";

/// Tables dropped by reset, dependents first.
pub const RESET_ORDER: &[&str] = &[
    "projects",
    "audit_log",
    "users",
    "reference_data",
    "system_settings",
    "tenants",
    LEDGER_TABLE,
];

/// What a bootstrap run should do.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub run_migrations: bool,
    pub create_seed_data: bool,
    pub create_sample_data: bool,
    pub tenant: TenantSeed,
    pub admin: AdminSeed,
}

impl BootstrapOptions {
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            run_migrations: config.run_migrations,
            create_seed_data: config.create_seed_data,
            create_sample_data: config.create_sample_data,
            tenant: TenantSeed::from_config(config),
            admin: AdminSeed::from_config(config),
        }
    }
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self::from_config(&BootstrapConfig::default())
    }
}

/// Outcome of [`Bootstrapper::initialize`]. Callers must check `success`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResult {
    pub success: bool,
    pub migrations_run: usize,
    pub seed_data_created: bool,
    pub sample_data_created: bool,
    pub admin_user_created: bool,
    pub errors: Vec<String>,
    /// Set only when this run created the admin with a generated password.
    /// Never logged; the caller shows it once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_admin_password: Option<String>,
    /// Wall time in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

/// Presence of baseline rows plus migration state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapStatus {
    pub initialized: bool,
    pub migrations: MigrationStatus,
    pub has_tenant: bool,
    pub has_admin: bool,
    pub has_reference_data: bool,
    pub has_sample_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub tables_dropped: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Presence {
    tenant: bool,
    admin: bool,
    reference_data: bool,
    sample_data: bool,
}

impl Presence {
    fn baseline_complete(&self) -> bool {
        self.tenant && self.admin && self.reference_data
    }
}

/// Check the reset guard without touching the database.
pub fn check_reset_guard(environment: RuntimeEnvironment, confirmation: &str) -> Result<()> {
    if environment.is_production() {
        return Err(DbError::ResetGuard(ResetGuardReason::ProductionEnvironment));
    }
    if confirmation != RESET_CONFIRMATION_TOKEN {
        return Err(DbError::ResetGuard(ResetGuardReason::InvalidConfirmation));
    }
    Ok(())
}

/// Turns an empty or partially provisioned database into a ready one.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    manager: ConnectionManager,
    runner: MigrationRunner,
    environment: RuntimeEnvironment,
    defaults: BootstrapOptions,
}

impl Bootstrapper {
    pub fn new(
        manager: ConnectionManager,
        runner: MigrationRunner,
        environment: RuntimeEnvironment,
        defaults: BootstrapOptions,
    ) -> Self {
        Self {
            manager,
            runner,
            environment,
            defaults,
        }
    }

    /// Bootstrapper over the built-in migrations, configured from `config`.
    pub fn from_config(manager: ConnectionManager, config: &BastionConfig) -> Result<Self> {
        let runner = MigrationRunner::builtin(manager.clone(), config.migrations.clone())?;
        Ok(Self::new(
            manager,
            runner,
            config.environment,
            BootstrapOptions::from_config(&config.bootstrap),
        ))
    }

    pub fn runner(&self) -> &MigrationRunner {
        &self.runner
    }

    /// Options taken from configuration.
    pub fn default_options(&self) -> &BootstrapOptions {
        &self.defaults
    }

    /// Connect, migrate and seed.
    ///
    /// Never returns an error: failures are collected in
    /// [`BootstrapResult::errors`] and `success` is false.
    #[instrument(skip_all, fields(environment = self.environment.as_str()))]
    pub async fn initialize(&self, options: &BootstrapOptions) -> BootstrapResult {
        let start = Instant::now();
        let mut result = BootstrapResult::default();

        if let Err(e) = self.manager.initialize().await {
            error!(error = %e, "Bootstrap could not connect");
            result.errors.push(e.to_string());
            return finish(result, start);
        }

        if options.run_migrations {
            match self.runner.migrate().await {
                Ok(report) => result.migrations_run = report.migrations_run(),
                Err(e) => {
                    error!(error = %e, "Bootstrap migrations failed");
                    result.errors.push(e.to_string());
                    return finish(result, start);
                }
            }
        }

        if options.create_seed_data {
            match self.create_seed_data(options).await {
                Ok(summary) => {
                    result.seed_data_created = summary.rows_inserted() > 0;
                    result.admin_user_created = summary.admin.is_inserted();
                    result.generated_admin_password = summary.generated_password;
                }
                Err(e) => {
                    error!(error = %e, "Seed data creation failed");
                    result.errors.push(e.to_string());
                }
            }
        }

        if options.create_sample_data {
            match self.create_sample_data(options).await {
                Ok(inserted) => result.sample_data_created = inserted > 0,
                Err(e) => {
                    error!(error = %e, "Sample data creation failed");
                    result.errors.push(e.to_string());
                }
            }
        }

        let result = finish(result, start);
        info!(
            success = result.success,
            migrations_run = result.migrations_run,
            seed_data_created = result.seed_data_created,
            duration_ms = result.duration_ms,
            "Bootstrap finished"
        );
        result
    }

    /// Baseline rows in a single transaction.
    async fn create_seed_data(&self, options: &BootstrapOptions) -> Result<SeedSummary> {
        let mut tx = self.manager.begin().await?;

        let summary =
            match seed::seed_baseline(&self.manager, &mut tx, &options.tenant, &options.admin, self.environment)
                .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "Rollback of seed transaction failed");
                    }
                    return Err(e);
                }
            };

        tx.commit().await.map_err(|e| DbError::seed("commit", e))?;

        if summary.generated_password.is_some() {
            warn!(
                email = %options.admin.email,
                "Created admin user with a generated password; change it after first login"
            );
        }
        info!(rows_inserted = summary.rows_inserted(), "Seed data applied");
        Ok(summary)
    }

    /// Demo rows in their own transaction.
    async fn create_sample_data(&self, options: &BootstrapOptions) -> Result<usize> {
        let mut tx = self.manager.begin().await?;
        let inserted = match seed::seed_sample_data(&self.manager, &mut tx, &options.tenant, &options.admin).await {
            Ok(inserted) => inserted,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback of sample data transaction failed");
                }
                return Err(e);
            }
        };
        tx.commit().await.map_err(|e| DbError::seed("commit", e))?;
        info!(inserted, "Sample data applied");
        Ok(inserted)
    }

    /// True only when tenant, admin and every baseline reference row exist.
    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.presence().await?.baseline_complete())
    }

    pub async fn get_status(&self) -> Result<BootstrapStatus> {
        let migrations = self.runner.get_status().await?;
        let presence = self.presence().await?;
        Ok(BootstrapStatus {
            initialized: presence.baseline_complete(),
            migrations,
            has_tenant: presence.tenant,
            has_admin: presence.admin,
            has_reference_data: presence.reference_data,
            has_sample_data: presence.sample_data,
        })
    }

    async fn presence(&self) -> Result<Presence> {
        let mut conn = self.manager.connection().await?;
        let conn = &mut *conn;
        let tenant_id = self.defaults.tenant.id;

        let mut presence = Presence::default();

        if self.table_exists(conn, "tenants").await? {
            presence.tenant = self
                .exists(conn, "SELECT EXISTS (SELECT 1 FROM tenants WHERE id = $1)", &[tenant_id.into()])
                .await?;
        }
        if self.table_exists(conn, "users").await? {
            presence.admin = self
                .exists(conn, "SELECT EXISTS (SELECT 1 FROM users WHERE role = 'admin')", &[])
                .await?;
        }
        if self.table_exists(conn, "reference_data").await? {
            let keys = seed::reference_keys();
            let expected = keys.len() as i64;
            let rows = self
                .manager
                .query_on(
                    conn,
                    "SELECT COUNT(*) FROM reference_data WHERE category || ':' || code = ANY($1)",
                    &[keys.into()],
                )
                .await?;
            let found: i64 = match rows.first() {
                Some(row) => row.try_get(0).map_err(|source| DbError::Query {
                    statement: "SELECT COUNT(*) FROM reference_data".to_string(),
                    source,
                })?,
                None => 0,
            };
            presence.reference_data = found == expected;
        }
        if self.table_exists(conn, "projects").await? {
            presence.sample_data = self
                .exists(conn, "SELECT EXISTS (SELECT 1 FROM projects WHERE tenant_id = $1)", &[tenant_id.into()])
                .await?;
        }

        Ok(presence)
    }

    /// Whether `table` exists in the session's current schema. Same-named
    /// tables further down the search path do not count.
    async fn table_exists(&self, conn: &mut PgConnection, table: &str) -> Result<bool> {
        self.exists(conn, TABLE_IN_CURRENT_SCHEMA, &[table.into()]).await
    }

    async fn exists(&self, conn: &mut PgConnection, sql: &str, params: &[SqlParam]) -> Result<bool> {
        let rows = self.manager.query_on(conn, sql, params).await?;
        match rows.first() {
            Some(row) => row.try_get(0).map_err(|source| DbError::Query {
                statement: sql.to_string(),
                source,
            }),
            None => Ok(false),
        }
    }

    async fn current_schema(&self, conn: &mut PgConnection) -> Result<String> {
        let sql = "SELECT current_schema()";
        let rows = self.manager.query_on(conn, sql, &[]).await?;
        let schema: Option<String> = match rows.first() {
            Some(row) => row.try_get(0).map_err(|source| DbError::Query {
                statement: sql.to_string(),
                source,
            })?,
            None => None,
        };
        schema.ok_or_else(|| DbError::Config("search_path names no existing schema".to_string()))
    }

    /// Drop every known table, the ledger included, in one transaction.
    ///
    /// Refused in production and without the exact confirmation token; the
    /// guard is checked before any database access.
    #[instrument(skip_all, fields(environment = self.environment.as_str()))]
    pub async fn reset(&self, confirmation: &str) -> Result<ResetReport> {
        if let Err(e) = check_reset_guard(self.environment, confirmation) {
            error!(error = %e, "Database reset refused");
            return Err(e);
        }

        warn!("Resetting database: dropping all tables");

        let mut tx = self.manager.begin().await?;
        let schema = quote_ident(&self.current_schema(&mut tx).await?);
        let mut report = ResetReport::default();

        for table in RESET_ORDER {
            if self.table_exists(&mut tx, table).await? {
                let drop = format!("DROP TABLE IF EXISTS {}.{} CASCADE", schema, quote_ident(table));
                self.manager.execute_on(&mut tx, &drop, &[]).await?;
                report.tables_dropped.push(table.to_string());
            }
        }
        let drop_function = format!("DROP FUNCTION IF EXISTS {}.set_updated_at() CASCADE", schema);
        self.manager.execute_on(&mut tx, &drop_function, &[]).await?;

        tx.commit().await.map_err(DbError::Transaction)?;
        warn!(tables = report.tables_dropped.len(), "Database reset complete");
        Ok(report)
    }
}

const TABLE_IN_CURRENT_SCHEMA: &str =
    "SELECT to_regclass(quote_ident(current_schema()) || '.' || quote_ident($1)) IS NOT NULL";

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn finish(mut result: BootstrapResult, start: Instant) -> BootstrapResult {
    result.success = result.errors.is_empty();
    result.duration_ms = start.elapsed().as_millis() as u64;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_guard_rejects_wrong_token() {
        let err = check_reset_guard(RuntimeEnvironment::Development, "reset_all_data").unwrap_err();
        assert!(matches!(err, DbError::ResetGuard(ResetGuardReason::InvalidConfirmation)));
        assert!(check_reset_guard(RuntimeEnvironment::Test, RESET_CONFIRMATION_TOKEN).is_ok());
    }

    #[test]
    fn test_reset_guard_blocks_production_even_with_token() {
        let err = check_reset_guard(RuntimeEnvironment::Production, RESET_CONFIRMATION_TOKEN).unwrap_err();
        assert!(matches!(err, DbError::ResetGuard(ResetGuardReason::ProductionEnvironment)));
    }

    #[test]
    fn test_reset_order_drops_dependents_first() {
        let position = |t: &str| RESET_ORDER.iter().position(|x| *x == t).unwrap();
        assert!(position("projects") < position("users"));
        assert!(position("users") < position("tenants"));
        assert!(position("audit_log") < position("tenants"));
        assert_eq!(RESET_ORDER.last(), Some(&LEDGER_TABLE));
    }

    #[test]
    fn test_result_contract_fields() {
        let result = finish(
            BootstrapResult {
                migrations_run: 3,
                seed_data_created: true,
                admin_user_created: true,
                ..Default::default()
            },
            Instant::now(),
        );
        assert!(result.success);
        let json = serde_json::to_value(&result).unwrap();
        for key in [
            "success",
            "migrationsRun",
            "seedDataCreated",
            "sampleDataCreated",
            "adminUserCreated",
            "errors",
            "duration",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("bastion_test"), "\"bastion_test\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_generated_password_only_serialized_when_set() {
        let json = serde_json::to_value(BootstrapResult::default()).unwrap();
        assert!(json.get("generatedAdminPassword").is_none());

        let result = BootstrapResult {
            generated_admin_password: Some("s3cret".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["generatedAdminPassword"], "s3cret");
    }

    #[test]
    fn test_errors_mark_result_failed() {
        let result = finish(
            BootstrapResult {
                errors: vec!["Seed step 'admin' failed: boom".to_string()],
                ..Default::default()
            },
            Instant::now(),
        );
        assert!(!result.success);
    }

    #[test]
    fn test_options_from_config() {
        let config = BootstrapConfig {
            create_sample_data: true,
            admin_email: "ops@example.org".to_string(),
            ..Default::default()
        };
        let options = BootstrapOptions::from_config(&config);
        assert!(options.create_sample_data);
        assert_eq!(options.admin.email, "ops@example.org");
        assert_eq!(options.tenant.id, seed::DEFAULT_TENANT_ID);
    }
}
