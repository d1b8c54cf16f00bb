//! Applies pending migrations as one transactional batch.

use super::catalog::MigrationCatalog;
use super::types::*;
use crate::error::{DbError, Result};
use crate::manager::ConnectionManager;
use crate::params::SqlParam;
use bastion_common_config::MigrationConfig;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// Key for `pg_advisory_xact_lock`, shared by every runner.
pub const ADVISORY_LOCK_KEY: i64 = 0x6261_7374_696f_6e; // "bastion"

const CREATE_LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    id SERIAL PRIMARY KEY,
    version VARCHAR(50) NOT NULL UNIQUE,
    name VARCHAR(255) NOT NULL,
    description TEXT,
    executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    execution_time_ms BIGINT NOT NULL DEFAULT 0,
    checksum TEXT NOT NULL,
    success BOOLEAN NOT NULL DEFAULT TRUE,
    error_message TEXT
)
"#;

const SELECT_LEDGER: &str = "SELECT id, version, name, description, executed_at, execution_time_ms, \
     checksum, success, error_message FROM schema_migrations ORDER BY version";

const RECORD_SUCCESS: &str = r#"
INSERT INTO schema_migrations (version, name, description, checksum, execution_time_ms, success)
VALUES ($1, $2, $3, $4, $5, TRUE)
ON CONFLICT (version) DO UPDATE SET
    name = EXCLUDED.name,
    description = EXCLUDED.description,
    checksum = EXCLUDED.checksum,
    execution_time_ms = EXCLUDED.execution_time_ms,
    executed_at = NOW(),
    success = TRUE,
    error_message = NULL
"#;

const RECORD_FAILURE: &str = r#"
INSERT INTO schema_migrations (version, name, description, checksum, execution_time_ms, success, error_message)
VALUES ($1, $2, $3, $4, $5, FALSE, $6)
ON CONFLICT (version) DO UPDATE SET
    execution_time_ms = EXCLUDED.execution_time_ms,
    executed_at = NOW(),
    error_message = EXCLUDED.error_message
WHERE schema_migrations.success = FALSE
"#;

/// Versions still to apply, in ascending order.
pub fn plan_pending<'a>(
    available: &'a [MigrationDefinition],
    applied: &HashSet<MigrationVersion>,
) -> Vec<&'a MigrationDefinition> {
    let mut pending: Vec<_> = available
        .iter()
        .filter(|d| !applied.contains(&d.version))
        .collect();
    pending.sort_by_key(|d| d.version);
    pending
}

/// Compare successful ledger rows with the catalog.
pub fn checksum_drift(available: &[MigrationDefinition], applied: &[AppliedMigration]) -> ChecksumDrift {
    let mut drift = ChecksumDrift::default();

    for row in applied.iter().filter(|r| r.success) {
        let definition = row
            .parsed_version()
            .and_then(|v| available.iter().find(|d| d.version == v));

        match definition {
            Some(d) if d.checksum != row.checksum => drift.mismatched.push(ChecksumMismatch {
                version: row.version.clone(),
                name: row.name.clone(),
                expected: d.checksum.clone(),
                recorded: row.checksum.clone(),
            }),
            Some(_) => {}
            None => drift.missing.push(row.version.clone()),
        }
    }

    drift
}

fn decode_ledger(rows: &[PgRow]) -> Result<Vec<AppliedMigration>> {
    rows.iter()
        .map(|row| {
            AppliedMigration::from_row(row).map_err(|source| DbError::Query {
                statement: SELECT_LEDGER.to_string(),
                source,
            })
        })
        .collect()
}

fn applied_versions(rows: &[AppliedMigration]) -> HashSet<MigrationVersion> {
    rows.iter()
        .filter(|r| r.success)
        .filter_map(AppliedMigration::parsed_version)
        .collect()
}

/// Brings the schema up to the latest catalog version.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    manager: ConnectionManager,
    catalog: Arc<MigrationCatalog>,
    config: MigrationConfig,
}

impl MigrationRunner {
    pub fn new(manager: ConnectionManager, catalog: MigrationCatalog, config: MigrationConfig) -> Self {
        Self {
            manager,
            catalog: Arc::new(catalog),
            config,
        }
    }

    /// Runner over the migrations embedded in this crate.
    pub fn builtin(manager: ConnectionManager, config: MigrationConfig) -> Result<Self> {
        Ok(Self::new(manager, MigrationCatalog::builtin()?, config))
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    /// Apply every pending migration in one transaction.
    ///
    /// Either all pending migrations and their ledger rows are committed, or
    /// none are. A failure names the offending version.
    #[instrument(skip(self), fields(available = self.catalog.len()))]
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport {
            applied: Vec::new(),
            skipped_invalid: self.catalog.skipped().to_vec(),
        };

        let mut tx = self.manager.begin().await?;

        if self.config.advisory_lock {
            self.manager
                .execute_on(
                    &mut tx,
                    "SELECT pg_advisory_xact_lock($1)",
                    &[SqlParam::BigInt(ADVISORY_LOCK_KEY)],
                )
                .await?;
        }

        self.manager.execute_on(&mut tx, CREATE_LEDGER, &[]).await?;
        let rows = self.ledger_rows(&mut tx).await?;

        let drift = checksum_drift(self.catalog.definitions(), &rows);
        if !drift.is_clean() {
            for m in &drift.mismatched {
                warn!(
                    version = %m.version,
                    name = %m.name,
                    expected = %m.expected,
                    recorded = %m.recorded,
                    "Applied migration has changed since it ran"
                );
            }
            for version in &drift.missing {
                warn!(version = %version, "Applied migration is missing from the catalog");
            }
            if self.config.fail_on_checksum_mismatch {
                return Err(DbError::ChecksumMismatch(drift.to_string()));
            }
        }

        let applied = applied_versions(&rows);
        let pending = plan_pending(self.catalog.definitions(), &applied);

        if pending.is_empty() {
            tx.commit().await.map_err(DbError::Transaction)?;
            info!("Schema is up to date");
            return Ok(report);
        }

        info!(pending = pending.len(), "Applying migrations");

        for definition in pending {
            let start = Instant::now();
            match self.apply(&mut tx, definition, start).await {
                Ok(result) => report.applied.push(result),
                Err(e) => {
                    let message = match &e {
                        DbError::Query { source, .. } => source.to_string(),
                        other => other.to_string(),
                    };
                    error!(
                        version = %definition.token,
                        name = %definition.name,
                        error = %message,
                        "Migration failed, rolling back batch"
                    );
                    if let Err(rollback) = tx.rollback().await {
                        warn!(error = %rollback, "Rollback of migration batch failed");
                    }
                    if self.config.record_failures {
                        self.record_failure(definition, start, &message).await;
                    }
                    return Err(DbError::Migration {
                        version: definition.token.clone(),
                        name: definition.name.clone(),
                        message,
                    });
                }
            }
        }

        tx.commit().await.map_err(DbError::Transaction)?;
        info!(applied = report.applied.len(), "Migrations committed");
        Ok(report)
    }

    async fn apply(
        &self,
        conn: &mut PgConnection,
        definition: &MigrationDefinition,
        start: Instant,
    ) -> Result<MigrationResult> {
        info!(version = %definition.token, name = %definition.name, "Applying migration");

        self.manager.execute_script_on(conn, &definition.sql).await?;

        let execution_time_ms = start.elapsed().as_millis() as i64;
        self.manager
            .execute_on(
                conn,
                RECORD_SUCCESS,
                &[
                    definition.token.clone().into(),
                    definition.name.clone().into(),
                    definition.description.clone().into(),
                    definition.checksum.clone().into(),
                    execution_time_ms.into(),
                ],
            )
            .await?;

        Ok(MigrationResult {
            version: definition.token.clone(),
            name: definition.name.clone(),
            execution_time_ms,
        })
    }

    /// Best-effort audit row for a rolled-back migration. Never counts as applied.
    async fn record_failure(&self, definition: &MigrationDefinition, start: Instant, message: &str) {
        let result = async {
            self.manager.execute(CREATE_LEDGER, &[]).await?;
            self.manager
                .execute(
                    RECORD_FAILURE,
                    &[
                        definition.token.clone().into(),
                        definition.name.clone().into(),
                        definition.description.clone().into(),
                        definition.checksum.clone().into(),
                        (start.elapsed().as_millis() as i64).into(),
                        message.into(),
                    ],
                )
                .await
        }
        .await;

        if let Err(e) = result {
            warn!(version = %definition.token, error = %e, "Could not record migration failure");
        }
    }

    async fn ledger_rows(&self, conn: &mut PgConnection) -> Result<Vec<AppliedMigration>> {
        let rows = self.manager.query_on(conn, SELECT_LEDGER, &[]).await?;
        decode_ledger(&rows)
    }

    /// Ledger rows, or an empty list when the ledger does not exist yet.
    async fn read_ledger(&self) -> Result<Vec<AppliedMigration>> {
        let rows = match self.manager.query(SELECT_LEDGER, &[]).await {
            Ok(rows) => rows,
            Err(e) if e.is_undefined_table() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        decode_ledger(&rows)
    }

    /// Available, executed and pending migrations. Does not write.
    pub async fn get_status(&self) -> Result<MigrationStatus> {
        let rows = self.read_ledger().await?;
        let applied = applied_versions(&rows);
        let pending = plan_pending(self.catalog.definitions(), &applied);

        let (executed, failed): (Vec<_>, Vec<_>) = rows.into_iter().partition(|r| r.success);

        Ok(MigrationStatus {
            available: self.catalog.definitions().iter().map(|d| d.summary()).collect(),
            executed,
            pending: pending.into_iter().map(|d| d.summary()).collect(),
            failed,
        })
    }

    /// Compare recorded checksums with the catalog. Does not write.
    pub async fn verify(&self) -> Result<ChecksumDrift> {
        let rows = self.read_ledger().await?;
        Ok(checksum_drift(self.catalog.definitions(), &rows))
    }

    /// Delete the ledger row for `version`.
    ///
    /// The schema changes that migration made are NOT undone; the migration
    /// will run again on the next `migrate`.
    pub async fn forget(&self, version: &str) -> Result<bool> {
        warn!(
            version = %version,
            "Removing migration from ledger; schema changes are not reversed"
        );
        let result = match self
            .manager
            .execute("DELETE FROM schema_migrations WHERE version = $1", &[version.into()])
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_undefined_table() => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn definition(version: i64) -> MigrationDefinition {
        MigrationDefinition::from_migration(sqlx::migrate::Migration::new(
            version,
            format!("m{}", version).into(),
            sqlx::migrate::MigrationType::Simple,
            format!("SELECT {};", version).into(),
        ))
    }

    fn row(version: &str, checksum: &str, success: bool) -> AppliedMigration {
        AppliedMigration {
            id: 1,
            version: version.to_string(),
            name: "m".to_string(),
            description: None,
            executed_at: Utc::now(),
            execution_time_ms: 1,
            checksum: checksum.to_string(),
            success,
            error_message: None,
        }
    }

    #[test]
    fn test_pending_preserves_order() {
        let available = vec![definition(1), definition(2), definition(3)];
        let applied = HashSet::from([MigrationVersion(1)]);
        let pending: Vec<i64> = plan_pending(&available, &applied).iter().map(|d| d.version.0).collect();
        assert_eq!(pending, vec![2, 3]);
    }

    #[test]
    fn test_failure_markers_are_not_applied() {
        let rows = vec![row("001", "x", true), row("002", "y", false)];
        let applied = applied_versions(&rows);
        assert!(applied.contains(&MigrationVersion(1)));
        assert!(!applied.contains(&MigrationVersion(2)));
    }

    #[test]
    fn test_ledger_tokens_compare_numerically() {
        let rows = vec![row("1", "x", true)];
        let available = vec![definition(1), definition(2)];
        let pending = plan_pending(&available, &applied_versions(&rows));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].token, "002");
    }

    #[test]
    fn test_checksum_drift_detection() {
        let available = vec![definition(1), definition(2)];
        let rows = vec![
            row("001", &available[0].checksum, true),
            row("002", "stale", true),
            row("007", "gone", true),
            row("003", "ignored", false),
        ];
        let drift = checksum_drift(&available, &rows);
        assert_eq!(drift.mismatched.len(), 1);
        assert_eq!(drift.mismatched[0].version, "002");
        assert_eq!(drift.missing, vec!["007".to_string()]);
    }

    #[test]
    fn test_advisory_lock_key_is_stable() {
        assert_eq!(ADVISORY_LOCK_KEY, 27_691_696_219_844_462);
    }

    proptest! {
        #[test]
        fn pending_is_ascending_and_disjoint_from_applied(
            versions in proptest::collection::btree_set(1i64..500, 0..40),
            applied_mask in proptest::collection::vec(any::<bool>(), 40),
        ) {
            let mut available: Vec<_> = versions.iter().copied().map(definition).collect();
            available.reverse();
            let applied: HashSet<_> = versions
                .iter()
                .zip(applied_mask.iter())
                .filter(|(_, applied)| **applied)
                .map(|(v, _)| MigrationVersion(*v))
                .collect();

            let pending = plan_pending(&available, &applied);
            prop_assert!(pending.windows(2).all(|w| w[0].version < w[1].version));
            prop_assert!(pending.iter().all(|d| !applied.contains(&d.version)));
            prop_assert_eq!(pending.len() + applied.len(), versions.len());
        }
    }
}
