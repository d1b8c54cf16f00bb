//! Ordered, registered list of migrations.

use super::types::{MigrationDefinition, MigrationVersion};
use crate::error::{DbError, Result};
use sqlx::migrate::Migration;
use std::collections::BTreeMap;
use tracing::warn;

/// Validated migrations in ascending version order.
#[derive(Debug, Clone, Default)]
pub struct MigrationCatalog {
    definitions: Vec<MigrationDefinition>,
    skipped: Vec<String>,
}

impl MigrationCatalog {
    /// Catalog of the migrations under `migrations/`, embedded at compile time.
    pub fn builtin() -> Result<Self> {
        Self::from_migrations(sqlx::migrate!("./migrations").migrations.iter().cloned())
    }

    /// Build a catalog from sqlx migrations.
    ///
    /// Down migrations and non-positive versions are skipped with a warning.
    /// Duplicate versions and empty bodies are rejected.
    pub fn from_migrations(migrations: impl IntoIterator<Item = Migration>) -> Result<Self> {
        let mut by_version: BTreeMap<MigrationVersion, MigrationDefinition> = BTreeMap::new();
        let mut skipped = Vec::new();

        for migration in migrations {
            if migration.migration_type.is_down_migration() || migration.version < 1 {
                let label = format!("{} {}", migration.version, migration.description);
                warn!(migration = %label, "Skipping migration that is not a forward version");
                skipped.push(label);
                continue;
            }

            let definition = MigrationDefinition::from_migration(migration);
            if definition.sql.trim().is_empty() {
                return Err(DbError::InvalidMigration(format!(
                    "{} {} contains no statements",
                    definition.token, definition.name
                )));
            }

            if let Some(existing) = by_version.get(&definition.version) {
                return Err(DbError::InvalidMigration(format!(
                    "duplicate version {}: {} and {}",
                    definition.version, existing.name, definition.name
                )));
            }
            by_version.insert(definition.version, definition);
        }

        Ok(Self {
            definitions: by_version.into_values().collect(),
            skipped,
        })
    }

    pub fn definitions(&self) -> &[MigrationDefinition] {
        &self.definitions
    }

    /// Migrations that were not taken into the catalog.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn get(&self, version: MigrationVersion) -> Option<&MigrationDefinition> {
        self.definitions.iter().find(|d| d.version == version)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
