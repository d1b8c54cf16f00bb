use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::migrate::Migration;
use std::borrow::Cow;
use std::fmt;

/// Numeric migration version, ordered ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct MigrationVersion(pub i64);

impl MigrationVersion {
    /// Parse a version token such as `"003"`. Only ASCII digits are accepted.
    pub fn parse(token: &str) -> Option<Self> {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        token.parse().ok().map(Self)
    }
}

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated forward migration.
#[derive(Debug, Clone)]
pub struct MigrationDefinition {
    pub version: MigrationVersion,
    /// Zero-padded version, e.g. `003`; stored in the ledger.
    pub token: String,
    /// Snake-case name from the file name.
    pub name: String,
    pub description: Option<String>,
    /// Full body, executed as one script.
    pub sql: Cow<'static, str>,
    /// SHA-384 of the body, lowercase hex.
    pub checksum: String,
}

impl MigrationDefinition {
    pub fn from_migration(migration: Migration) -> Self {
        let checksum = migration.checksum.iter().map(|b| format!("{:02x}", b)).collect();
        let description = migration.description.trim().to_string();
        Self {
            version: MigrationVersion(migration.version),
            token: format!("{:03}", migration.version),
            name: description.replace(' ', "_"),
            description: (!description.is_empty()).then_some(description),
            sql: migration.sql,
            checksum,
        }
    }

    pub fn summary(&self) -> MigrationSummary {
        MigrationSummary {
            version: self.token.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            checksum: self.checksum.clone(),
        }
    }
}

/// Ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigration {
    pub id: i32,
    pub version: String,
    pub name: String,
    pub description: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub checksum: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AppliedMigration {
    pub fn parsed_version(&self) -> Option<MigrationVersion> {
        MigrationVersion::parse(&self.version)
    }
}

/// Catalog entry as shown in status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub version: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub checksum: String,
}

/// Read-only view of available, executed and pending migrations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub available: Vec<MigrationSummary>,
    /// Successfully applied ledger rows, ascending.
    pub executed: Vec<AppliedMigration>,
    pub pending: Vec<MigrationSummary>,
    /// Failure markers left by rolled-back runs.
    pub failed: Vec<AppliedMigration>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// One migration applied by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub version: String,
    pub name: String,
    pub execution_time_ms: i64,
}

/// Outcome of a successful `migrate` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub applied: Vec<MigrationResult>,
    /// Migrations left out of the catalog, e.g. down migrations.
    pub skipped_invalid: Vec<String>,
}

impl MigrationReport {
    pub fn migrations_run(&self) -> usize {
        self.applied.len()
    }
}

/// An applied migration whose recorded checksum no longer matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumMismatch {
    pub version: String,
    pub name: String,
    pub expected: String,
    pub recorded: String,
}

/// Differences between the ledger and the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumDrift {
    pub mismatched: Vec<ChecksumMismatch>,
    /// Applied versions that are no longer in the catalog.
    pub missing: Vec<String>,
}

impl ChecksumDrift {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

impl fmt::Display for ChecksumDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for m in &self.mismatched {
            parts.push(format!(
                "{} ({}) expected {} found {}",
                m.version, m.name, m.expected, m.recorded
            ));
        }
        for version in &self.missing {
            parts.push(format!("{} applied but not in catalog", version));
        }
        write!(f, "{}", parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(MigrationVersion::parse("003"), Some(MigrationVersion(3)));
        assert_eq!(MigrationVersion::parse("20240101120000"), Some(MigrationVersion(20240101120000)));
        assert_eq!(MigrationVersion::parse(""), None);
        assert_eq!(MigrationVersion::parse("v3"), None);
        assert_eq!(MigrationVersion::parse("-3"), None);
    }

    #[test]
    fn test_version_ordering_is_numeric() {
        assert!(MigrationVersion::parse("10").unwrap() > MigrationVersion::parse("009").unwrap());
    }

    #[test]
    fn test_definition_from_migration() {
        let definition = MigrationDefinition::from_migration(Migration::new(
            7,
            "add lookup index".into(),
            sqlx::migrate::MigrationType::Simple,
            "CREATE INDEX i ON t (c);".into(),
        ));
        assert_eq!(definition.token, "007");
        assert_eq!(definition.name, "add_lookup_index");
        assert_eq!(definition.description.as_deref(), Some("add lookup index"));
        assert_eq!(definition.checksum.len(), 96);
        assert!(definition.checksum.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_drift_display() {
        let drift = ChecksumDrift {
            mismatched: vec![ChecksumMismatch {
                version: "001".into(),
                name: "baseline".into(),
                expected: "aa".into(),
                recorded: "bb".into(),
            }],
            missing: vec!["009".into()],
        };
        assert!(!drift.is_clean());
        assert_eq!(
            drift.to_string(),
            "001 (baseline) expected aa found bb; 009 applied but not in catalog"
        );
    }
}
