//! Baseline and sample rows, written with insert-if-absent semantics.

use crate::error::{DbError, Result};
use crate::manager::ConnectionManager;
use crate::params::SqlParam;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use bastion_common_config::{BootstrapConfig, RuntimeEnvironment};
use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

/// Id of the tenant created by bootstrap.
pub const DEFAULT_TENANT_ID: Uuid = Uuid::from_u128(1);

/// Result of a single insert-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

impl InsertOutcome {
    pub fn from_rows_affected(rows: u64) -> Self {
        if rows > 0 {
            Self::Inserted
        } else {
            Self::AlreadyPresent
        }
    }

    pub fn is_inserted(self) -> bool {
        self == Self::Inserted
    }
}

/// Run an `INSERT ... ON CONFLICT DO NOTHING` and report whether it wrote.
pub async fn insert_if_absent(
    manager: &ConnectionManager,
    conn: &mut PgConnection,
    step: &str,
    sql: &str,
    params: &[SqlParam],
) -> Result<InsertOutcome> {
    manager
        .execute_on(conn, sql, params)
        .await
        .map(|r| InsertOutcome::from_rows_affected(r.rows_affected()))
        .map_err(|e| DbError::seed(step, e))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSeed {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AdminSeed {
    pub email: String,
    pub name: String,
    /// Generated outside production when absent.
    pub password: Option<String>,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TenantSeed {
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            id: DEFAULT_TENANT_ID,
            name: config.tenant_name.clone(),
            slug: config.tenant_slug.clone(),
        }
    }
}

impl AdminSeed {
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            email: config.admin_email.clone(),
            name: config.admin_name.clone(),
            password: config.admin_password.clone(),
        }
    }
}

/// A baseline lookup row keyed by `(category, code)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceRow {
    pub category: &'static str,
    pub code: &'static str,
    pub label: &'static str,
    pub sort_order: i32,
}

const fn reference(category: &'static str, code: &'static str, label: &'static str, sort_order: i32) -> ReferenceRow {
    ReferenceRow {
        category,
        code,
        label,
        sort_order,
    }
}

pub const REFERENCE_DATA: &[ReferenceRow] = &[
    reference("role", "admin", "Administrator", 1),
    reference("role", "manager", "Manager", 2),
    reference("role", "member", "Member", 3),
    reference("role", "viewer", "Viewer", 4),
    reference("status", "active", "Active", 1),
    reference("status", "inactive", "Inactive", 2),
    reference("status", "archived", "Archived", 3),
    reference("priority", "low", "Low", 1),
    reference("priority", "medium", "Medium", 2),
    reference("priority", "high", "High", 3),
    reference("priority", "critical", "Critical", 4),
];

/// `category:code` keys of the baseline reference rows.
pub fn reference_keys() -> Vec<String> {
    REFERENCE_DATA
        .iter()
        .map(|r| format!("{}:{}", r.category, r.code))
        .collect()
}

/// `(key, value, description)` for each baseline setting.
pub fn system_settings(app_name: &str) -> Vec<(&'static str, String, &'static str)> {
    vec![
        ("app.name", app_name.to_string(), "Display name of the installation"),
        ("app.timezone", "UTC".to_string(), "Default timezone"),
        (
            "security.session_timeout_minutes",
            "60".to_string(),
            "Idle session lifetime in minutes",
        ),
        (
            "security.password_min_length",
            "12".to_string(),
            "Minimum password length",
        ),
        (
            "system.initialized_at",
            Utc::now().to_rfc3339(),
            "When baseline data was first created",
        ),
    ]
}

/// Demo projects: `(name, description)`.
pub const SAMPLE_PROJECTS: &[(&str, &str)] = &[
    ("Getting Started", "A walkthrough project created with sample data"),
    ("Website Redesign", "Example project with a few open tasks"),
    ("Quarterly Planning", "Example planning project"),
];

/// Hash a password into a PHC string (Argon2id, random salt).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DbError::seed("admin", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
        .is_ok()
}

/// The configured admin password, or a generated one outside production.
///
/// The flag is true when the password was generated.
pub fn resolve_admin_password(admin: &AdminSeed, environment: RuntimeEnvironment) -> Result<(String, bool)> {
    match &admin.password {
        Some(password) if !password.is_empty() => Ok((password.clone(), false)),
        _ if environment.is_production() => Err(DbError::seed(
            "admin",
            "an admin password must be configured in production",
        )),
        _ => Ok((Uuid::new_v4().simple().to_string(), true)),
    }
}

/// What one seeding pass wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedSummary {
    pub tenant: InsertOutcome,
    pub admin: InsertOutcome,
    pub reference_rows_inserted: usize,
    pub settings_inserted: usize,
    /// Set when this pass created the admin with a generated password.
    pub generated_password: Option<String>,
}

impl SeedSummary {
    pub fn rows_inserted(&self) -> usize {
        usize::from(self.tenant.is_inserted())
            + usize::from(self.admin.is_inserted())
            + self.reference_rows_inserted
            + self.settings_inserted
    }
}

/// Write the baseline rows on `conn`. The caller owns the transaction.
pub async fn seed_baseline(
    manager: &ConnectionManager,
    conn: &mut PgConnection,
    tenant: &TenantSeed,
    admin: &AdminSeed,
    environment: RuntimeEnvironment,
) -> Result<SeedSummary> {
    let tenant_outcome = insert_if_absent(
        manager,
        conn,
        "tenant",
        "INSERT INTO tenants (id, name, slug) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        &[tenant.id.into(), tenant.name.as_str().into(), tenant.slug.as_str().into()],
    )
    .await?;

    let (admin_outcome, generated_password) = seed_admin(manager, conn, tenant, admin, environment).await?;

    let mut reference_rows_inserted = 0;
    for row in REFERENCE_DATA {
        let outcome = insert_if_absent(
            manager,
            conn,
            "reference_data",
            "INSERT INTO reference_data (category, code, label, sort_order) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (category, code) DO NOTHING",
            &[row.category.into(), row.code.into(), row.label.into(), row.sort_order.into()],
        )
        .await?;
        reference_rows_inserted += usize::from(outcome.is_inserted());
    }

    let mut settings_inserted = 0;
    for (key, value, description) in system_settings(&tenant.name) {
        let outcome = insert_if_absent(
            manager,
            conn,
            "system_settings",
            "INSERT INTO system_settings (key, value, description) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO NOTHING",
            &[key.into(), value.into(), description.into()],
        )
        .await?;
        settings_inserted += usize::from(outcome.is_inserted());
    }

    Ok(SeedSummary {
        tenant: tenant_outcome,
        admin: admin_outcome,
        reference_rows_inserted,
        settings_inserted,
        generated_password,
    })
}

async fn seed_admin(
    manager: &ConnectionManager,
    conn: &mut PgConnection,
    tenant: &TenantSeed,
    admin: &AdminSeed,
    environment: RuntimeEnvironment,
) -> Result<(InsertOutcome, Option<String>)> {
    // An existing admin needs no password, even in production.
    let existing = manager
        .query_on(conn, "SELECT 1 FROM users WHERE email = $1", &[admin.email.as_str().into()])
        .await
        .map_err(|e| DbError::seed("admin", e))?;
    if !existing.is_empty() {
        return Ok((InsertOutcome::AlreadyPresent, None));
    }

    let (password, generated) = resolve_admin_password(admin, environment)?;
    let password_hash = hash_password(&password)?;

    let outcome = insert_if_absent(
        manager,
        conn,
        "admin",
        "INSERT INTO users (tenant_id, email, name, password_hash, role) VALUES ($1, $2, $3, $4, 'admin') \
         ON CONFLICT (email) DO NOTHING",
        &[
            tenant.id.into(),
            admin.email.as_str().into(),
            admin.name.as_str().into(),
            password_hash.into(),
        ],
    )
    .await?;

    let generated_password = (generated && outcome.is_inserted()).then_some(password);
    Ok((outcome, generated_password))
}

/// Write the demo projects for `tenant`. Returns how many were inserted.
pub async fn seed_sample_data(
    manager: &ConnectionManager,
    conn: &mut PgConnection,
    tenant: &TenantSeed,
    admin: &AdminSeed,
) -> Result<usize> {
    let mut inserted = 0;
    for (name, description) in SAMPLE_PROJECTS {
        let outcome = insert_if_absent(
            manager,
            conn,
            "sample_projects",
            "INSERT INTO projects (tenant_id, name, description, created_by) \
             VALUES ($1, $2, $3, (SELECT id FROM users WHERE email = $4)) \
             ON CONFLICT (tenant_id, name) DO NOTHING",
            &[
                tenant.id.into(),
                (*name).into(),
                (*description).into(),
                admin.email.as_str().into(),
            ],
        )
        .await?;
        inserted += usize::from(outcome.is_inserted());
    }
    Ok(inserted)
}
