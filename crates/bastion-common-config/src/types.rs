//! Configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionConfig {
    /// Deployment environment marker.
    pub environment: RuntimeEnvironment,
    /// Database connection and pool settings.
    pub database: DatabaseConfig,
    /// Migration runner behaviour.
    pub migrations: MigrationConfig,
    /// Bootstrap (seed data) settings.
    pub bootstrap: BootstrapConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "test" => Some(Self::Test),
            "staging" => Some(Self::Staging),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Database connection and pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL. Overrides the discrete connection fields when set.
    pub url: Option<String>,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub user: String,
    /// Login password.
    pub password: Option<String>,
    /// TLS settings, either a flag or a detailed object.
    pub ssl: SslSetting,
    /// Schema placed first on the `search_path` of every connection.
    pub schema: Option<String>,
    /// Reported to the server as `application_name`.
    pub application_name: String,
    /// Minimum idle connections kept open.
    pub min_connections: u32,
    /// Hard upper bound on open connections.
    pub max_connections: u32,
    /// Idle connections are closed after this long (ms).
    pub idle_timeout_ms: u64,
    /// Connection establishment / acquire timeout (ms).
    pub connect_timeout_ms: u64,
    /// Maximum lifetime of a physical connection (ms).
    pub max_lifetime_ms: u64,
    /// Retire a connection after this many checkouts.
    pub max_uses: Option<u32>,
    /// Allow the pool to drop to zero idle connections.
    pub allow_exit_on_idle: bool,
    /// Server-side statement timeout (ms).
    pub statement_timeout_ms: Option<u64>,
    /// Queries slower than this are logged at warn level (ms).
    pub slow_query_threshold_ms: u64,
    /// Capacity of the in-memory query metrics buffer.
    pub metrics_buffer_size: usize,
    /// Connection attempts made by `initialize` before giving up.
    pub connect_retries: u32,
    /// Delay before the first retry (ms); doubles per attempt.
    pub retry_base_delay_ms: u64,
    /// Upper bound on a single retry delay (ms).
    pub retry_max_delay_ms: u64,
    /// Health check round-trip timeout (ms).
    pub health_check_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            database: "bastion".to_string(),
            user: "postgres".to_string(),
            password: None,
            ssl: SslSetting::default(),
            schema: None,
            application_name: "bastion".to_string(),
            min_connections: 2,
            max_connections: 10,
            idle_timeout_ms: 30_000,
            connect_timeout_ms: 2_000,
            max_lifetime_ms: 1_800_000,
            max_uses: None,
            allow_exit_on_idle: false,
            statement_timeout_ms: None,
            slow_query_threshold_ms: 1_000,
            metrics_buffer_size: 1_000,
            connect_retries: 5,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            health_check_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Minimum pool size after applying `allow_exit_on_idle`.
    pub fn effective_min_connections(&self) -> u32 {
        if self.allow_exit_on_idle {
            0
        } else {
            self.min_connections.min(self.max_connections)
        }
    }

    /// Connection target for log lines. Never includes the password.
    pub fn display_target(&self) -> String {
        match &self.url {
            Some(_) => "<url>".to_string(),
            None => format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database),
        }
    }
}

/// TLS setting: `ssl: true` or `ssl: { mode: verify-full, root_cert: ca.pem }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SslSetting {
    Enabled(bool),
    Options(SslOptions),
}

impl Default for SslSetting {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

impl SslSetting {
    /// Effective TLS mode.
    pub fn mode(&self) -> SslMode {
        match self {
            Self::Enabled(true) => SslMode::Require,
            Self::Enabled(false) => SslMode::Disable,
            Self::Options(options) => options.mode,
        }
    }

    /// Root certificate used to verify the server, if configured.
    pub fn root_cert(&self) -> Option<&PathBuf> {
        match self {
            Self::Enabled(_) => None,
            Self::Options(options) => options.root_cert.as_ref(),
        }
    }
}

/// Detailed TLS options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslOptions {
    #[serde(default)]
    pub mode: SslMode,
    #[serde(default)]
    pub root_cert: Option<PathBuf>,
}

/// TLS negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

/// Migration runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Serialize concurrent runs across processes with an advisory lock.
    pub advisory_lock: bool,
    /// Refuse to migrate when an applied migration's checksum has drifted.
    pub fail_on_checksum_mismatch: bool,
    /// Record a failed ledger row after a batch rolls back.
    pub record_failures: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            advisory_lock: true,
            fail_on_checksum_mismatch: false,
            record_failures: true,
        }
    }
}

/// Bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Run pending migrations before seeding.
    pub run_migrations: bool,
    /// Create baseline seed rows.
    pub create_seed_data: bool,
    /// Create demo rows.
    pub create_sample_data: bool,
    /// Display name of the default tenant.
    pub tenant_name: String,
    /// Slug of the default tenant.
    pub tenant_slug: String,
    /// Email of the administrator account.
    pub admin_email: String,
    /// Display name of the administrator account.
    pub admin_name: String,
    /// Initial administrator password. Generated outside production when unset.
    pub admin_password: Option<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            run_migrations: true,
            create_seed_data: true,
            create_sample_data: false,
            tenant_name: "Default Organization".to_string(),
            tenant_slug: "default".to_string(),
            admin_email: "admin@example.com".to_string(),
            admin_name: "Administrator".to_string(),
            admin_password: None,
        }
    }
}
