//! Pool construction from configuration.

use crate::error::{DbError, Result};
use bastion_common_config::{DatabaseConfig, SslMode, SslSetting};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{Executor, PgPool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Session setting used to count checkouts per physical connection.
const USES_SETTING: &str = "bastion.connection_uses";

/// Build connection options from configuration.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    let mut options = match &config.url {
        Some(url) => PgConnectOptions::from_str(url).map_err(|e| DbError::Config(e.to_string()))?,
        None => {
            let mut options = PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .database(&config.database)
                .username(&config.user);
            if let Some(password) = &config.password {
                options = options.password(password);
            }
            options
        }
    };

    options = options.application_name(&config.application_name);

    // A URL keeps its own sslmode unless TLS is configured explicitly.
    if config.url.is_none() || !matches!(config.ssl, SslSetting::Enabled(false)) {
        options = options.ssl_mode(ssl_mode(config.ssl.mode()));
    }

    if let Some(root_cert) = config.ssl.root_cert() {
        options = options.ssl_root_cert(root_cert);
    }

    Ok(options)
}

fn ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Statements run on every new physical connection.
pub fn session_setup(config: &DatabaseConfig) -> Vec<String> {
    let mut statements = Vec::new();
    if let Some(schema) = &config.schema {
        statements.push(format!("SET search_path TO \"{}\", public", schema));
    }
    if let Some(timeout) = config.statement_timeout_ms {
        statements.push(format!("SET statement_timeout = {}", timeout));
    }
    statements
}

/// Build pool options (sizes, timeouts, connection hooks) from configuration.
pub fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    let setup = Arc::new(session_setup(config));

    let mut options = PgPoolOptions::new()
        .min_connections(config.effective_min_connections())
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(Some(config.idle_timeout()))
        .max_lifetime(Some(config.max_lifetime()))
        .test_before_acquire(true)
        .after_connect(move |conn, _meta| {
            let setup = Arc::clone(&setup);
            Box::pin(async move {
                for statement in setup.iter() {
                    conn.execute(statement.as_str()).await?;
                }
                Ok(())
            })
        });

    if let Some(max_uses) = config.max_uses {
        let max_uses = i64::from(max_uses);
        options = options.after_release(move |conn, _meta| {
            Box::pin(async move {
                let bump = format!(
                    "SELECT set_config('{key}', (COALESCE(NULLIF(current_setting('{key}', true), ''), '0')::bigint + 1)::text, false)::bigint",
                    key = USES_SETTING
                );
                match sqlx::query_scalar::<_, i64>(&bump).fetch_one(&mut *conn).await {
                    Ok(uses) => Ok(uses < max_uses),
                    Err(e) => {
                        // A broken idle connection is dropped, not propagated.
                        warn!(error = %e, "Discarding pooled connection after release check failed");
                        Ok(false)
                    }
                }
            })
        });
    }

    options
}

/// Create the pool and verify it with one round-trip.
#[instrument(skip(config), fields(target = %config.display_target()))]
pub async fn create_pool(config: &DatabaseConfig) -> std::result::Result<PgPool, sqlx::Error> {
    let connect = connect_options(config).map_err(|e| sqlx::Error::Configuration(e.to_string().into()))?;
    let pool = pool_options(config).connect_with(connect).await?;

    if let Err(e) = verify_connection(&pool).await {
        pool.close().await;
        return Err(e);
    }

    info!(
        max_connections = config.max_connections,
        min_connections = config.effective_min_connections(),
        "Database pool created"
    );
    Ok(pool)
}

/// Verify database connection.
pub async fn verify_connection(pool: &PgPool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

/// Live pool counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Open physical connections (idle + in use).
    pub total: u32,
    pub idle: usize,
    /// Callers blocked waiting for a connection.
    pub waiting: usize,
    #[serde(skip)]
    pub max: u32,
}

impl PoolStats {
    pub fn from_pool(pool: &PgPool, waiting: usize, max: u32) -> Self {
        Self {
            total: pool.size(),
            idle: pool.num_idle(),
            waiting,
            max,
        }
    }

    pub fn active(&self) -> u32 {
        self.total.saturating_sub(self.idle as u32)
    }

    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        self.active() as f64 / self.max as f64
    }
}
