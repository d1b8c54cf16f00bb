//! Error types for database lifecycle operations.

use thiserror::Error;

/// Why a destructive reset was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetGuardReason {
    /// The confirmation code did not match the required literal.
    InvalidConfirmation,
    /// The runtime environment is marked as production.
    ProductionEnvironment,
}

impl std::fmt::Display for ResetGuardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfirmation => write!(f, "confirmation code does not match"),
            Self::ProductionEnvironment => write!(f, "reset is disabled in production"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    /// The pool could not be established within the retry budget.
    #[error("Failed to connect to database after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database connection manager is not initialized")]
    NotInitialized,

    /// A statement failed. `statement` is sanitized and safe to log.
    #[error("Query failed: {source} [{statement}]")]
    Query {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),

    /// A migration failed and the whole batch was rolled back.
    #[error("Migration {version} ({name}) failed: {message}")]
    Migration {
        version: String,
        name: String,
        message: String,
    },

    #[error("Invalid migration definition: {0}")]
    InvalidMigration(String),

    #[error("Migration checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Seed step '{step}' failed: {message}")]
    Seed { step: String, message: String },

    #[error("Reset refused: {0}")]
    ResetGuard(ResetGuardReason),

    #[error("Invalid database configuration: {0}")]
    Config(String),
}

impl DbError {
    pub(crate) fn seed(step: impl Into<String>, message: impl ToString) -> Self {
        Self::Seed {
            step: step.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error means the target table does not exist yet.
    pub fn is_undefined_table(&self) -> bool {
        let source = match self {
            Self::Query { source, .. } | Self::Transaction(source) => source,
            _ => return false,
        };
        matches!(
            source,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01")
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
