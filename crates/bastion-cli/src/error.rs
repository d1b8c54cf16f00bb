//! CLI error handling.

use bastion_common_config::ConfigError;
use bastion_database::DbError;
use thiserror::Error;

use crate::Exit;

/// CLI error type
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{message}")]
    Config { message: String },

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("{message}")]
    Validation { message: String },

    #[error("database unhealthy: {message}")]
    Unhealthy { message: String },

    #[error("interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "E001",
            Self::Database(DbError::Config(_)) => "E001",
            Self::Database(DbError::Migration { .. })
            | Self::Database(DbError::InvalidMigration(_))
            | Self::Database(DbError::ChecksumMismatch(_)) => "E003",
            Self::Database(DbError::ResetGuard(_)) => "E004",
            Self::Database(_) => "E002",
            Self::Validation { .. } => "E004",
            Self::Unhealthy { .. } => "E002",
            Self::Interrupted => "E130",
            Self::Other(_) => "E999",
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> Exit {
        match self {
            Self::Config { .. } | Self::Database(DbError::Config(_)) => Exit::ConfigError,
            Self::Database(DbError::Migration { .. })
            | Self::Database(DbError::InvalidMigration(_))
            | Self::Database(DbError::ChecksumMismatch(_)) => Exit::MigrationError,
            Self::Database(DbError::ResetGuard(_)) | Self::Validation { .. } => Exit::ValidationError,
            Self::Database(_) | Self::Unhealthy { .. } => Exit::DatabaseError,
            Self::Interrupted => Exit::Interrupted,
            Self::Other(_) => Exit::GeneralError,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
