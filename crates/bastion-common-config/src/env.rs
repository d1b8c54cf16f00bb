//! `.env` file loading and variable names.

use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("failed to load {path}: {source}")]
    Dotenv {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Environment variable names.
pub mod vars {
    // Runtime
    pub const BASTION_ENV: &str = "BASTION_ENV";
    pub const BASTION_CONFIG: &str = "BASTION_CONFIG";

    // Database
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const BASTION_DB_HOST: &str = "BASTION_DB_HOST";
    pub const BASTION_DB_PORT: &str = "BASTION_DB_PORT";
    pub const BASTION_DB_NAME: &str = "BASTION_DB_NAME";
    pub const BASTION_DB_USER: &str = "BASTION_DB_USER";
    pub const BASTION_DB_PASSWORD: &str = "BASTION_DB_PASSWORD";
    pub const BASTION_DB_SCHEMA: &str = "BASTION_DB_SCHEMA";

    // Bootstrap
    pub const BASTION_ADMIN_EMAIL: &str = "BASTION_ADMIN_EMAIL";
    pub const BASTION_ADMIN_PASSWORD: &str = "BASTION_ADMIN_PASSWORD";
}

/// Dotenv files that were found and applied, in load order.
#[derive(Debug, Default)]
pub struct Environment {
    pub loaded: Vec<PathBuf>,
}

impl Environment {
    /// Load `.env`, `.env.local` and `.env.<BASTION_ENV>` from the working directory.
    ///
    /// Missing files are skipped. Variables already set in the process win.
    pub fn init() -> Result<Self, EnvError> {
        Self::init_in(".")
    }

    pub fn init_in(dir: impl AsRef<Path>) -> Result<Self, EnvError> {
        let dir = dir.as_ref();
        let mut files = vec![dir.join(".env"), dir.join(".env.local")];
        if let Ok(name) = env::var(vars::BASTION_ENV) {
            files.push(dir.join(format!(".env.{}", name)));
        }

        let mut environment = Self::default();
        for path in files {
            match dotenvy::from_path(&path) {
                Ok(()) => environment.loaded.push(path),
                Err(e) if e.not_found() => {}
                Err(source) => return Err(EnvError::Dotenv { path, source }),
            }
        }
        Ok(environment)
    }
}
