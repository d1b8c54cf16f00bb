//! Database connectivity and schema lifecycle for Bastion.
//!
//! - [`ConnectionManager`]: pooled PostgreSQL access with retry, metrics and health
//! - [`MigrationRunner`]: applies embedded migrations once each, in order, as one batch
//! - [`Bootstrapper`]: migrate plus idempotent seed data, status and guarded reset

pub mod bootstrap;
pub mod error;
pub mod health;
pub mod instrumentation;
pub mod manager;
pub mod metrics;
pub mod migration;
pub mod params;
pub mod pool;
pub mod retry;

pub use bootstrap::{
    BootstrapOptions, BootstrapResult, BootstrapStatus, Bootstrapper, InsertOutcome, ResetReport,
    RESET_CONFIRMATION_TOKEN,
};
pub use error::{DbError, ResetGuardReason, Result};
pub use health::HealthReport;
pub use manager::ConnectionManager;
pub use metrics::{QueryMetric, QueryStats};
pub use migration::{
    ChecksumDrift, MigrationCatalog, MigrationReport, MigrationRunner, MigrationStatus,
};
pub use params::SqlParam;
pub use pool::PoolStats;
pub use retry::Backoff;
