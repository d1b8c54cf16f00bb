//! Schema migrations: catalog, ledger and the batch runner.

pub mod catalog;
pub mod runner;
pub mod types;

pub use catalog::MigrationCatalog;
pub use runner::{checksum_drift, plan_pending, MigrationRunner, ADVISORY_LOCK_KEY, LEDGER_TABLE};
pub use types::*;
