//! Bootstrap: migrate, seed baseline rows, report status, reset.

pub mod bootstrapper;
pub mod seed;

pub use bootstrapper::{
    check_reset_guard, BootstrapOptions, BootstrapResult, BootstrapStatus, Bootstrapper, ResetReport,
    RESET_CONFIRMATION_TOKEN, RESET_ORDER,
};
pub use seed::{insert_if_absent, AdminSeed, InsertOutcome, SeedSummary, TenantSeed, DEFAULT_TENANT_ID};
