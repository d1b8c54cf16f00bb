//! Configuration types for Bastion.
//!
//! This crate provides the configuration types read from
//! `.bastion/config.yaml`, `.env` files and `BASTION_*` environment variables.

pub mod types;
pub mod loader;
pub mod env;

pub use types::*;
pub use loader::*;
pub use env::*;
