//! Behaviour that needs no running database.

mod common;

use bastion_common_config::{BastionConfig, RuntimeEnvironment};
use bastion_database::{
    BootstrapOptions, Bootstrapper, ConnectionManager, DbError, ResetGuardReason, RESET_CONFIRMATION_TOKEN,
};
use std::time::{Duration, Instant};

#[tokio::test]
async fn initialize_gives_up_after_retry_budget() {
    let manager = ConnectionManager::new(common::unreachable_config());
    let start = Instant::now();

    let err = manager.initialize().await.unwrap_err();

    assert!(matches!(err, DbError::Connection { attempts: 3, .. }), "got {err:?}");
    // Two backoff sleeps: 10ms then 20ms.
    assert!(start.elapsed().as_millis() >= 30);
    assert!(!manager.is_initialized().await);
    assert!(matches!(manager.query("SELECT 1", &[]).await, Err(DbError::NotInitialized)));
}

#[tokio::test]
async fn readers_are_not_blocked_while_initialize_retries() {
    let config = bastion_common_config::DatabaseConfig {
        connect_retries: 4,
        retry_base_delay_ms: 1_000,
        retry_max_delay_ms: 4_000,
        health_check_timeout_ms: 500,
        ..common::unreachable_config()
    };
    let manager = ConnectionManager::new(config);

    let initializing = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.initialize().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    let report = tokio::time::timeout(Duration::from_secs(1), manager.check_health())
        .await
        .expect("check_health waited for initialize");
    assert!(!report.is_healthy);
    assert!(!manager.is_initialized().await);
    assert!(matches!(manager.pool_stats().await, Err(DbError::NotInitialized)));
    manager.close().await;
    assert!(start.elapsed() < Duration::from_secs(1));

    initializing.abort();
}

#[tokio::test]
async fn health_on_uninitialized_manager_reports_error() {
    let manager = ConnectionManager::new(common::unreachable_config());
    let report = manager.check_health().await;
    assert!(!report.is_healthy);
    assert!(!report.error.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn health_after_close_reports_error() {
    let manager = ConnectionManager::new(common::unreachable_config());
    manager.close().await;
    let report = manager.check_health().await;
    assert!(!report.is_healthy);
    assert!(report.error.is_some());
}

#[tokio::test]
async fn bootstrap_collects_connection_failure() {
    let config = BastionConfig {
        database: common::unreachable_config(),
        ..Default::default()
    };
    let manager = ConnectionManager::new(config.database.clone());
    let bootstrapper = Bootstrapper::from_config(manager, &config).unwrap();

    let result = bootstrapper.initialize(&BootstrapOptions::default()).await;

    assert!(!result.success);
    assert_eq!(result.migrations_run, 0);
    assert!(!result.seed_data_created);
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn reset_refused_in_production_before_touching_database() {
    let config = BastionConfig {
        environment: RuntimeEnvironment::Production,
        database: common::unreachable_config(),
        ..Default::default()
    };
    let bootstrapper = Bootstrapper::from_config(ConnectionManager::new(config.database.clone()), &config).unwrap();

    let err = bootstrapper.reset(RESET_CONFIRMATION_TOKEN).await.unwrap_err();
    assert!(matches!(err, DbError::ResetGuard(ResetGuardReason::ProductionEnvironment)));
}

#[tokio::test]
async fn reset_refused_with_wrong_confirmation() {
    let config = BastionConfig {
        environment: RuntimeEnvironment::Development,
        database: common::unreachable_config(),
        ..Default::default()
    };
    let bootstrapper = Bootstrapper::from_config(ConnectionManager::new(config.database.clone()), &config).unwrap();

    for code in ["", "yes", "reset_all_data", "RESET_ALL_DATA "] {
        let err = bootstrapper.reset(code).await.unwrap_err();
        assert!(matches!(err, DbError::ResetGuard(ResetGuardReason::InvalidConfirmation)));
    }
}
