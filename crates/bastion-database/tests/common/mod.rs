//! Shared helpers for tests that need a live PostgreSQL.
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p bastion-database -- --ignored

#![allow(dead_code)]

use bastion_common_config::{BastionConfig, DatabaseConfig, RuntimeEnvironment};
use bastion_database::ConnectionManager;
use sqlx::PgPool;
use uuid::Uuid;

/// A throwaway schema; every test gets its own.
pub struct TestSchema {
    pub name: String,
    url: String,
}

impl TestSchema {
    pub async fn create() -> Self {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let name = format!("bastion_test_{}", Uuid::new_v4().simple());
        let admin = PgPool::connect(&url).await.expect("admin connection failed");
        sqlx::query(&format!("CREATE SCHEMA \"{}\"", name))
            .execute(&admin)
            .await
            .expect("create schema failed");
        admin.close().await;
        Self { name, url }
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: Some(self.url.clone()),
            schema: Some(self.name.clone()),
            min_connections: 1,
            max_connections: 5,
            connect_retries: 1,
            connect_timeout_ms: 5_000,
            ..Default::default()
        }
    }

    pub fn config(&self) -> BastionConfig {
        let mut config = BastionConfig {
            environment: RuntimeEnvironment::Test,
            database: self.database_config(),
            ..Default::default()
        };
        config.bootstrap.admin_password = Some("integration-test-password".to_string());
        config
    }

    pub async fn manager(&self) -> ConnectionManager {
        let manager = ConnectionManager::new(self.database_config());
        manager.initialize().await.expect("initialize failed");
        manager
    }

    pub async fn drop(self) {
        let admin = PgPool::connect(&self.url).await.expect("admin connection failed");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", self.name))
            .execute(&admin)
            .await
            .expect("drop schema failed");
        admin.close().await;
    }
}

/// Count rows with a scalar query.
pub async fn count(manager: &ConnectionManager, sql: &str) -> i64 {
    use sqlx::Row;
    let rows = manager.query(sql, &[]).await.expect("count query failed");
    rows[0].get::<i64, _>(0)
}

/// Whether `table` exists in the test's own schema.
pub async fn table_exists(manager: &ConnectionManager, table: &str) -> bool {
    use sqlx::Row;
    let rows = manager
        .query(
            "SELECT to_regclass(quote_ident(current_schema()) || '.' || quote_ident($1)) IS NOT NULL",
            &[table.into()],
        )
        .await
        .expect("to_regclass failed");
    rows[0].get::<bool, _>(0)
}

pub async fn table_exists_in(manager: &ConnectionManager, schema: &str, table: &str) -> bool {
    use sqlx::Row;
    let rows = manager
        .query(
            "SELECT to_regclass(quote_ident($1) || '.' || quote_ident($2)) IS NOT NULL",
            &[schema.into(), table.into()],
        )
        .await
        .expect("to_regclass failed");
    rows[0].get::<bool, _>(0)
}

/// An unreachable server: nothing listens on port 1.
pub fn unreachable_config() -> DatabaseConfig {
    DatabaseConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        connect_timeout_ms: 200,
        connect_retries: 3,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 20,
        ..Default::default()
    }
}
