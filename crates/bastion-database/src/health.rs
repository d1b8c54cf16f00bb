//! Database health monitoring.

use crate::pool::PoolStats;
use serde::Serialize;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of a health probe, in the shape ops tooling consumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub is_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_stats: Option<PoolStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    /// Report for a manager that has no pool.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            latency_ms: None,
            pool_stats: None,
            error: Some(message.into()),
        }
    }
}

/// Run `SELECT 1` against the pool, bounded by `timeout`.
pub async fn check_health(pool: &PgPool, timeout: Duration, stats: impl Fn() -> PoolStats) -> HealthReport {
    let start = Instant::now();

    let result = tokio::time::timeout(timeout, sqlx::query("SELECT 1").fetch_one(pool)).await;

    let latency_ms = start.elapsed().as_millis() as u64;
    let pool_stats = Some(stats());

    match result {
        Ok(Ok(_)) => {
            debug!(latency_ms, "Database health check passed");
            HealthReport {
                is_healthy: true,
                latency_ms: Some(latency_ms),
                pool_stats,
                error: None,
            }
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Database health check failed");
            HealthReport {
                is_healthy: false,
                latency_ms: Some(latency_ms),
                pool_stats,
                error: Some(e.to_string()),
            }
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Database health check timed out");
            HealthReport {
                is_healthy: false,
                latency_ms: Some(latency_ms),
                pool_stats,
                error: Some(format!("health check timed out after {}ms", timeout.as_millis())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_report_shape() {
        let report = HealthReport::unavailable("database not initialized");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"isHealthy": false, "error": "database not initialized"})
        );
    }

    #[test]
    fn test_healthy_report_shape() {
        let report = HealthReport {
            is_healthy: true,
            latency_ms: Some(3),
            pool_stats: Some(PoolStats {
                total: 2,
                idle: 2,
                waiting: 0,
                max: 10,
            }),
            error: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["isHealthy"], true);
        assert_eq!(json["latencyMs"], 3);
        assert_eq!(json["poolStats"]["idle"], 2);
        assert!(json.get("error").is_none());
    }
}
