//! `health` and `stats`.

use std::fmt::Write as _;

use bastion_database::{ConnectionManager, HealthReport, PoolStats, QueryMetric, QueryStats};
use serde::Serialize;

use super::connect;
use crate::cli::CommandContext;
use crate::error::CliError;
use crate::output::{print_output, FormattedOutput};

impl FormattedOutput for HealthReport {
    fn format_text(&self) -> String {
        let mut out = String::from(if self.is_healthy { "healthy" } else { "unhealthy" });
        if let Some(latency) = self.latency_ms {
            let _ = write!(out, " ({latency} ms)");
        }
        if let Some(stats) = &self.pool_stats {
            let _ = write!(
                out,
                "\n  pool: {} open, {} idle, {} waiting",
                stats.total, stats.idle, stats.waiting
            );
        }
        if let Some(error) = &self.error {
            let _ = write!(out, "\n  error: {error}");
        }
        out
    }
}

/// Pool and query statistics for this process.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsReport {
    pool: PoolStats,
    queries: QueryStats,
    slow_queries: Vec<QueryMetric>,
}

impl FormattedOutput for StatsReport {
    fn format_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "pool: {} open, {} active, {} idle, {} waiting ({:.0}% of max)",
            self.pool.total,
            self.pool.active(),
            self.pool.idle,
            self.pool.waiting,
            self.pool.utilization() * 100.0
        );
        let _ = write!(
            out,
            "queries: {} total, {} failed, avg {:.2} ms, max {:.2} ms",
            self.queries.total_queries,
            self.queries.total_failures,
            self.queries.avg_duration_ms,
            self.queries.max_duration_ms
        );
        for metric in &self.slow_queries {
            let _ = write!(out, "\n  slow: {:.2} ms {}", metric.duration_ms, metric.statement);
        }
        out
    }
}

pub async fn health(ctx: &CommandContext) -> Result<(), CliError> {
    let manager = ConnectionManager::new(ctx.config.database.clone());
    let report = match manager.initialize().await {
        Ok(()) => manager.check_health().await,
        Err(e) => HealthReport::unavailable(e.to_string()),
    };
    manager.close().await;

    print_output(ctx, &report)?;
    if report.is_healthy {
        Ok(())
    } else {
        Err(CliError::Unhealthy {
            message: report.error.unwrap_or_else(|| "database is unhealthy".to_string()),
        })
    }
}

/// Query metrics live in this process only, so one instrumented round trip
/// runs first and the report never reads zero queries.
async fn collect_stats(manager: &ConnectionManager) -> Result<StatsReport, CliError> {
    if let Err(e) = manager.query("SELECT 1", &[]).await {
        return Err(CliError::Unhealthy { message: e.to_string() });
    }
    Ok(StatsReport {
        pool: manager.pool_stats().await?,
        queries: manager.get_query_stats(),
        slow_queries: manager.get_slow_queries(),
    })
}

pub async fn stats(ctx: &CommandContext) -> Result<(), CliError> {
    let manager = connect(ctx).await?;
    let report = collect_stats(&manager).await;
    manager.close().await;

    print_output(ctx, &report?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stats_on_closed_manager_is_unhealthy() {
        let manager = ConnectionManager::new(Default::default());
        let err = collect_stats(&manager).await.unwrap_err();
        assert!(matches!(err, CliError::Unhealthy { .. }));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_stats_count_the_round_trip() {
        let config = bastion_common_config::DatabaseConfig {
            url: Some(std::env::var("DATABASE_URL").expect("DATABASE_URL required")),
            ..Default::default()
        };
        let manager = ConnectionManager::new(config);
        manager.initialize().await.unwrap();

        let report = collect_stats(&manager).await.unwrap();
        manager.close().await;
        assert_eq!(report.queries.total_queries, 1);
        assert_eq!(report.queries.total_failures, 0);
    }

    #[test]
    fn test_unavailable_report_text() {
        let text = HealthReport::unavailable("connection refused").format_text();
        assert_eq!(text, "unhealthy\n  error: connection refused");
    }
}
