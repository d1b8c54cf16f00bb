//! Query instrumentation for logging and metrics.

use crate::metrics::QueryMetric;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Longest statement text kept in logs and metrics.
pub const MAX_STATEMENT_LEN: usize = 200;

fn string_literal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'(?:[^']|'')*'").expect("literal pattern is valid"))
}

/// Normalize a statement for logging: collapse whitespace, mask string
/// literals, and truncate.
///
/// Bound parameters never appear in the text, so masking literals is enough
/// to keep inline secrets out of logs.
pub fn sanitize_statement(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    let masked = string_literal().replace_all(&collapsed, "'?'");

    if masked.chars().count() <= MAX_STATEMENT_LEN {
        return masked.into_owned();
    }

    let mut truncated: String = masked.chars().take(MAX_STATEMENT_LEN).collect();
    truncated.push_str("...");
    truncated
}

/// Query execution timer.
pub struct QueryTimer {
    statement: String,
    start: Instant,
    slow_threshold: Duration,
}

impl QueryTimer {
    /// Start timing `sql`. The text is sanitized immediately.
    pub fn new(sql: &str, slow_threshold: Duration) -> Self {
        Self {
            statement: sanitize_statement(sql),
            start: Instant::now(),
            slow_threshold,
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer, log the outcome and produce a metric.
    pub fn finish(self, error: Option<&sqlx::Error>) -> QueryMetric {
        let elapsed = self.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        match error {
            Some(e) => {
                error!(
                    query = %self.statement,
                    elapsed_ms = elapsed_ms,
                    error = %e,
                    "Query failed"
                );
            }
            None if elapsed > self.slow_threshold => {
                warn!(
                    query = %self.statement,
                    elapsed_ms = elapsed_ms,
                    threshold_ms = self.slow_threshold.as_millis() as u64,
                    "Slow query detected"
                );
            }
            None => {
                debug!(
                    query = %self.statement,
                    elapsed_ms = elapsed_ms,
                    "Query completed"
                );
            }
        }

        QueryMetric {
            statement: self.statement,
            duration_ms: elapsed_ms,
            timestamp: Utc::now(),
            success: error.is_none(),
            error: error.map(|e| e.to_string()),
        }
    }
}
