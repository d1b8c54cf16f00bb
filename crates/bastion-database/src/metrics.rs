//! Bounded query metrics buffer and derived statistics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One executed statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetric {
    /// Sanitized statement text.
    pub statement: String,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate view over the buffered metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    /// Queries recorded since the manager was created.
    pub total_queries: u64,
    /// Failed queries recorded since the manager was created.
    pub total_failures: u64,
    /// Metrics currently held in the buffer.
    pub buffered: usize,
    pub failed: usize,
    pub slow: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: f64,
}

/// Fixed-capacity FIFO of query metrics. The oldest entry is evicted first.
pub struct QueryMetricsBuffer {
    capacity: usize,
    slow_threshold: Duration,
    entries: Mutex<VecDeque<QueryMetric>>,
    total: AtomicU64,
    failures: AtomicU64,
}

impl QueryMetricsBuffer {
    pub fn new(capacity: usize, slow_threshold: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slow_threshold,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            total: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn record(&self, metric: QueryMetric) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !metric.success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(metric);
    }

    /// Snapshot of the buffered metrics, oldest first.
    pub fn snapshot(&self) -> Vec<QueryMetric> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Buffered metrics slower than the slow-query threshold, oldest first.
    pub fn slow_queries(&self) -> Vec<QueryMetric> {
        let threshold_ms = self.slow_threshold.as_secs_f64() * 1000.0;
        self.entries
            .lock()
            .iter()
            .filter(|m| m.duration_ms > threshold_ms)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> QueryStats {
        let threshold_ms = self.slow_threshold.as_secs_f64() * 1000.0;
        let entries = self.entries.lock();

        let buffered = entries.len();
        let failed = entries.iter().filter(|m| !m.success).count();
        let slow = entries.iter().filter(|m| m.duration_ms > threshold_ms).count();
        let sum: f64 = entries.iter().map(|m| m.duration_ms).sum();
        let max = entries.iter().map(|m| m.duration_ms).fold(0.0, f64::max);

        QueryStats {
            total_queries: self.total.load(Ordering::Relaxed),
            total_failures: self.failures.load(Ordering::Relaxed),
            buffered,
            failed,
            slow,
            avg_duration_ms: if buffered == 0 { 0.0 } else { sum / buffered as f64 },
            max_duration_ms: max,
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn metric(n: usize, duration_ms: f64, success: bool) -> QueryMetric {
        QueryMetric {
            statement: format!("SELECT {}", n),
            duration_ms,
            timestamp: Utc::now(),
            success,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_stats_over_buffer() {
        let buffer = QueryMetricsBuffer::new(10, Duration::from_millis(100));
        buffer.record(metric(1, 10.0, true));
        buffer.record(metric(2, 250.0, true));
        buffer.record(metric(3, 40.0, false));

        let stats = buffer.stats();
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.buffered, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.slow, 1);
        assert!((stats.avg_duration_ms - 100.0).abs() < 1e-9);
        assert!((stats.max_duration_ms - 250.0).abs() < 1e-9);

        assert_eq!(buffer.slow_queries().len(), 1);
    }

    #[test]
    fn test_empty_stats() {
        let buffer = QueryMetricsBuffer::new(5, Duration::from_millis(100));
        let stats = buffer.stats();
        assert_eq!(stats, QueryStats::default());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_totals_survive_eviction() {
        let buffer = QueryMetricsBuffer::new(2, Duration::from_millis(100));
        for n in 0..5 {
            buffer.record(metric(n, 1.0, n % 2 == 0));
        }
        let stats = buffer.stats();
        assert_eq!(stats.buffered, 2);
        assert_eq!(stats.total_queries, 5);
        assert_eq!(stats.total_failures, 2);
    }

    #[test]
    fn test_error_field_skipped_when_absent() {
        let json = serde_json::to_value(metric(1, 2.0, true)).unwrap();
        assert!(json.get("error").is_none());
        assert!(json.get("durationMs").is_some());
    }

    proptest! {
        #[test]
        fn buffer_keeps_exactly_the_last_capacity_entries(capacity in 1usize..64, extra in 0usize..64) {
            let buffer = QueryMetricsBuffer::new(capacity, Duration::from_millis(100));
            let inserted = capacity + extra;
            for n in 0..inserted {
                buffer.record(metric(n, 1.0, true));
                prop_assert!(buffer.len() <= capacity);
            }

            let survivors: Vec<String> = buffer.snapshot().into_iter().map(|m| m.statement).collect();
            let expected: Vec<String> = (extra..inserted).map(|n| format!("SELECT {}", n)).collect();
            prop_assert_eq!(survivors, expected);
        }
    }
}
