// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for API calls and uploads.
//!
//! Lightweight counters and latency histograms, printed by the CLI at the
//! end of a run. Nothing is exported.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Backend calls by operation name, e.g. `session.append_events`.
    api_calls: RwLock<HashMap<String, ApiCallMetrics>>,

    /// Other timed operations, e.g. `sync.upload`.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Event throughput.
    events: EventMetrics,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            api_calls: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            events: EventMetrics::new(),
            start_time: Instant::now(),
        }
    }

    /// Record one logical backend call, retries included.
    pub fn record_api_call(&self, operation: &str, duration: Duration, success: bool) {
        let mut calls = write(&self.api_calls);
        let metrics = calls
            .entry(operation.to_string())
            .or_insert_with(ApiCallMetrics::new);
        metrics.record(duration, success);
    }

    /// Record a generic operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = write(&self.operations);
        let metrics = ops.entry(name.to_string()).or_insert_with(OperationMetrics::new);
        metrics.record(duration);
    }

    /// Record events delivered to and dropped before the backend.
    pub fn record_events(&self, submitted: u64, dropped: u64) {
        self.events.add_submitted(submitted);
        self.events.add_dropped(dropped);
    }

    pub fn api_call_metrics(&self, operation: &str) -> Option<ApiCallMetrics> {
        read(&self.api_calls).get(operation).cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        read(&self.operations).get(name).cloned()
    }

    /// (submitted, dropped) event totals.
    pub fn event_counts(&self) -> (u64, u64) {
        (self.events.submitted_total(), self.events.dropped_total())
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            api_calls: read(&self.api_calls).clone(),
            operations: read(&self.operations).clone(),
            events_submitted: self.events.submitted_total(),
            events_dropped: self.events.dropped_total(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        write(&self.api_calls).clear();
        write(&self.operations).clear();
        self.events.reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for one kind of backend call.
#[derive(Debug, Clone)]
pub struct ApiCallMetrics {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl ApiCallMetrics {
    pub fn new() -> Self {
        Self {
            calls: 0,
            successes: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration, success: bool) {
        self.calls += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.calls as u32
        }
    }

    /// Success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            1.0
        } else {
            self.successes as f64 / self.calls as f64
        }
    }
}

impl Default for ApiCallMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic operation metrics with histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper bounds in milliseconds.
    bounds_ms: Vec<u64>,
    /// One count per bound plus an overflow bucket.
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let millis = duration.as_millis() as u64;
        let idx = self
            .bounds_ms
            .iter()
            .position(|&b| millis <= b)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile: the upper bound of the bucket holding it.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let millis = match self.bounds_ms.get(i) {
                    Some(bound) => *bound,
                    // Overflow bucket.
                    None => self.bounds_ms.last().copied().unwrap_or(0) * 2,
                };
                return Duration::from_millis(millis);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    /// Buckets suited to network calls, including long polls.
    fn default() -> Self {
        Self::with_bounds(vec![10, 50, 100, 250, 500, 1_000, 5_000, 30_000, 120_000])
    }
}

#[derive(Debug)]
struct EventMetrics {
    submitted: AtomicU64,
    dropped: AtomicU64,
}

impl EventMetrics {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn add_submitted(&self, count: u64) {
        self.submitted.fetch_add(count, Ordering::Relaxed);
    }

    fn add_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    fn submitted_total(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.submitted.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub api_calls: HashMap<String, ApiCallMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub events_submitted: u64,
    pub events_dropped: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report, sorted by name.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Events: {} submitted, {} dropped\n",
            self.events_submitted, self.events_dropped
        ));

        if !self.api_calls.is_empty() {
            report.push_str("\nAPI calls:\n");
            let mut names: Vec<_> = self.api_calls.keys().collect();
            names.sort();
            for name in names {
                let m = &self.api_calls[name];
                report.push_str(&format!(
                    "  {}: {} calls, {:.1}% ok, avg {:.2?}, p99 <= {:.2?}\n",
                    name,
                    m.calls,
                    m.success_rate() * 100.0,
                    m.avg_duration(),
                    m.histogram.p99()
                ));
            }
        }

        if !self.operations.is_empty() {
            report.push_str("\nOperations:\n");
            let mut names: Vec<_> = self.operations.keys().collect();
            names.sort();
            for name in names {
                let m = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} runs, avg {:.2?}, max {:.2?}\n",
                    name,
                    m.count,
                    m.avg_duration(),
                    m.max_duration
                ));
            }
        }

        report
    }
}

/// Record an operation to global metrics.
pub fn record_operation(name: &str, duration: Duration) {
    GLOBAL_METRICS.record_operation(name, duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_call_metrics() {
        let mut metrics = ApiCallMetrics::new();
        metrics.record(Duration::from_millis(100), true);
        metrics.record(Duration::from_millis(200), true);
        metrics.record(Duration::from_millis(60), false);

        assert_eq!(metrics.calls, 3);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(120));
        assert!((metrics.success_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_histogram_buckets_and_percentiles() {
        let mut hist = Histogram::default();
        hist.record(Duration::from_millis(5));
        hist.record(Duration::from_millis(40));
        hist.record(Duration::from_secs(40));
        hist.record(Duration::from_secs(600));

        assert_eq!(hist.counts()[0], 1);
        assert_eq!(hist.counts()[1], 1);
        assert_eq!(hist.counts()[8], 1);
        assert_eq!(hist.counts()[9], 1);
        assert_eq!(hist.p50(), Duration::from_millis(50));
        assert_eq!(hist.p99(), Duration::from_millis(240_000));
    }

    #[test]
    fn test_snapshot_and_report() {
        let metrics = Metrics::new();
        metrics.record_api_call("directory.list_services", Duration::from_millis(20), true);
        metrics.record_operation("sync.upload", Duration::from_millis(300));
        metrics.record_events(10, 2);

        let snapshot = metrics.snapshot();
        assert!(snapshot.api_calls.contains_key("directory.list_services"));
        assert_eq!(snapshot.events_submitted, 10);

        let report = snapshot.format_report();
        assert!(report.contains("directory.list_services: 1 calls"));
        assert!(report.contains("sync.upload: 1 runs"));
        assert!(report.contains("10 submitted, 2 dropped"));
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_api_call("session.get", Duration::from_millis(1), false);
        metrics.record_events(3, 0);
        metrics.reset();

        assert!(metrics.api_call_metrics("session.get").is_none());
        assert_eq!(metrics.event_counts(), (0, 0));
    }
}
