// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Self-metrics for the event pipeline.
//!
//! The bus records, per sink, how many events were delivered or rejected and
//! how long each `handle` call took. Lightweight and dependency-free so it
//! can stay on in release builds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Per-sink delivery metrics for one bus.
#[derive(Debug)]
pub struct PipelineMetrics {
    sinks: RwLock<HashMap<String, SinkMetrics>>,
    published: AtomicU64,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            published: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Count one published event.
    pub fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one `handle` call on a sink.
    pub fn record_delivery(&self, sink: &str, duration: Duration, success: bool) {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        let metrics = sinks.entry(sink.to_string()).or_insert_with(SinkMetrics::new);
        metrics.record(duration, success);
    }

    /// Get metrics for one sink.
    pub fn sink_metrics(&self, sink: &str) -> Option<SinkMetrics> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sink)
            .cloned()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        PipelineSnapshot {
            sinks: sinks.clone(),
            published: self.published(),
            uptime: self.start_time.elapsed(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivery metrics for a single sink.
#[derive(Debug, Clone)]
pub struct SinkMetrics {
    /// Events the sink accepted.
    pub delivered: u64,

    /// Events the sink rejected.
    pub failed: u64,

    /// Total time spent in `handle`.
    pub total_duration: Duration,

    pub min_duration: Duration,
    pub max_duration: Duration,

    /// Latency distribution.
    pub histogram: Histogram,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self {
            delivered: 0,
            failed: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration, success: bool) {
        if success {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn attempts(&self) -> u64 {
        self.delivered + self.failed
    }

    pub fn avg_duration(&self) -> Duration {
        match self.attempts() {
            0 => Duration::ZERO,
            n => self.total_duration / n as u32,
        }
    }

    /// Fraction of accepted events (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        match self.attempts() {
            0 => 1.0,
            n => self.delivered as f64 / n as f64,
        }
    }
}

impl Default for SinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram with fixed buckets for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in microseconds.
    buckets: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile, reported as the upper bound of its bucket.
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
                let micros = if i < self.buckets.len() {
                    self.buckets[i]
                } else {
                    self.buckets.last().copied().unwrap_or(0) * 10
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 100us, 1ms, 10ms, 100ms, 1s, 10s
        Self::with_buckets(vec![100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000])
    }
}

/// A snapshot of pipeline metrics at a point in time.
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub sinks: HashMap<String, SinkMetrics>,
    pub published: u64,
    pub uptime: Duration,
}

impl PipelineSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Pipeline Metrics ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!("Events published: {}\n\n", self.published));

        let mut names: Vec<_> = self.sinks.keys().collect();
        names.sort();
        for name in names {
            let metrics = &self.sinks[name];
            report.push_str(&format!(
                "  {}: {} delivered, {} failed, avg {:.2?}, p99 {:.2?}\n",
                name,
                metrics.delivered,
                metrics.failed,
                metrics.avg_duration(),
                metrics.histogram.p99()
            ));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_metrics() {
        let mut metrics = SinkMetrics::new();
        metrics.record(Duration::from_millis(10), true);
        metrics.record(Duration::from_millis(20), true);
        metrics.record(Duration::from_millis(30), false);

        assert_eq!(metrics.delivered, 2);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.avg_duration(), Duration::from_millis(20));
        assert!((metrics.success_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut hist = Histogram::default();
        for _ in 0..100 {
            hist.record(Duration::from_micros(500));
        }
        assert_eq!(hist.percentile(50.0), Duration::from_micros(1_000));
        assert_eq!(hist.p99(), Duration::from_micros(1_000));
        assert_eq!(hist.counts()[1], 100);
    }

    #[test]
    fn test_pipeline_metrics_snapshot_report() {
        let metrics = PipelineMetrics::new();
        metrics.record_publish();
        metrics.record_delivery("sqlite", Duration::from_millis(1), true);
        metrics.record_delivery("jsonl", Duration::from_millis(1), false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.sinks["jsonl"].failed, 1);
        let report = snapshot.format_report();
        assert!(report.contains("Events published: 1"));
        assert!(report.contains("jsonl: 0 delivered, 1 failed"));
        assert!(report.find("jsonl").unwrap() < report.find("sqlite").unwrap());
    }
}
