//! In-process serving metrics and the periodic summary reporter.

use crate::encoder::{AbsentField, UnknownCategory};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector for the prediction endpoint
pub struct ServingMetrics {
    /// Requests received on the predict endpoint
    pub requests: AtomicU64,
    /// Rows scored successfully
    pub predictions: AtomicU64,
    /// Rows labeled positive
    pub positive_labels: AtomicU64,
    /// Requests rejected as malformed or failing encoding
    pub client_errors: AtomicU64,
    /// Requests failing inside the model
    pub prediction_failures: AtomicU64,
    /// Unknown categorical values seen, per field
    unknown_by_field: RwLock<BTreeMap<String, u64>>,
    /// Rows missing a schema field, per field
    absent_by_field: RwLock<BTreeMap<String, u64>>,
    /// Request latencies (in microseconds)
    latencies: RwLock<Vec<u64>>,
    /// Probability distribution buckets
    probability_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            positive_labels: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            prediction_failures: AtomicU64::new(0),
            unknown_by_field: RwLock::new(BTreeMap::new()),
            absent_by_field: RwLock::new(BTreeMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            probability_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one scored row
    pub fn record_prediction(&self, latency: Duration, probability: f64, label: u8) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        if label == 1 {
            self.positive_labels.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.latencies.write() {
            times.push(latency.as_micros() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }

        let bucket = (probability * 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.probability_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn record_unknown_categories(&self, unknown: &[UnknownCategory]) {
        if unknown.is_empty() {
            return;
        }
        if let Ok(mut by_field) = self.unknown_by_field.write() {
            for u in unknown {
                *by_field.entry(u.field.to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn record_absent_fields(&self, absent: &[AbsentField]) {
        if absent.is_empty() {
            return;
        }
        if let Ok(mut by_field) = self.absent_by_field.write() {
            for a in absent {
                *by_field.entry(a.field.to_string()).or_insert(0) += a.rows as u64;
            }
        }
    }

    pub fn record_client_error(&self) {
        self.client_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prediction_failure(&self) {
        self.prediction_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Latency statistics over the retained samples
    pub fn latency_stats(&self) -> LatencyStats {
        let times = match self.latencies.read() {
            Ok(times) => times,
            Err(_) => return LatencyStats::default(),
        };
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let pct = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: pct(0.50),
            p95_us: pct(0.95),
            p99_us: pct(0.99),
            max_us: sorted[count - 1],
        }
    }

    pub fn unknown_by_field(&self) -> BTreeMap<String, u64> {
        self.unknown_by_field
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn absent_by_field(&self) -> BTreeMap<String, u64> {
        self.absent_by_field
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn probability_distribution(&self) -> [u64; 10] {
        self.probability_buckets
            .read()
            .map(|b| *b)
            .unwrap_or_default()
    }

    /// Share of scored rows labeled positive
    pub fn positive_rate(&self) -> f64 {
        let total = self.predictions.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.positive_labels.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Requests per second since startup
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.requests.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Log a summary of everything collected so far
    pub fn print_summary(&self) {
        let latency = self.latency_stats();
        info!(
            requests = self.requests.load(Ordering::Relaxed),
            predictions = self.predictions.load(Ordering::Relaxed),
            positive_rate = format!("{:.3}", self.positive_rate()),
            client_errors = self.client_errors.load(Ordering::Relaxed),
            prediction_failures = self.prediction_failures.load(Ordering::Relaxed),
            throughput = format!("{:.1} req/s", self.throughput()),
            "Serving metrics summary"
        );
        info!(
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            max_us = latency.max_us,
            "Prediction latency"
        );

        let unknown = self.unknown_by_field();
        if !unknown.is_empty() {
            info!(fields = ?unknown, "Unknown categories by field");
        }

        let absent = self.absent_by_field();
        if !absent.is_empty() {
            info!(fields = ?absent, "Absent fields by field");
        }

        let dist = self.probability_distribution();
        let total: u64 = dist.iter().sum();
        if total > 0 {
            for (i, &count) in dist.iter().enumerate() {
                info!(
                    "  p {:.1}-{:.1}: {:>6} ({:>5.1}%)",
                    i as f64 / 10.0,
                    (i + 1) as f64 / 10.0,
                    count,
                    count as f64 / total as f64 * 100.0
                );
            }
        }
    }
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a metrics summary every `interval_secs`
pub struct MetricsReporter {
    metrics: Arc<ServingMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServingMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
