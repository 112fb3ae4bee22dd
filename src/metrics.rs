use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for command/completion traffic.
pub struct Metrics {
    operation_latencies: Mutex<HashMap<String, Histogram<u64>>>,
    submitted: AtomicU64,
    completed: AtomicU64,
    queue_full: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            operation_latencies: Mutex::new(HashMap::new()),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            queue_full: AtomicU64::new(0),
        }
    }

    /// Record submission-to-completion latency for one operation.
    pub fn record_latency(&self, operation: &str, duration: Duration) {
        let mut latencies = self.operation_latencies.lock();
        let histogram = latencies
            .entry(operation.to_string())
            .or_insert_with(|| Histogram::<u64>::new(3).unwrap());

        let micros = duration.as_micros() as u64;
        let _ = histogram.record(micros);
    }

    pub fn incr_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn queue_full(&self) -> u64 {
        self.queue_full.load(Ordering::Relaxed)
    }

    /// Latency percentiles in microseconds for one operation label.
    pub fn get_percentiles(&self, operation: &str) -> (f64, f64, f64) {
        let latencies = self.operation_latencies.lock();
        if let Some(histogram) = latencies.get(operation) {
            let p50 = histogram.value_at_quantile(0.50) as f64;
            let p95 = histogram.value_at_quantile(0.95) as f64;
            let p99 = histogram.value_at_quantile(0.99) as f64;
            (p50, p95, p99)
        } else {
            (0.0, 0.0, 0.0)
        }
    }

    pub fn report(&self) -> MetricsReport {
        let mut operation_latencies = HashMap::new();
        let latencies = self.operation_latencies.lock();

        for (op, histogram) in latencies.iter() {
            let p50 = histogram.value_at_quantile(0.50) as f64;
            let p95 = histogram.value_at_quantile(0.95) as f64;
            let p99 = histogram.value_at_quantile(0.99) as f64;
            operation_latencies.insert(op.clone(), (p50, p95, p99));
        }

        MetricsReport {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            operation_latencies,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsReport {
    pub submitted: u64,
    pub completed: u64,
    pub queue_full: u64,
    pub operation_latencies: HashMap<String, (f64, f64, f64)>, // (p50, p95, p99)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.submitted(), 0);
        assert_eq!(metrics.completed(), 0);
    }

    #[test]
    fn test_latency_recording() {
        let metrics = Metrics::new();

        metrics.record_latency("store", Duration::from_micros(100));
        metrics.record_latency("store", Duration::from_micros(200));
        metrics.record_latency("store", Duration::from_micros(150));

        let (p50, p95, p99) = metrics.get_percentiles("store");

        assert!(p50 > 0.0);
        assert!(p95 > 0.0);
        assert!(p99 > 0.0);
        assert!(p50 <= p95);
        assert!(p95 <= p99);
    }

    #[test]
    fn test_traffic_counters() {
        let metrics = Metrics::new();

        metrics.incr_submitted();
        metrics.incr_submitted();
        metrics.incr_completed();
        metrics.incr_queue_full();

        assert_eq!(metrics.submitted(), 2);
        assert_eq!(metrics.completed(), 1);
        assert_eq!(metrics.queue_full(), 1);
    }

    #[test]
    fn test_metrics_report() {
        let metrics = Metrics::new();

        metrics.record_latency("store", Duration::from_micros(100));
        metrics.record_latency("retrieve", Duration::from_micros(50));
        metrics.incr_submitted();
        metrics.incr_submitted();
        metrics.incr_completed();

        let report = metrics.report();

        assert_eq!(report.submitted, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.queue_full, 0);
        assert!(report.operation_latencies.contains_key("store"));
        assert!(report.operation_latencies.contains_key("retrieve"));
    }

    #[test]
    fn test_get_percentiles_nonexistent_operation() {
        let metrics = Metrics::new();

        let (p50, p95, p99) = metrics.get_percentiles("nonexistent");

        assert_eq!(p50, 0.0);
        assert_eq!(p95, 0.0);
        assert_eq!(p99, 0.0);
    }
}
