use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide counters, shared by the pipeline and the HTTP layer
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    // Counters
    builds_started: AtomicU64,
    chunks_processed: AtomicU64,
    chunks_failed: AtomicU64,
    entities_committed: AtomicU64,
    relations_committed: AtomicU64,
    queries_served: AtomicU64,
    queries_failed: AtomicU64,

    // Timing (in microseconds)
    total_extract_time_us: AtomicU64,
    total_query_time_us: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_build(&self) {
        self.builds_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction(&self, duration: Duration, success: bool) {
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_commit(&self, entities: usize, relations: usize) {
        self.entities_committed.fetch_add(entities as u64, Ordering::Relaxed);
        self.relations_committed.fetch_add(relations as u64, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: Duration, success: bool) {
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.queries_served.fetch_add(1, Ordering::Relaxed);
        } else {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let chunks_processed = self.chunks_processed.load(Ordering::Relaxed);
        let chunks_failed = self.chunks_failed.load(Ordering::Relaxed);
        let queries_served = self.queries_served.load(Ordering::Relaxed);
        let queries_failed = self.queries_failed.load(Ordering::Relaxed);

        MetricsSnapshot {
            builds_started: self.builds_started.load(Ordering::Relaxed),
            chunks_processed,
            chunks_failed,
            entities_committed: self.entities_committed.load(Ordering::Relaxed),
            relations_committed: self.relations_committed.load(Ordering::Relaxed),
            queries_served,
            queries_failed,
            avg_extract_time_ms: avg_time_ms(&self.total_extract_time_us, chunks_processed + chunks_failed),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, queries_served + queries_failed),
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    total_us.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0 // Convert to ms
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub builds_started: u64,
    pub chunks_processed: u64,
    pub chunks_failed: u64,
    pub entities_committed: u64,
    pub relations_committed: u64,
    pub queries_served: u64,
    pub queries_failed: u64,
    pub avg_extract_time_ms: f64,
    pub avg_query_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let metrics = PipelineMetrics::new();
        metrics.record_extraction(Duration::from_millis(10), true);
        metrics.record_extraction(Duration::from_millis(30), false);
        metrics.record_commit(3, 2);
        metrics.record_query(Duration::from_millis(4), true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.chunks_processed, 1);
        assert_eq!(snapshot.chunks_failed, 1);
        assert_eq!(snapshot.entities_committed, 3);
        assert_eq!(snapshot.relations_committed, 2);
        assert_eq!(snapshot.queries_served, 1);
        assert!((snapshot.avg_extract_time_ms - 20.0).abs() < 1e-9);
        assert!((snapshot.avg_query_time_ms - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_snapshot_has_zero_averages() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot.avg_extract_time_ms, 0.0);
        assert_eq!(snapshot.avg_query_time_ms, 0.0);
    }
}
