use index::CacheStats;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Request counters for the HTTP server.
pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_build_time_us: AtomicU64,
    total_query_time_us: AtomicU64,

    // Counts
    builds: AtomicUsize,
    queries: AtomicUsize,
    documents_processed: AtomicUsize,
    documents_skipped: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            total_build_time_us: AtomicU64::new(0),
            total_query_time_us: AtomicU64::new(0),
            builds: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            documents_processed: AtomicUsize::new(0),
            documents_skipped: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_build(&self, duration: Duration, documents: usize, skipped: usize) {
        self.total_build_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.builds.fetch_add(1, Ordering::Relaxed);
        self.documents_processed.fetch_add(documents, Ordering::Relaxed);
        self.documents_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_query(&self, duration: Duration) {
        self.total_query_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            avg_build_time_ms: avg_time_ms(&self.total_build_time_us, &self.builds),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, &self.queries),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            documents_skipped: self.documents_skipped.load(Ordering::Relaxed),
            embedding_cache: None,
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub builds: usize,
    pub queries: usize,
    pub avg_build_time_ms: f64,
    pub avg_query_time_ms: f64,
    pub documents_processed: usize,
    pub documents_skipped: usize,
    /// Absent when embeddings are not cached.
    pub embedding_cache: Option<CacheStats>,
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
