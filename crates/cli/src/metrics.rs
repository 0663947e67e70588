use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Pipeline stages with their own timers.
#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Read,
    Build,
    Submit,
    Parse,
    Reconcile,
    Maintain,
}

pub struct Metrics {
    // Counters
    records_read: AtomicUsize,
    rows_dropped: AtomicUsize,
    requests_built: AtomicUsize,
    batches_submitted: AtomicUsize,
    batches_failed: AtomicUsize,
    results_parsed: AtomicUsize,
    lines_skipped: AtomicUsize,
    no_answer: AtomicUsize,
    nodes_updated: AtomicUsize,
    unmatched: AtomicUsize,

    // Timing (in microseconds)
    read_time_us: AtomicU64,
    build_time_us: AtomicU64,
    submit_time_us: AtomicU64,
    parse_time_us: AtomicU64,
    reconcile_time_us: AtomicU64,
    maintain_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records_read: AtomicUsize::new(0),
            rows_dropped: AtomicUsize::new(0),
            requests_built: AtomicUsize::new(0),
            batches_submitted: AtomicUsize::new(0),
            batches_failed: AtomicUsize::new(0),
            results_parsed: AtomicUsize::new(0),
            lines_skipped: AtomicUsize::new(0),
            no_answer: AtomicUsize::new(0),
            nodes_updated: AtomicUsize::new(0),
            unmatched: AtomicUsize::new(0),
            read_time_us: AtomicU64::new(0),
            build_time_us: AtomicU64::new(0),
            submit_time_us: AtomicU64::new(0),
            parse_time_us: AtomicU64::new(0),
            reconcile_time_us: AtomicU64::new(0),
            maintain_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_read(&self, records: usize, dropped: usize) {
        self.records_read.fetch_add(records, Ordering::Relaxed);
        self.rows_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn record_built(&self, requests: usize) {
        self.requests_built.fetch_add(requests, Ordering::Relaxed);
    }

    pub fn record_batch(&self, success: bool) {
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.batches_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_parse(&self, results: usize, skipped: usize, no_answer: usize) {
        self.results_parsed.fetch_add(results, Ordering::Relaxed);
        self.lines_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.no_answer.fetch_add(no_answer, Ordering::Relaxed);
    }

    pub fn record_writes(&self, updated: usize, unmatched: usize) {
        self.nodes_updated.fetch_add(updated, Ordering::Relaxed);
        self.unmatched.fetch_add(unmatched, Ordering::Relaxed);
    }

    pub fn record_time(&self, stage: Stage, duration: Duration) {
        let timer = match stage {
            Stage::Read => &self.read_time_us,
            Stage::Build => &self.build_time_us,
            Stage::Submit => &self.submit_time_us,
            Stage::Parse => &self.parse_time_us,
            Stage::Reconcile => &self.reconcile_time_us,
            Stage::Maintain => &self.maintain_time_us,
        };
        timer.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn batches_failed(&self) -> usize {
        self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_read: self.records_read.load(Ordering::Relaxed),
            rows_dropped: self.rows_dropped.load(Ordering::Relaxed),
            requests_built: self.requests_built.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            results_parsed: self.results_parsed.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            no_answer: self.no_answer.load(Ordering::Relaxed),
            nodes_updated: self.nodes_updated.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            read_time_ms: to_ms(&self.read_time_us),
            build_time_ms: to_ms(&self.build_time_us),
            submit_time_ms: to_ms(&self.submit_time_us),
            parse_time_ms: to_ms(&self.parse_time_us),
            reconcile_time_ms: to_ms(&self.reconcile_time_us),
            maintain_time_ms: to_ms(&self.maintain_time_us),
        }
    }
}

fn to_ms(total_us: &AtomicU64) -> f64 {
    total_us.load(Ordering::Relaxed) as f64 / 1000.0
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub records_read: usize,
    pub rows_dropped: usize,
    pub requests_built: usize,
    pub batches_submitted: usize,
    pub batches_failed: usize,
    pub results_parsed: usize,
    pub lines_skipped: usize,
    pub no_answer: usize,
    pub nodes_updated: usize,
    pub unmatched: usize,
    pub read_time_ms: f64,
    pub build_time_ms: f64,
    pub submit_time_ms: f64,
    pub parse_time_ms: f64,
    pub reconcile_time_ms: f64,
    pub maintain_time_ms: f64,
}

pub struct TimedOperation {
    stage: Stage,
    start: Instant,
}

impl TimedOperation {
    pub fn start(stage: Stage) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    /// Stop the clock and add the elapsed time to `metrics`.
    pub fn finish(self, metrics: &Metrics) -> Duration {
        let elapsed = self.start.elapsed();
        metrics.record_time(self.stage, elapsed);
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_batch(true);
        metrics.record_batch(false);
        metrics.record_parse(10, 2, 1);
        metrics.record_parse(5, 0, 0);
        metrics.record_time(Stage::Parse, Duration::from_millis(3));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_submitted, 2);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.results_parsed, 15);
        assert_eq!(snapshot.lines_skipped, 2);
        assert_eq!(snapshot.parse_time_ms, 3.0);
    }
}
