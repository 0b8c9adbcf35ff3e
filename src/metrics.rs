//! Run statistics for one loop instance.
//!
//! Counters are advisory: they feed the periodic human-facing summary and
//! reset on restart. Nothing in the loop's correctness depends on them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Latency samples kept for percentile estimates
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Counters and distributions for one worker
pub struct RunStats {
    worker: usize,
    /// Transactions scored and recorded (inserted or already present)
    processed: AtomicU64,
    /// Newly recorded fraud decisions
    frauds_detected: AtomicU64,
    /// Transactions the store already held
    duplicates: AtomicU64,
    /// Cycles dropped for malformed input or scoring failure
    skipped: AtomicU64,
    fetch_failures: AtomicU64,
    store_failures: AtomicU64,
    alert_failures: AtomicU64,
    /// Cycle latencies (in microseconds), fetch excluded
    processing_times: RwLock<Vec<u64>>,
    /// Probability distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub frauds_detected: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub fetch_failures: u64,
    pub store_failures: u64,
    pub alert_failures: u64,
}

impl RunStats {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            processed: AtomicU64::new(0),
            frauds_detected: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            alert_failures: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a transaction the store accepted for the first time
    pub fn record_inserted(&self, processing_time: Duration, probability: f64, fraud: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if fraud {
            self.frauds_detected.fetch_add(1, Ordering::Relaxed);
        }
        self.record_latency(processing_time);
        self.record_probability(probability);
    }

    /// Record a transaction the store already held
    pub fn record_duplicate(&self, processing_time: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.duplicates.fetch_add(1, Ordering::Relaxed);
        self.record_latency(processing_time);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert_failure(&self) {
        self.alert_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, processing_time: Duration) {
        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }
    }

    fn record_probability(&self, probability: f64) {
        let bucket = (probability * 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            frauds_detected: self.frauds_detected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            alert_failures: self.alert_failures.load(Ordering::Relaxed),
        }
    }

    /// Get processing time statistics
    pub fn processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let pct = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: pct(0.50),
            p95_us: pct(0.95),
            p99_us: pct(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Get probability distribution
    pub fn score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    /// Log summary statistics
    pub fn log_summary(&self) {
        let s = self.snapshot();
        let fraud_rate = if s.processed > s.duplicates {
            s.frauds_detected as f64 / (s.processed - s.duplicates) as f64 * 100.0
        } else {
            0.0
        };
        let processing = self.processing_stats();
        let uptime = self.start_time.elapsed().as_secs();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║           FRAUD SCORING LOOP - WORKER {:<3} SUMMARY           ║", self.worker);
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processed: {:>8}  │  Frauds: {:>6} ({:>5.1}%)  │  Up {:>6}s ║",
            s.processed, s.frauds_detected, fraud_rate, uptime
        );
        info!(
            "║ Duplicates: {:>6}  │  Skipped: {:>6}                       ║",
            s.duplicates, s.skipped
        );
        info!(
            "║ Failures: fetch={:>5} store={:>5} alert={:>5}                ║",
            s.fetch_failures, s.store_failures, s.alert_failures
        );
        info!(
            "║ Cycle Time (μs): mean={:>6} p50={:>6} p95={:>6} p99={:>6} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Fraud Probability Distribution:                              ║");
        let dist = self.score_distribution();
        let total: u64 = dist.iter().sum();
        for (i, &count) in dist.iter().enumerate() {
            let pct = if total > 0 { count as f64 / total as f64 * 100.0 } else { 0.0 };
            let bar = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

/// Processing time statistics
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodically logs a worker's summary until cancelled
pub struct SummaryReporter {
    stats: Arc<RunStats>,
    interval: Duration,
}

impl SummaryReporter {
    pub fn new(stats: Arc<RunStats>, interval: Duration) -> Self {
        Self { stats, interval }
    }

    /// Start the periodic reporting task
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.stats.log_summary(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = RunStats::new(0);

        stats.record_inserted(Duration::from_micros(100), 0.87, true);
        stats.record_inserted(Duration::from_micros(200), 0.05, false);
        stats.record_duplicate(Duration::from_micros(50));
        stats.record_fetch_failure();
        stats.record_skipped();

        let s = stats.snapshot();
        assert_eq!(s.processed, 3);
        assert_eq!(s.frauds_detected, 1);
        assert_eq!(s.duplicates, 1);
        assert_eq!(s.fetch_failures, 1);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.store_failures, 0);
    }

    #[test]
    fn test_distribution_buckets() {
        let stats = RunStats::new(0);
        stats.record_inserted(Duration::ZERO, 0.0, false);
        stats.record_inserted(Duration::ZERO, 0.87, true);
        stats.record_inserted(Duration::ZERO, 1.0, true);

        let dist = stats.score_distribution();
        assert_eq!(dist[0], 1);
        assert_eq!(dist[8], 1);
        assert_eq!(dist[9], 1);
    }

    #[test]
    fn test_processing_stats() {
        let stats = RunStats::new(0);
        assert_eq!(stats.processing_stats(), ProcessingStats::default());

        for us in [100, 200, 300, 400] {
            stats.record_duplicate(Duration::from_micros(us));
        }
        let p = stats.processing_stats();
        assert_eq!(p.count, 4);
        assert_eq!(p.mean_us, 250);
        assert_eq!(p.p50_us, 300);
        assert_eq!(p.max_us, 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_cancel() {
        let stats = Arc::new(RunStats::new(0));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            SummaryReporter::new(stats, Duration::from_secs(30)).run(shutdown.clone()),
        );

        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
