use hdrhistogram::Histogram;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Shared delivery counters plus a batch send latency histogram.
pub struct Stats {
    // Batch send latency (microsecond precision)
    latency_hist: RwLock<Histogram<u64>>,

    sent_messages: AtomicU64,
    sent_batches: AtomicU64,
    error_count: AtomicU64,

    start_time: Instant,
    last_snapshot: RwLock<(Instant, u64)>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            // 1µs to 10min, 3 significant digits
            latency_hist: RwLock::new(
                Histogram::new_with_bounds(1, 600_000_000, 3).expect("constant histogram bounds"),
            ),
            sent_messages: AtomicU64::new(0),
            sent_batches: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            start_time: now,
            last_snapshot: RwLock::new((now, 0)),
        }
    }

    /// Record an accepted batch and how long the send took.
    pub async fn record_sent(&self, messages: usize, latency: Duration) {
        self.sent_messages.fetch_add(messages as u64, Ordering::Relaxed);
        self.sent_batches.fetch_add(1, Ordering::Relaxed);
        let micros = (latency.as_micros() as u64).max(1);
        let _ = self.latency_hist.write().await.record(micros);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent_messages(&self) -> u64 {
        self.sent_messages.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        let sent = self.sent_messages();
        let batches = self.sent_batches.load(Ordering::Relaxed);
        let errors = self.error_count();

        let hist = self.latency_hist.read().await;
        let (p50, p99, max) = if hist.is_empty() {
            (0, 0, 0)
        } else {
            (hist.value_at_quantile(0.5), hist.value_at_quantile(0.99), hist.max())
        };
        drop(hist);

        let (interval_duration, interval_sent) = {
            let mut last = self.last_snapshot.write().await;
            let (at, prev_sent) = *last;
            *last = (now, sent);
            (now.duration_since(at), sent.saturating_sub(prev_sent))
        };

        StatsSnapshot {
            sent_messages: sent,
            sent_batches: batches,
            error_count: errors,
            total_duration: now.duration_since(self.start_time),
            interval_duration,
            interval_sent,
            latency_us_p50: p50,
            latency_us_p99: p99,
            latency_us_max: max,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub sent_messages: u64,
    pub sent_batches: u64,
    pub error_count: u64,
    pub total_duration: Duration,
    pub interval_duration: Duration,
    pub interval_sent: u64,
    pub latency_us_p50: u64,
    pub latency_us_p99: u64,
    pub latency_us_max: u64,
}

impl StatsSnapshot {
    /// Messages per second since the run started
    pub fn average_rate(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            self.sent_messages as f64 / secs
        } else {
            0.0
        }
    }

    /// Messages per second since the previous snapshot
    pub fn interval_rate(&self) -> f64 {
        let secs = self.interval_duration.as_secs_f64();
        if secs > 0.0 {
            self.interval_sent as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_and_interval_deltas() {
        let stats = Stats::new();
        stats.record_sent(10, Duration::from_millis(3)).await;
        stats.record_sent(5, Duration::from_millis(5)).await;
        stats.record_error();

        let first = stats.snapshot().await;
        assert_eq!(first.sent_messages, 15);
        assert_eq!(first.sent_batches, 2);
        assert_eq!(first.error_count, 1);
        assert_eq!(first.interval_sent, 15);
        assert!(first.latency_us_max >= 5_000);

        stats.record_sent(10, Duration::from_millis(1)).await;
        let second = stats.snapshot().await;
        assert_eq!(second.sent_messages, 25);
        assert_eq!(second.interval_sent, 10);
    }

    #[tokio::test]
    async fn empty_snapshot_has_zero_latency() {
        let snap = Stats::new().snapshot().await;
        assert_eq!(snap.latency_us_p50, 0);
        assert_eq!(snap.sent_messages, 0);
    }
}
