//! The per-unit delivery loop.
//!
//! A worker drains its quota in batches of at most `max_batch_size`, sending
//! each batch through its own [`QueueSender`]. Failed batches are not counted
//! and are replaced by a batch of the same size with fresh messages.

use crate::message::{Batch, Batcher, MessageGenerator};
use crate::metrics::stats::Stats;
use crate::plan::WorkUnit;
use crate::rate::RateController;
use crate::transport::{QueueSender, TransportError};
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a worker keeps trying after consecutive send failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up after this many failures in a row; `0` retries forever.
    pub max_consecutive_failures: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Retry immediately and never give up.
    pub fn unbounded() -> Self {
        Self {
            max_consecutive_failures: 0,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    pub fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_consecutive_failures != 0
            && consecutive_failures >= self.max_consecutive_failures
    }

    /// Delay before the next attempt: doubles per failure, capped at `backoff_max`.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.saturating_sub(1).min(20);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}

/// Read-only settings shared by every worker in a run.
pub struct WorkerContext {
    pub template: Arc<str>,
    pub max_batch_size: usize,
    pub retry: RetryPolicy,
    pub send_timeout: Option<Duration>,
    /// Batches per second per worker.
    pub rate: Option<f64>,
    /// Log a "N messages sent" line each time this many more are delivered.
    pub progress_every: Option<NonZeroU64>,
    pub stats: Arc<Stats>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Stopped after too many consecutive send failures.
    Abandoned { error: String },
    Cancelled,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Abandoned { .. } => "abandoned",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub worker_id: u32,
    pub quota: u64,
    pub sent_count: u64,
    pub outcome: Outcome,
}

impl CompletionReport {
    /// Report for a unit that never started because the run was cancelled.
    pub fn not_started(unit: WorkUnit) -> Self {
        Self {
            worker_id: unit.worker_id,
            quota: unit.quota,
            sent_count: 0,
            outcome: Outcome::Cancelled,
        }
    }
}

async fn send_once(
    sender: &mut dyn QueueSender,
    batch: Batch,
    limit: Option<Duration>,
) -> Result<(), TransportError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, sender.send_batch(batch))
            .await
            .map_err(|_| TransportError::Timeout)?,
        None => sender.send_batch(batch).await,
    }
}

/// Send `unit.quota` messages through `sender`, returning once the quota is
/// met, the retry policy gives up, or the run is cancelled.
pub async fn run_worker(
    unit: WorkUnit,
    sender: &mut dyn QueueSender,
    ctx: &WorkerContext,
) -> CompletionReport {
    let WorkUnit { worker_id, quota } = unit;
    let mut batcher = Batcher::new(
        MessageGenerator::new(Arc::clone(&ctx.template)),
        ctx.max_batch_size,
    );
    let max_batch = batcher.max_batch_size() as u64;
    let mut rate = ctx.rate.and_then(RateController::new);
    let mut remaining = quota;
    let mut failures = 0u32;

    let report = |remaining: u64, outcome: Outcome| CompletionReport {
        worker_id,
        quota,
        sent_count: quota - remaining,
        outcome,
    };

    debug!(worker_id, quota, "worker started");

    while remaining > 0 {
        if ctx.cancel.is_cancelled() {
            return report(remaining, Outcome::Cancelled);
        }
        if let Some(rc) = rate.as_mut() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return report(remaining, Outcome::Cancelled),
                _ = rc.wait_for_next() => {}
            }
        }

        let batch = batcher.make_batch(remaining.min(max_batch) as usize);
        let len = batch.len() as u64;
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return report(remaining, Outcome::Cancelled),
            r = send_once(&mut *sender, batch, ctx.send_timeout) => r,
        };

        match result {
            Ok(()) => {
                let before = quota - remaining;
                remaining -= len;
                failures = 0;
                ctx.stats.record_sent(len as usize, started.elapsed()).await;
                if let Some(every) = ctx.progress_every {
                    let sent = quota - remaining;
                    if sent / every.get() > before / every.get() {
                        info!(worker_id, "{} messages sent", sent);
                    }
                }
            }
            Err(e) => {
                ctx.stats.record_error();
                failures += 1;
                warn!(
                    worker_id,
                    error = %e,
                    recoverable = e.is_recoverable(),
                    failures,
                    "error sending message batch"
                );
                if ctx.retry.exhausted(failures) {
                    error!(
                        worker_id,
                        sent = quota - remaining,
                        quota,
                        "giving up after {} consecutive send failures",
                        failures
                    );
                    return report(
                        remaining,
                        Outcome::Abandoned {
                            error: e.to_string(),
                        },
                    );
                }
                let delay = ctx.retry.backoff(failures);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return report(remaining, Outcome::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    debug!(worker_id, quota, "worker finished");
    report(0, Outcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockOptions, MockTransport};
    use crate::transport::Transport;

    fn ctx(retry: RetryPolicy) -> WorkerContext {
        WorkerContext {
            template: Arc::from("Message_Body"),
            max_batch_size: 10,
            retry,
            send_timeout: None,
            rate: None,
            progress_every: None,
            stats: Arc::new(Stats::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn unit(quota: u64) -> WorkUnit {
        WorkUnit { worker_id: 1, quota }
    }

    #[tokio::test]
    async fn batches_of_ten_then_remainder() {
        let mock = MockTransport::new(MockOptions::default());
        let mut sender = mock.create_sender().await.unwrap();
        let report = run_worker(unit(25), sender.as_mut(), &ctx(RetryPolicy::default())).await;

        assert_eq!(report.sent_count, 25);
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(mock.batch_sizes(), vec![10, 10, 5]);
    }

    #[tokio::test]
    async fn batch_sizes_sum_to_quota_and_respect_cap() {
        for quota in [1u64, 9, 10, 11, 99, 1000, 1003] {
            let mock = MockTransport::new(MockOptions::default());
            let mut sender = mock.create_sender().await.unwrap();
            let mut c = ctx(RetryPolicy::default());
            c.max_batch_size = 7;
            run_worker(unit(quota), sender.as_mut(), &c).await;

            let sizes = mock.batch_sizes();
            assert_eq!(sizes.iter().sum::<usize>() as u64, quota);
            assert!(sizes.iter().all(|&s| (1..=7).contains(&s)));
        }
    }

    #[tokio::test]
    async fn first_failure_is_replaced_with_fresh_batch() {
        let mock = MockTransport::new(MockOptions {
            fail_first: 1,
            ..Default::default()
        });
        let mut sender = mock.create_sender().await.unwrap();
        let c = ctx(RetryPolicy::unbounded());
        let report = run_worker(unit(25), sender.as_mut(), &c).await;

        assert_eq!(report.sent_count, 25);
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(mock.send_calls(), 4);
        assert_eq!(mock.delivered(), 25);
        assert_eq!(mock.duplicate_ids(), 0);
        assert_eq!(c.stats.error_count(), 1);
    }

    #[tokio::test]
    async fn persistent_failure_yields_partial_report() {
        let mock = MockTransport::new(MockOptions {
            fail_always: true,
            ..Default::default()
        });
        let mut sender = mock.create_sender().await.unwrap();
        let retry = RetryPolicy {
            max_consecutive_failures: 3,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        };
        let report = run_worker(unit(40), sender.as_mut(), &ctx(retry)).await;

        assert_eq!(report.sent_count, 0);
        assert!(matches!(report.outcome, Outcome::Abandoned { .. }));
        assert_eq!(mock.send_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sends_time_out() {
        let mock = MockTransport::new(MockOptions {
            latency: Duration::from_millis(500),
            ..Default::default()
        });
        let mut sender = mock.create_sender().await.unwrap();
        let mut c = ctx(RetryPolicy {
            max_consecutive_failures: 2,
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(10),
        });
        c.send_timeout = Some(Duration::from_millis(50));
        let report = run_worker(unit(10), sender.as_mut(), &c).await;

        assert_eq!(
            report.outcome,
            Outcome::Abandoned {
                error: TransportError::Timeout.to_string()
            }
        );
        assert_eq!(mock.delivered(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_sends_nothing() {
        let mock = MockTransport::new(MockOptions::default());
        let mut sender = mock.create_sender().await.unwrap();
        let c = ctx(RetryPolicy::default());
        c.cancel.cancel();
        let report = run_worker(unit(100), sender.as_mut(), &c).await;

        assert_eq!(report.outcome, Outcome::Cancelled);
        assert_eq!(report.sent_count, 0);
        assert_eq!(mock.send_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff() {
        let mock = MockTransport::new(MockOptions {
            fail_always: true,
            ..Default::default()
        });
        let mut sender = mock.create_sender().await.unwrap();
        let c = ctx(RetryPolicy {
            max_consecutive_failures: 0,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(60),
        });
        let cancel = c.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
        let report = run_worker(unit(10), sender.as_mut(), &c).await;

        assert_eq!(report.outcome, Outcome::Cancelled);
        assert_eq!(mock.send_calls(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_consecutive_failures: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(1000),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(800));
        assert_eq!(p.backoff(5), Duration::from_millis(1000));
        assert_eq!(p.backoff(u32::MAX), Duration::from_millis(1000));
        assert!(!p.exhausted(4));
        assert!(p.exhausted(5));
        assert!(!RetryPolicy::unbounded().exhausted(u32::MAX));
    }
}
