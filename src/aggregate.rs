//! Collecting completion reports into a run total.

use crate::output::{ProgressEvent, ProgressSink};
use crate::worker::{CompletionReport, Outcome};
use anyhow::{Result, bail};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub requested: u64,
    /// Messages actually accepted by the queue.
    pub total_sent: u64,
    /// In arrival order.
    pub reports: Vec<CompletionReport>,
}

impl RunSummary {
    pub fn workers(&self) -> usize {
        self.reports.len()
    }

    pub fn abandoned(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Abandoned { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Cancelled))
    }

    pub fn is_complete(&self) -> bool {
        self.total_sent == self.requested
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Wait for exactly `expected` reports, observing the running total after
/// each. Fails if the channel closes early.
pub async fn collect(
    reports: flume::Receiver<CompletionReport>,
    expected: usize,
    requested: u64,
    sink: &mut dyn ProgressSink,
) -> Result<RunSummary> {
    let mut summary = RunSummary {
        requested,
        total_sent: 0,
        reports: Vec::with_capacity(expected),
    };

    while summary.reports.len() < expected {
        let Ok(report) = reports.recv_async().await else {
            bail!(
                "report channel closed after {} of {} workers reported",
                summary.reports.len(),
                expected
            );
        };
        summary.total_sent += report.sent_count;
        debug!(
            worker_id = report.worker_id,
            sent = report.sent_count,
            total = summary.total_sent,
            "worker reported"
        );
        sink.observe(&ProgressEvent {
            worker_id: report.worker_id,
            sent_count: report.sent_count,
            running_total: summary.total_sent,
            outcome: report.outcome.label(),
            timestamp: chrono::Utc::now(),
        })?;
        summary.reports.push(report);
    }

    sink.finish()?;
    Ok(summary)
}
