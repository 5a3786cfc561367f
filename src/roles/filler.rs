use crate::aggregate::{RunSummary, collect};
use crate::config::FillConfig;
use crate::metrics::stats::Stats;
use crate::output::ProgressSink;
use crate::plan::{WorkUnit, plan};
use crate::transport::Transport;
use crate::worker::{CompletionReport, Outcome, WorkerContext, run_worker};
use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Fill the queue per `config`, returning once every scheduled worker has
/// reported. Cancelling `cancel` stops workers between batches.
pub async fn run_filler(
    config: &FillConfig,
    transport: Arc<dyn Transport>,
    sink: &mut dyn ProgressSink,
    cancel: CancellationToken,
    snapshot_interval_secs: u64,
) -> Result<RunSummary> {
    let stats = Arc::new(Stats::new());
    let ctx = Arc::new(WorkerContext {
        template: Arc::clone(&config.body_template),
        max_batch_size: config.max_batch_size,
        retry: config.retry.clone(),
        send_timeout: config.send_timeout,
        rate: config.rate,
        progress_every: config.serial.then_some(config.per_worker_interval),
        stats: Arc::clone(&stats),
        cancel,
    });

    info!(
        count = config.total_count,
        serial = config.serial,
        interval = config.per_worker_interval.get(),
        batch_size = config.max_batch_size,
        concurrency = config.concurrency.get(),
        "starting fill"
    );

    let snapshot_handle = spawn_snapshot_logger(Arc::clone(&stats), snapshot_interval_secs);

    let result = if config.serial {
        fill_serially(config, transport.as_ref(), &ctx, sink).await
    } else {
        fill_concurrently(config, transport, &ctx, sink).await
    };

    if let Some(h) = snapshot_handle {
        h.abort();
    }
    if result.is_err() {
        ctx.cancel.cancel();
    }
    let summary = result?;

    let snap = stats.snapshot().await;
    info!(
        "Fill finished: sent {} of {} messages across {} workers ({} abandoned, {} cancelled), \
         {} send errors, {:.2} msg/s, batch latency p50 {}us p99 {}us",
        summary.total_sent,
        summary.requested,
        summary.workers(),
        summary.abandoned(),
        summary.cancelled(),
        snap.error_count,
        snap.average_rate(),
        snap.latency_us_p50,
        snap.latency_us_p99,
    );
    Ok(summary)
}

/// One worker covering the whole count, on the calling task.
async fn fill_serially(
    config: &FillConfig,
    transport: &dyn Transport,
    ctx: &WorkerContext,
    sink: &mut dyn ProgressSink,
) -> Result<RunSummary> {
    let (tx, rx) = flume::bounded(1);
    if config.total_count == 0 {
        return collect(rx, 0, 0, sink).await;
    }
    let unit = WorkUnit {
        worker_id: 1,
        quota: config.total_count,
    };
    let mut sender = transport
        .create_sender()
        .await
        .context("opening queue sender")?;
    let report = run_worker(unit, sender.as_mut(), ctx).await;
    tx.send(report).context("queueing completion report")?;
    collect(rx, 1, config.total_count, sink).await
}

/// A bounded pool pulls work units from a shared queue; each unit runs one
/// worker with its own sender handle.
async fn fill_concurrently(
    config: &FillConfig,
    transport: Arc<dyn Transport>,
    ctx: &Arc<WorkerContext>,
    sink: &mut dyn ProgressSink,
) -> Result<RunSummary> {
    let units = plan(config.total_count, config.per_worker_interval);
    let expected = units.len();
    let pool_size = config.concurrency.get().min(expected);
    info!(workers = expected, pool_size, "scheduling work units");

    let (unit_tx, unit_rx) = flume::unbounded::<WorkUnit>();
    for unit in units {
        unit_tx.send(unit).context("queueing work unit")?;
    }
    drop(unit_tx);

    // Sized so a report never waits on the aggregator.
    let (report_tx, report_rx) = flume::bounded::<CompletionReport>(expected.max(1));

    let handles: Vec<JoinHandle<()>> = (0..pool_size)
        .map(|_| {
            let units = unit_rx.clone();
            let reports = report_tx.clone();
            let transport = Arc::clone(&transport);
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                while let Ok(unit) = units.recv_async().await {
                    let report = run_unit(unit, transport.as_ref(), &ctx).await;
                    if reports.send_async(report).await.is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(report_tx);
    drop(unit_rx);

    let summary = collect(report_rx, expected, config.total_count, sink).await;
    if summary.is_err() {
        ctx.cancel.cancel();
    }
    for joined in join_all(handles).await {
        if let Err(e) = joined {
            warn!("fill task ended abnormally: {e}");
        }
    }
    summary
}

async fn run_unit(unit: WorkUnit, transport: &dyn Transport, ctx: &WorkerContext) -> CompletionReport {
    if ctx.cancel.is_cancelled() {
        return CompletionReport::not_started(unit);
    }
    match transport.create_sender().await {
        Ok(mut sender) => run_worker(unit, sender.as_mut(), ctx).await,
        Err(e) => {
            error!(worker_id = unit.worker_id, error = %e, "could not open queue sender");
            CompletionReport {
                worker_id: unit.worker_id,
                quota: unit.quota,
                sent_count: 0,
                outcome: Outcome::Abandoned {
                    error: e.to_string(),
                },
            }
        }
    }
}

fn spawn_snapshot_logger(stats: Arc<Stats>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut timer = interval(Duration::from_secs(interval_secs));
        // first tick fires immediately
        timer.tick().await;
        loop {
            timer.tick().await;
            let snap = stats.snapshot().await;
            info!(
                "Fill stats - Sent: {}, Errors: {}, Rate(avg): {:.2} msg/s, Rate(inst): {:.2} msg/s",
                snap.sent_messages,
                snap.error_count,
                snap.average_rate(),
                snap.interval_rate()
            );
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, FillArgs};
    use crate::output::ProgressEvent;
    use crate::transport::mock::{MockOptions, MockTransport};

    #[derive(Default)]
    struct Recorder(Vec<ProgressEvent>);

    impl ProgressSink for Recorder {
        fn observe(&mut self, event: &ProgressEvent) -> Result<()> {
            self.0.push(event.clone());
            Ok(())
        }
    }

    fn config(count: u64, interval: u64, serial: bool) -> FillConfig {
        FillConfig::resolve(
            FillArgs {
                engine: Some("mock".into()),
                count: Some(count),
                interval: Some(interval),
                serial,
                ..Default::default()
            },
            FileConfig::default(),
        )
        .unwrap()
    }

    async fn fill(cfg: &FillConfig, mock: &MockTransport) -> (RunSummary, Recorder) {
        let mut sink = Recorder::default();
        let summary = run_filler(
            cfg,
            Arc::new(mock.clone()),
            &mut sink,
            CancellationToken::new(),
            0,
        )
        .await
        .unwrap();
        (summary, sink)
    }

    #[tokio::test]
    async fn concurrent_units_each_get_a_sender() {
        let mock = MockTransport::new(MockOptions::default());
        let (summary, sink) = fill(&config(2500, 1000, false), &mock).await;

        assert_eq!(summary.total_sent, 2500);
        assert_eq!(summary.workers(), 3);
        assert_eq!(mock.senders_created(), 3);
        assert_eq!(mock.delivered(), 2500);
        assert_eq!(sink.0.last().unwrap().running_total, 2500);

        let mut quotas: Vec<u64> = summary.reports.iter().map(|r| r.sent_count).collect();
        quotas.sort_unstable();
        assert_eq!(quotas, vec![500, 1000, 1000]);
    }

    #[tokio::test]
    async fn serial_is_one_worker() {
        let mock = MockTransport::new(MockOptions::default());
        let (summary, _) = fill(&config(2500, 1000, true), &mock).await;

        assert_eq!(summary.total_sent, 2500);
        assert_eq!(summary.workers(), 1);
        assert_eq!(mock.senders_created(), 1);
    }

    #[tokio::test]
    async fn zero_count_schedules_nothing() {
        for serial in [true, false] {
            let mock = MockTransport::new(MockOptions::default());
            let (summary, sink) = fill(&config(0, 1000, serial), &mock).await;
            assert_eq!(summary.total_sent, 0);
            assert_eq!(summary.workers(), 0);
            assert!(sink.0.is_empty());
            assert_eq!(mock.send_calls(), 0);
        }
    }

    #[tokio::test]
    async fn pool_is_bounded_by_concurrency() {
        let mock = MockTransport::new(MockOptions::default());
        let mut cfg = config(95, 10, false);
        cfg.concurrency = std::num::NonZeroUsize::new(2).unwrap();
        let (summary, _) = fill(&cfg, &mock).await;

        assert_eq!(summary.workers(), 10);
        assert_eq!(summary.total_sent, 95);
        assert_eq!(mock.duplicate_ids(), 0);
    }

    #[tokio::test]
    async fn cancelled_run_still_reports_every_unit() {
        let mock = MockTransport::new(MockOptions::default());
        let cfg = config(5000, 1000, false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = Recorder::default();
        let summary = run_filler(&cfg, Arc::new(mock.clone()), &mut sink, cancel, 0)
            .await
            .unwrap();

        assert_eq!(summary.workers(), 5);
        assert_eq!(summary.cancelled(), 5);
        assert_eq!(summary.total_sent, 0);
        assert_eq!(mock.send_calls(), 0);
    }
}
