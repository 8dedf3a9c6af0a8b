use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use logrelay_common::api::coordinator::{StatusUpdate, TaskPayload};
use logrelay_common::config::RuntimeConfig;

use crate::client::CoordinatorClient;

/// Sleep between checks while draining local in-flight work on shutdown.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Source formula: a weight in [0.05, 1.0] maps to 1..=10 concurrent slots.
pub fn max_concurrent(weight: f64) -> usize {
    std::cmp::max(1, (weight * 10.0).floor() as usize)
}

/// The opaque per-task work, returning Err(reason) on failure.
pub type WorkFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type WorkFn = Arc<dyn Fn(TaskPayload) -> WorkFuture + Send + Sync>;

/// Default work: sleep the configured processing delay, succeed.
pub fn delay_work(delay: Duration) -> WorkFn {
    Arc::new(move |_payload| {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
    })
}

/// Live counters for one analyzer, shared between its pull loop, task
/// workers, and pool snapshots.
#[derive(Default)]
pub struct AnalyzerStats {
    pub in_flight: AtomicUsize,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub poll_errors: AtomicU64,
}

/// Point-in-time view of one analyzer.
#[derive(Clone, Debug, Serialize)]
pub struct AnalyzerSnapshot {
    pub id: String,
    pub weight: f64,
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub processed: u64,
    pub failed: u64,
    pub poll_errors: u64,
    pub started_at: DateTime<Utc>,
}

/// Counters preserved after an analyzer is stopped, so pool-level totals
/// survive scale-down and shutdown.
#[derive(Clone, Debug, Serialize)]
pub struct ArchivedAnalyzer {
    pub id: String,
    pub weight: f64,
    pub processed: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
}

/// Handle to a running analyzer: its pull loop plus shared counters.
pub struct AnalyzerHandle {
    id: String,
    weight: f64,
    stats: Arc<AnalyzerStats>,
    started_at: DateTime<Utc>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AnalyzerHandle {
    /// Start an analyzer: spawns the pull loop immediately.
    pub fn spawn(
        id: String,
        weight: f64,
        client: Arc<CoordinatorClient>,
        config: RuntimeConfig,
        work: WorkFn,
    ) -> Self {
        let stats = Arc::new(AnalyzerStats::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(analyzer_loop(
            id.clone(),
            weight,
            client,
            config,
            work,
            Arc::clone(&stats),
            shutdown_rx,
        ));

        tracing::info!(
            analyzer = %id,
            weight,
            slots = max_concurrent(weight),
            "Analyzer started"
        );

        Self {
            id,
            weight,
            stats,
            started_at: Utc::now(),
            shutdown_tx,
            task,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_idle(&self) -> bool {
        self.stats.in_flight.load(Ordering::SeqCst) == 0
    }

    pub fn snapshot(&self) -> AnalyzerSnapshot {
        AnalyzerSnapshot {
            id: self.id.clone(),
            weight: self.weight,
            max_concurrent: max_concurrent(self.weight),
            in_flight: self.stats.in_flight.load(Ordering::SeqCst),
            processed: self.stats.processed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            poll_errors: self.stats.poll_errors.load(Ordering::SeqCst),
            started_at: self.started_at,
        }
    }

    /// Stop pulling new work. In-flight tasks keep running until drained.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the pull loop to drain and exit, then archive the counters.
    pub async fn join(self) -> ArchivedAnalyzer {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;

        ArchivedAnalyzer {
            id: self.id,
            weight: self.weight,
            processed: self.stats.processed.load(Ordering::SeqCst),
            failed: self.stats.failed.load(Ordering::SeqCst),
            started_at: self.started_at,
            stopped_at: Utc::now(),
        }
    }
}

/// The pull loop. Single logical thread per analyzer: it alone decides when
/// to call get_work, so the concurrency cap is enforced without locking.
async fn analyzer_loop(
    id: String,
    weight: f64,
    client: Arc<CoordinatorClient>,
    config: RuntimeConfig,
    work: WorkFn,
    stats: Arc<AnalyzerStats>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let slots = max_concurrent(weight);
    let poll_interval = config.poll_interval();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let current = stats.in_flight.load(Ordering::SeqCst);
        if current >= slots {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        match client.get_work(&id, weight, current as u32).await {
            Ok(Some(payload)) => {
                stats.in_flight.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(run_task(
                    Arc::clone(&client),
                    id.clone(),
                    payload,
                    config.heartbeat_interval(),
                    work.clone(),
                    Arc::clone(&stats),
                ));
                // A free slot pulls again immediately, no sleep.
            }
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                stats.poll_errors.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(analyzer = %id, error = %e, "get_work failed, backing off");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    // Graceful stop: no new pulls, drain what is already running.
    while stats.in_flight.load(Ordering::SeqCst) > 0 {
        tokio::time::sleep(DRAIN_POLL).await;
    }

    tracing::info!(analyzer = %id, "Analyzer stopped");
}

/// One task execution: initial heartbeat, work with periodic heartbeat
/// refresh, terminal report.
async fn run_task(
    client: Arc<CoordinatorClient>,
    analyzer_id: String,
    payload: TaskPayload,
    heartbeat_interval: Duration,
    work: WorkFn,
    stats: Arc<AnalyzerStats>,
) {
    let task_id = payload.task_id;

    if let Err(e) = client
        .report_status(&analyzer_id, task_id, StatusUpdate::InProgress, None)
        .await
    {
        tracing::warn!(analyzer = %analyzer_id, task_id = %task_id, error = %e, "Initial heartbeat failed");
    }

    let mut work_future = (work)(payload);

    let result = loop {
        tokio::select! {
            result = &mut work_future => break result,
            _ = tokio::time::sleep(heartbeat_interval) => {
                // Work is outliving the heartbeat interval; refresh so the
                // monitor does not requeue a live task.
                if let Err(e) = client
                    .report_status(&analyzer_id, task_id, StatusUpdate::InProgress, None)
                    .await
                {
                    tracing::warn!(analyzer = %analyzer_id, task_id = %task_id, error = %e, "Heartbeat refresh failed");
                }
            }
        }
    };

    match result {
        Ok(()) => {
            // Local counters track work actually performed here, even when
            // the coordinator has since requeued the task.
            stats.processed.fetch_add(1, Ordering::SeqCst);
            metrics::counter!("analyzer.tasks.completed").increment(1);
            if let Err(e) = client
                .report_status(&analyzer_id, task_id, StatusUpdate::Completed, None)
                .await
            {
                tracing::warn!(
                    analyzer = %analyzer_id,
                    task_id = %task_id,
                    error = %e,
                    "Completion report failed; the task will time out and requeue"
                );
            }
        }
        Err(reason) => {
            stats.failed.fetch_add(1, Ordering::SeqCst);
            metrics::counter!("analyzer.tasks.failed").increment(1);
            tracing::warn!(analyzer = %analyzer_id, task_id = %task_id, reason = %reason, "Task work failed");
            if let Err(e) = client
                .report_status(&analyzer_id, task_id, StatusUpdate::Failed, Some(&reason))
                .await
            {
                tracing::warn!(analyzer = %analyzer_id, task_id = %task_id, error = %e, "Failure report failed");
            }
        }
    }

    stats.in_flight.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_to_slots_formula() {
        assert_eq!(max_concurrent(0.05), 1);
        assert_eq!(max_concurrent(0.1), 1);
        assert_eq!(max_concurrent(0.19), 1);
        assert_eq!(max_concurrent(0.2), 2);
        assert_eq!(max_concurrent(0.25), 2);
        assert_eq!(max_concurrent(0.4), 4);
        assert_eq!(max_concurrent(0.5), 5);
        assert_eq!(max_concurrent(1.0), 10);
    }

    #[tokio::test]
    async fn test_analyzer_survives_unreachable_coordinator() {
        // Nothing listens here; every pull errors and the loop backs off.
        let client = Arc::new(CoordinatorClient::new("http://127.0.0.1:9").unwrap());
        let config = RuntimeConfig {
            poll_interval_ms: 10,
            ..RuntimeConfig::default()
        };

        let handle = AnalyzerHandle::spawn(
            "analyzer-err".into(),
            0.4,
            client,
            config,
            delay_work(Duration::from_millis(1)),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let archived = handle.join().await;

        assert_eq!(archived.processed, 0);
        assert_eq!(archived.failed, 0);
    }
}
