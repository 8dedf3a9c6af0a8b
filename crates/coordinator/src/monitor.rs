use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::state::QueueState;

/// Spawn the background monitor loop. Runs for the life of the process.
pub fn spawn_monitor(state: Arc<QueueState>) -> JoinHandle<()> {
    let interval = state.config().monitor_interval();

    tokio::spawn(async move {
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            task_timeout_ms = state.config().task_timeout_ms,
            "Monitor loop started"
        );

        loop {
            tokio::time::sleep(interval).await;
            run_tick(&state);
        }
    })
}

/// One monitor tick: requeue expired in-flight tasks, publish queue gauges.
///
/// Split out of the loop so tests can drive ticks directly.
pub fn run_tick(state: &QueueState) {
    let outcome = state.requeue_expired(Utc::now());

    if !outcome.requeued.is_empty() {
        metrics::counter!("coordinator.requeue.count").increment(outcome.requeued.len() as u64);
        tracing::info!(count = outcome.requeued.len(), "Requeued expired tasks");
    }
    if !outcome.exhausted.is_empty() {
        metrics::counter!("coordinator.exhausted.count").increment(outcome.exhausted.len() as u64);
        tracing::warn!(
            count = outcome.exhausted.len(),
            "Dropped tasks that exceeded max retries"
        );
    }

    let snapshot = state.metrics();
    metrics::gauge!("coordinator.queue.depth").set(snapshot.queue_depth as f64);
    metrics::gauge!("coordinator.inflight.count").set(snapshot.in_flight as f64);
    metrics::gauge!("coordinator.backpressure").set(snapshot.backpressure);
}

#[cfg(test)]
mod tests {
    use super::*;
    use logrelay_common::config::CoordinatorConfig;
    use logrelay_common::types::LogRecord;

    #[tokio::test]
    async fn test_monitor_loop_requeues_silent_task() {
        let state = Arc::new(QueueState::new(CoordinatorConfig {
            monitor_interval_ms: 20,
            task_timeout_ms: 60,
            max_retries: 3,
            ..CoordinatorConfig::default()
        }));

        state.submit(LogRecord::new("m", "info", "test"));
        state.assign("silent", 0.4).unwrap();

        let _handle = spawn_monitor(Arc::clone(&state));
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        let stats = state.stats();
        assert_eq!(stats.queue_depth, 1);
        assert_eq!(stats.in_flight, 0);
        assert!(stats.retries >= 1);
    }

    #[tokio::test]
    async fn test_tick_is_quiet_on_fresh_work() {
        let state = QueueState::new(CoordinatorConfig {
            task_timeout_ms: 60_000,
            ..CoordinatorConfig::default()
        });
        state.submit(LogRecord::new("m", "info", "test"));
        state.assign("analyzer-0", 0.4).unwrap();

        run_tick(&state);

        let stats = state.stats();
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.retries, 0);
    }
}
