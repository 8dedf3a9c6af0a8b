use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::pool::AnalyzerPool;

/// Spawn the autoscaler control loop.
///
/// Each tick fetches the coordinator's queue depth and lets the pool decide.
/// Handled errors (coordinator unreachable, decode failure) are logged and
/// the loop continues.
pub fn spawn_autoscaler(
    pool: Arc<AnalyzerPool>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = pool.autoscaler_config().scale_check_interval();
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "Autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown_rx.changed() => {
                    // A closed channel means the owner is gone; stop either way.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match pool.client().metrics().await {
                Ok(metrics) => {
                    pool.scale_tick(metrics.queue_depth).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to fetch coordinator metrics");
                }
            }
        }

        tracing::info!("Autoscaler stopped");
    })
}
