use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex;

use logrelay_common::config::{AutoscalerConfig, PoolConfig, RuntimeConfig};

use crate::client::CoordinatorClient;
use crate::runtime::{
    delay_work, AnalyzerHandle, AnalyzerSnapshot, ArchivedAnalyzer, WorkFn,
};

/// Result of one autoscaler decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleAction {
    None,
    Up(u32),
    Down(u32),
}

/// Pool-level counter snapshot. Totals span current and archived analyzers,
/// so throughput summaries survive scale-down and shutdown.
#[derive(Clone, Debug, Serialize)]
pub struct PoolStats {
    pub size: usize,
    pub archived: usize,
    pub processed: u64,
    pub failed: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub analyzers: Vec<AnalyzerSnapshot>,
}

struct PoolInner {
    analyzers: Vec<AnalyzerHandle>,
    archived: Vec<ArchivedAnalyzer>,
    /// Monotonic counter for analyzer names; never reused.
    next_index: usize,
    last_action: Option<Instant>,
    scale_ups: u64,
    scale_downs: u64,
}

/// Owns the set of analyzers and the scaling decision.
///
/// The inner lock is a tokio Mutex: stop paths hold it across joins, which
/// in turn wait on draining task work.
pub struct AnalyzerPool {
    inner: Mutex<PoolInner>,
    client: Arc<CoordinatorClient>,
    runtime: RuntimeConfig,
    autoscaler: AutoscalerConfig,
    work: WorkFn,
}

impl AnalyzerPool {
    pub fn new(
        client: Arc<CoordinatorClient>,
        runtime: RuntimeConfig,
        autoscaler: AutoscalerConfig,
    ) -> Self {
        let work = delay_work(runtime.processing_delay());
        Self::with_work(client, runtime, autoscaler, work)
    }

    /// Construct with explicit task work. Test seam for failure injection.
    pub fn with_work(
        client: Arc<CoordinatorClient>,
        runtime: RuntimeConfig,
        autoscaler: AutoscalerConfig,
        work: WorkFn,
    ) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                analyzers: Vec::new(),
                archived: Vec::new(),
                next_index: 0,
                last_action: None,
                scale_ups: 0,
                scale_downs: 0,
            }),
            client,
            runtime,
            autoscaler,
            work,
        }
    }

    pub fn client(&self) -> &Arc<CoordinatorClient> {
        &self.client
    }

    pub fn autoscaler_config(&self) -> &AutoscalerConfig {
        &self.autoscaler
    }

    /// Start the initial analyzers with weights from the pool config.
    pub async fn start(&self, config: &PoolConfig) {
        let mut inner = self.inner.lock().await;
        for i in 0..config.initial_size as usize {
            self.spawn_into(&mut inner, config.weight_for(i));
        }
        metrics::gauge!("analyzer.pool.size").set(inner.analyzers.len() as f64);
        tracing::info!(size = inner.analyzers.len(), "Analyzer pool started");
    }

    fn spawn_into(&self, inner: &mut PoolInner, weight: f64) {
        let id = format!("analyzer-{}", inner.next_index);
        inner.next_index += 1;

        let handle = AnalyzerHandle::spawn(
            id,
            weight,
            Arc::clone(&self.client),
            self.runtime.clone(),
            self.work.clone(),
        );
        inner.analyzers.push(handle);
    }

    /// Stop every analyzer gracefully and archive its counters.
    pub async fn stop(&self) {
        let handles: Vec<AnalyzerHandle> = {
            let mut inner = self.inner.lock().await;
            inner.analyzers.drain(..).collect()
        };

        // Signal first so all analyzers drain concurrently.
        for handle in &handles {
            handle.signal_shutdown();
        }

        let mut archived = Vec::with_capacity(handles.len());
        for handle in handles {
            archived.push(handle.join().await);
        }

        let mut inner = self.inner.lock().await;
        inner.archived.extend(archived);
        metrics::gauge!("analyzer.pool.size").set(0.0);
        tracing::info!(archived = inner.archived.len(), "Analyzer pool stopped");
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.analyzers.len()
    }

    /// Complete when every analyzer's local in-flight set is empty.
    pub async fn wait_for_idle(&self) {
        loop {
            let idle = {
                let inner = self.inner.lock().await;
                inner.analyzers.iter().all(|a| a.is_idle())
            };
            if idle {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;

        let snapshots: Vec<AnalyzerSnapshot> =
            inner.analyzers.iter().map(|a| a.snapshot()).collect();
        let processed = snapshots.iter().map(|s| s.processed).sum::<u64>()
            + inner.archived.iter().map(|a| a.processed).sum::<u64>();
        let failed = snapshots.iter().map(|s| s.failed).sum::<u64>()
            + inner.archived.iter().map(|a| a.failed).sum::<u64>();

        PoolStats {
            size: inner.analyzers.len(),
            archived: inner.archived.len(),
            processed,
            failed,
            scale_ups: inner.scale_ups,
            scale_downs: inner.scale_downs,
            analyzers: snapshots,
        }
    }

    /// Fraction of processed work per analyzer id, over current + archived.
    pub async fn distribution(&self) -> BTreeMap<String, f64> {
        let inner = self.inner.lock().await;

        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for handle in &inner.analyzers {
            let snapshot = handle.snapshot();
            *counts.entry(snapshot.id).or_default() += snapshot.processed;
        }
        for archived in &inner.archived {
            *counts.entry(archived.id.clone()).or_default() += archived.processed;
        }

        let total: u64 = counts.values().sum();
        if total == 0 {
            return BTreeMap::new();
        }
        counts
            .into_iter()
            .map(|(id, n)| (id, n as f64 / total as f64))
            .collect()
    }

    /// One autoscaler decision against the observed backlog depth.
    ///
    /// Holds the pool lock only for the decision and spawning; draining
    /// removed analyzers happens after release so a slow task cannot stall
    /// pool queries.
    pub async fn scale_tick(&self, queue_depth: u64) -> ScaleAction {
        let config = &self.autoscaler;
        let mut inner = self.inner.lock().await;

        if let Some(last) = inner.last_action {
            if last.elapsed() < config.cooldown() {
                return ScaleAction::None;
            }
        }

        let size = inner.analyzers.len() as u32;

        if queue_depth >= config.scale_up_threshold && size < config.max_size {
            let add = config.scale_up_step.min(config.max_size - size);
            for _ in 0..add {
                self.spawn_into(&mut inner, config.scale_out_weight);
            }
            inner.last_action = Some(Instant::now());
            inner.scale_ups += 1;

            metrics::counter!("autoscaler.scale_ups").increment(1);
            metrics::gauge!("analyzer.pool.size").set(inner.analyzers.len() as f64);
            tracing::info!(
                queue_depth,
                added = add,
                size = inner.analyzers.len(),
                "Scaled up"
            );
            return ScaleAction::Up(add);
        }

        if queue_depth <= config.scale_down_threshold && size > config.min_size {
            let remove = config.scale_down_step.min(size - config.min_size);

            // LIFO: the most recently added analyzers go first, keeping
            // long-lived ones undisturbed.
            let mut removed = Vec::with_capacity(remove as usize);
            for _ in 0..remove {
                if let Some(handle) = inner.analyzers.pop() {
                    handle.signal_shutdown();
                    removed.push(handle);
                }
            }
            inner.last_action = Some(Instant::now());
            inner.scale_downs += 1;

            metrics::counter!("autoscaler.scale_downs").increment(1);
            metrics::gauge!("analyzer.pool.size").set(inner.analyzers.len() as f64);
            tracing::info!(
                queue_depth,
                removed = remove,
                size = inner.analyzers.len(),
                "Scaling down"
            );
            drop(inner);

            let mut archived = Vec::with_capacity(removed.len());
            for handle in removed {
                archived.push(handle.join().await);
            }
            let mut inner = self.inner.lock().await;
            inner.archived.extend(archived);
            return ScaleAction::Down(remove);
        }

        ScaleAction::None
    }
}
