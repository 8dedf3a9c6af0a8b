//! End-to-end scenarios: an in-process coordinator served over real HTTP on
//! an ephemeral port, driven by the analyzer client and pool with short
//! timing knobs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use logrelay_analyzer::client::CoordinatorClient;
use logrelay_analyzer::pool::AnalyzerPool;
use logrelay_analyzer::runtime::WorkFn;
use logrelay_common::api::coordinator::{StatusUpdate, TaskPayload};
use logrelay_common::config::{AutoscalerConfig, CoordinatorConfig, PoolConfig, RuntimeConfig, WeightSpec};
use logrelay_common::types::LogRecord;
use logrelay_coordinator::QueueState;

async fn start_coordinator(config: CoordinatorConfig) -> (String, Arc<QueueState>) {
    let state = Arc::new(QueueState::new(config));

    let app = logrelay_coordinator::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    logrelay_coordinator::monitor::spawn_monitor(Arc::clone(&state));

    (format!("http://{}", addr), state)
}

/// Poll `check` until it passes or `timeout` elapses.
async fn wait_for<F: Fn() -> bool>(timeout: Duration, what: &str, check: F) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Pull as `consumer_id` until the coordinator hands out a task.
async fn pull_until_assigned(
    client: &CoordinatorClient,
    consumer_id: &str,
    timeout: Duration,
) -> TaskPayload {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(payload) = client.get_work(consumer_id, 0.5, 0).await.unwrap() {
            return payload;
        }
        assert!(
            Instant::now() < deadline,
            "no work assigned to {} in time",
            consumer_id
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn record(message: &str) -> LogRecord {
    LogRecord::new(message, "info", "integration")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_happy_path_completes_all_work() {
    let (url, state) = start_coordinator(CoordinatorConfig {
        monitor_interval_ms: 1000,
        task_timeout_ms: 60_000,
        ..CoordinatorConfig::default()
    })
    .await;

    let client = Arc::new(CoordinatorClient::new(&url).unwrap());
    for i in 0..100 {
        client.submit(&record(&format!("record-{}", i))).await.unwrap();
    }

    let runtime = RuntimeConfig {
        coordinator_url: url,
        poll_interval_ms: 20,
        heartbeat_interval_ms: 1000,
        processing_delay_ms: 5,
    };
    let pool = Arc::new(AnalyzerPool::new(
        Arc::clone(&client),
        runtime,
        AutoscalerConfig::default(),
    ));
    // Default weight cycle: [0.4, 0.3, 0.2, 0.1].
    pool.start(&PoolConfig {
        initial_size: 4,
        weights: None,
    })
    .await;

    wait_for(Duration::from_secs(30), "all tasks completed", || {
        state.stats().completed == 100
    })
    .await;
    pool.wait_for_idle().await;

    let stats = state.stats();
    assert_eq!(stats.completed, 100);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.submitted, 100);

    // No requeues happened, so local pool counters match exactly and every
    // analyzer got a share.
    let pool_stats = pool.stats().await;
    assert_eq!(pool_stats.processed, 100);
    for analyzer in &pool_stats.analyzers {
        assert!(
            analyzer.processed > 0,
            "{} processed nothing",
            analyzer.id
        );
    }

    let distribution = pool.distribution().await;
    let total: f64 = distribution.values().sum();
    assert!((total - 1.0).abs() < 1e-9);

    pool.stop().await;
    assert_eq!(pool.stats().await.processed, 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_silent_consumer_requeues_to_head() {
    let (url, state) = start_coordinator(CoordinatorConfig {
        monitor_interval_ms: 50,
        task_timeout_ms: 250,
        max_retries: 3,
        ..CoordinatorConfig::default()
    })
    .await;
    let client = CoordinatorClient::new(&url).unwrap();

    let submitted = client.submit(&record("orphan")).await.unwrap();

    let payload = pull_until_assigned(&client, "silent-consumer", Duration::from_secs(2)).await;
    assert_eq!(payload.task_id, submitted);

    // The assignee never heartbeats; the monitor requeues.
    wait_for(Duration::from_secs(5), "timeout requeue", || {
        let stats = state.stats();
        stats.retries >= 1 && stats.queue_depth == 1
    })
    .await;

    // Same task, same payload, handed to the next puller.
    let retry = pull_until_assigned(&client, "rescuer", Duration::from_secs(2)).await;
    assert_eq!(retry.task_id, submitted);
    assert_eq!(retry.record.message, "orphan");

    client
        .report_status("rescuer", submitted, StatusUpdate::Completed, None)
        .await
        .unwrap();

    let stats = state.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.in_flight, 0);
    assert!(stats.retries >= 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_max_retries_exhausts_to_failed() {
    let (url, state) = start_coordinator(CoordinatorConfig {
        monitor_interval_ms: 25,
        task_timeout_ms: 100,
        max_retries: 2,
        ..CoordinatorConfig::default()
    })
    .await;
    let client = CoordinatorClient::new(&url).unwrap();

    let submitted = client.submit(&record("doomed")).await.unwrap();

    // max_retries + 1 assignments, all silent.
    for round in 0..3 {
        let payload = pull_until_assigned(
            &client,
            &format!("silent-{}", round),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(payload.task_id, submitted);
    }

    wait_for(Duration::from_secs(5), "retry exhaustion", || {
        state.stats().failed == 1
    })
    .await;

    let stats = state.stats();
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.recent_failures.len(), 1);
    assert_eq!(stats.recent_failures[0].reason, "max retries exceeded");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_terminal_report_is_idempotent() {
    let (url, state) = start_coordinator(CoordinatorConfig {
        task_timeout_ms: 60_000,
        ..CoordinatorConfig::default()
    })
    .await;
    let client = CoordinatorClient::new(&url).unwrap();

    let submitted = client.submit(&record("once")).await.unwrap();
    let payload = pull_until_assigned(&client, "analyzer-0", Duration::from_secs(2)).await;
    assert_eq!(payload.task_id, submitted);

    for _ in 0..2 {
        client
            .report_status("analyzer-0", submitted, StatusUpdate::Completed, None)
            .await
            .unwrap();
    }

    let stats = state.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.per_consumer["analyzer-0"].processed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_work_is_reported_not_retried() {
    let (url, state) = start_coordinator(CoordinatorConfig {
        task_timeout_ms: 60_000,
        ..CoordinatorConfig::default()
    })
    .await;
    let client = Arc::new(CoordinatorClient::new(&url).unwrap());

    for message in ["good-1", "good-2", "bad", "good-3"] {
        client.submit(&record(message)).await.unwrap();
    }

    // Work that rejects one specific record.
    let work: WorkFn = Arc::new(|payload: TaskPayload| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if payload.record.message == "bad" {
                Err("synthetic parse failure".to_string())
            } else {
                Ok(())
            }
        })
    });

    let runtime = RuntimeConfig {
        coordinator_url: url,
        poll_interval_ms: 20,
        heartbeat_interval_ms: 1000,
        processing_delay_ms: 5,
    };
    let pool = Arc::new(AnalyzerPool::with_work(
        Arc::clone(&client),
        runtime,
        AutoscalerConfig::default(),
        work,
    ));
    pool.start(&PoolConfig {
        initial_size: 2,
        weights: Some(WeightSpec::Uniform(0.3)),
    })
    .await;

    wait_for(Duration::from_secs(10), "terminal states", || {
        let stats = state.stats();
        stats.completed == 3 && stats.failed == 1
    })
    .await;

    let stats = state.stats();
    // A failed report is terminal: no retry happened.
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.recent_failures.len(), 1);
    assert_eq!(stats.recent_failures[0].reason, "synthetic parse failure");

    pool.stop().await;
    let pool_stats = pool.stats().await;
    assert_eq!(pool_stats.processed, 3);
    assert_eq!(pool_stats.failed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_autoscaler_grows_then_shrinks_to_min() {
    let (url, state) = start_coordinator(CoordinatorConfig {
        monitor_interval_ms: 1000,
        task_timeout_ms: 60_000,
        ..CoordinatorConfig::default()
    })
    .await;
    let client = Arc::new(CoordinatorClient::new(&url).unwrap());

    // Build a deep backlog before any analyzer starts.
    for i in 0..300 {
        client.submit(&record(&format!("burst-{}", i))).await.unwrap();
    }

    let runtime = RuntimeConfig {
        coordinator_url: url,
        poll_interval_ms: 20,
        heartbeat_interval_ms: 1000,
        processing_delay_ms: 100,
    };
    let autoscaler_config = AutoscalerConfig {
        min_size: 1,
        max_size: 6,
        scale_up_threshold: 20,
        scale_down_threshold: 2,
        scale_up_step: 2,
        scale_down_step: 2,
        cooldown_ms: 200,
        scale_check_interval_ms: 50,
        scale_out_weight: 0.5,
    };
    let pool = Arc::new(AnalyzerPool::new(
        Arc::clone(&client),
        runtime,
        autoscaler_config,
    ));
    pool.start(&PoolConfig {
        initial_size: 2,
        weights: Some(WeightSpec::Uniform(0.2)),
    })
    .await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let autoscaler =
        logrelay_analyzer::autoscaler::spawn_autoscaler(Arc::clone(&pool), shutdown_rx);

    // Backlog far above the threshold: the pool climbs to max, one step per
    // cooldown (2 -> 4 -> 6).
    let deadline = Instant::now() + Duration::from_secs(15);
    while pool.size().await < 6 {
        assert!(Instant::now() < deadline, "pool never reached max size");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(pool.size().await, 6);

    wait_for(Duration::from_secs(60), "backlog drained", || {
        state.stats().completed == 300
    })
    .await;

    // Empty backlog: the pool shrinks back down and stops at min_size.
    let deadline = Instant::now() + Duration::from_secs(15);
    while pool.size().await > 1 {
        assert!(Instant::now() < deadline, "pool never shrank to min size");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pool.size().await, 1);

    let pool_stats = pool.stats().await;
    assert!(pool_stats.scale_ups >= 2, "expected at least two scale-ups");
    assert!(pool_stats.scale_downs >= 3, "expected at least three scale-downs");
    // Counters from scaled-down analyzers survive in the archive.
    assert_eq!(pool_stats.processed, 300);

    let _ = shutdown_tx.send(true);
    let _ = autoscaler.await;
    pool.stop().await;
    assert_eq!(pool.stats().await.processed, 300);
}
