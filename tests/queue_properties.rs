mod fixtures;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use audit_queue::monitor::{ResourceMonitor, ResourceMonitorOptions, ResourceSample};
use audit_queue::pool::{PoolError, WorkerPool, WorkerPoolConfig};
use audit_queue::queue::{PriorityQueue, PriorityQueueConfig};
use audit_queue::throttle::{NetworkThrottler, ThrottleConfig};
use audit_queue::{BoxError, ItemStatus, OrchestratorConfig, QueueConfig, QueueCoordinator};

use fixtures::{ConcurrencyGauge, FakeBrowserFactory, RecordingProcessor, RejectingProcessor, SlowProcessor};

const ALL_STATUSES: [ItemStatus; 5] = [
    ItemStatus::Pending,
    ItemStatus::Processing,
    ItemStatus::Completed,
    ItemStatus::Failed,
    ItemStatus::Retrying,
];

fn quiet_config(max_concurrent: usize) -> QueueConfig {
    QueueConfig {
        max_concurrent,
        enable_progress_reporting: false,
        ..Default::default()
    }
}

#[test]
fn test_items_are_never_lost_or_duplicated() {
    let mut queue: PriorityQueue<u32, u32> = PriorityQueue::new(PriorityQueueConfig::default());
    let mut enqueued = HashSet::new();
    let mut removed = HashSet::new();

    for round in 0..40u32 {
        let id = queue.enqueue(round, Some((round % 5) as i32), None).unwrap();
        enqueued.insert(id);

        match round % 4 {
            0 => {
                if let Some(item) = queue.dequeue() {
                    queue.complete(&item.id, item.payload).unwrap();
                }
            }
            1 => {
                if let Some(item) = queue.dequeue() {
                    queue.fail(&item.id, "boom").unwrap();
                }
            }
            2 => {
                let _ = queue.dequeue();
            }
            _ => {
                if let Some(id) = queue.eligible_ids().first().cloned() {
                    queue.remove(&id).unwrap();
                    removed.insert(id);
                }
            }
        }

        let mut seen = HashSet::new();
        let mut counted = 0;
        for status in ALL_STATUSES {
            let ids = queue.ids_with_status(status);
            counted += ids.len();
            seen.extend(ids);
        }
        assert_eq!(counted, seen.len(), "an id appeared in two status buckets");

        let expected: HashSet<_> = enqueued.difference(&removed).cloned().collect();
        assert_eq!(seen, expected);
        assert_eq!(queue.total_enqueued() - queue.total_removed(), counted as u64);
    }
}

#[tokio::test]
async fn test_sequential_processing_follows_priority() {
    let coordinator: QueueCoordinator<u32, u32> = QueueCoordinator::new(quiet_config(1)).unwrap();
    for priority in [3, 1, 2] {
        coordinator.enqueue(vec![priority as u32], Some(priority)).unwrap();
    }

    let processor = Arc::new(RecordingProcessor::default());
    let result = coordinator.process(processor.clone()).await.unwrap();

    assert!(result.is_success());
    assert_eq!(*processor.seen.lock(), vec![3, 2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_waits_between_attempts() {
    let config = QueueConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(250),
        ..quiet_config(1)
    };
    let coordinator: QueueCoordinator<u32, u32> = QueueCoordinator::new(config).unwrap();
    coordinator.enqueue(vec![7], None).unwrap();

    let processor = Arc::new(RejectingProcessor::default());
    let result = coordinator.process(processor.clone()).await.unwrap();

    assert!(result.completed.is_empty());
    assert_eq!(result.failed.len(), 1);
    let item = &result.failed[0];
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempts, 3);
    assert_eq!(item.last_error.as_deref(), Some("page 7 unreachable"));

    let attempts = processor.attempts.lock().clone();
    assert_eq!(attempts.len(), 3);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(250));
    }
}

#[tokio::test(start_paused = true)]
async fn test_parallel_run_is_bounded_and_faster_than_serial() {
    let coordinator: QueueCoordinator<u32, u32> = QueueCoordinator::new(quiet_config(2)).unwrap();
    coordinator.enqueue((0..5).collect(), None).unwrap();

    let gauge = Arc::new(ConcurrencyGauge::default());
    let processor = Arc::new(SlowProcessor {
        delay: Duration::from_millis(40),
        gauge: gauge.clone(),
    });

    let started = tokio::time::Instant::now();
    let result = coordinator.process(processor).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(result.completed.len(), 5);
    assert_eq!(gauge.peak(), 2);
    assert!(elapsed < Duration::from_millis(5 * 40), "took {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_starved_item_overtakes_newer_urgent_item() {
    let mut queue: PriorityQueue<&str, ()> = PriorityQueue::new(PriorityQueueConfig {
        starvation_threshold: Duration::from_secs(1),
        starvation_boost: 5,
        ..Default::default()
    });

    let old = queue.enqueue("old-low", Some(0), None).unwrap();
    tokio::time::advance(Duration::from_millis(1100)).await;
    queue.enqueue("new-high", Some(3), None).unwrap();

    let first = queue.dequeue().unwrap();
    assert_eq!(first.id, old);
    assert_eq!(first.priority, 5);
    assert_eq!(queue.dequeue().unwrap().payload, "new-high");
}

#[tokio::test]
async fn test_failed_and_panicking_tasks_release_their_worker() {
    let factory = FakeBrowserFactory::default();
    let counters = factory.counters.clone();
    let pool = Arc::new(WorkerPool::new(
        factory,
        WorkerPoolConfig {
            pool_size: 2,
            ..Default::default()
        },
    ));
    pool.initialize().await.unwrap();
    assert_eq!(pool.idle_count(), 2);

    let result = pool
        .execute_task(
            |_worker| async move { Err::<(), BoxError>("page crashed".into()) },
            Some("crashing-audit"),
        )
        .await;
    assert!(matches!(result, Err(PoolError::Task(message)) if message == "page crashed"));
    assert_eq!(pool.idle_count(), 2);

    let panicking = pool.clone();
    let joined = tokio::spawn(async move {
        panicking
            .execute_task(
                |_worker| async move {
                    if true {
                        panic!("renderer died");
                    }
                    Ok::<(), BoxError>(())
                },
                None,
            )
            .await
    })
    .await;
    assert!(joined.unwrap_err().is_panic());
    assert_eq!(pool.idle_count(), 2);

    pool.cleanup().await;
    assert_eq!(counters.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(counters.tabs_opened.load(Ordering::SeqCst), 2);
    assert_eq!(counters.tabs_closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_throttler_caps_concurrent_calls() {
    let throttler = NetworkThrottler::new(ThrottleConfig {
        requests_per_second: 1000,
        requests_per_minute: 10_000,
        concurrent_requests: 3,
        delay_between_requests: Duration::ZERO,
        burst_limit: 1000,
        ..Default::default()
    });
    let gauge = Arc::new(ConcurrencyGauge::default());

    let calls = (0..10).map(|i| {
        let gauge = gauge.clone();
        let throttler = &throttler;
        async move {
            let url = format!("https://example.com/{}", i);
            throttler
                .throttle_request(
                    || {
                        let gauge = gauge.clone();
                        async move {
                            gauge.enter();
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            gauge.exit();
                            Ok::<_, BoxError>(i)
                        }
                    },
                    &url,
                    "GET",
                    0,
                    0,
                )
                .await
        }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert!(gauge.peak() <= 3, "peak was {}", gauge.peak());
    assert_eq!(throttler.get_stats().successful_requests, 10);
}

#[test]
fn test_resource_threshold_follows_latest_sample() {
    let monitor = ResourceMonitor::new(ResourceMonitorOptions::default());
    assert!(!monitor.should_throttle());

    monitor.record_sample(ResourceSample::new(95.0, 20.0, 3, 1.0));
    assert!(monitor.should_throttle());

    monitor.record_sample(ResourceSample::new(40.0, 20.0, 3, 1.0));
    assert!(!monitor.should_throttle());

    monitor.record_sample(ResourceSample::new(40.0, 20.0, 150, 1.0));
    assert!(monitor.should_throttle());
}

#[tokio::test]
async fn test_toml_config_drives_a_full_run() {
    let config = OrchestratorConfig::from_toml_str(
        r#"
        [queue]
        max_concurrent = 3
        max_retries = 1
        enable_progress_reporting = false
        priority_patterns = [
            { pattern = "checkout", priority = 10 },
        ]
        "#,
    )
    .unwrap();

    let coordinator: QueueCoordinator<String, usize> = QueueCoordinator::builder(config.queue.clone())
        .priority_queue(config.priority_queue.clone())
        .build()
        .unwrap();
    let ids = coordinator
        .enqueue_keyed(vec!["/blog".to_string(), "/checkout/pay".to_string()])
        .unwrap();
    assert_eq!(coordinator.get_item(&ids[1]).unwrap().priority, 10);

    let result = coordinator
        .process(Arc::new(|url: String| async move { Ok::<_, BoxError>(url.len()) }))
        .await
        .unwrap();
    assert_eq!(result.completed.len(), 2);
    assert_eq!(result.statistics.completed, 2);
}
