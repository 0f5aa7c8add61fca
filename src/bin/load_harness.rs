//! Synthetic load run through the full stack: coordinator, resource gate,
//! throttled processor. Usage: `load_harness [config.toml] [items]`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audit_queue::logging::init_dual_logging;
use audit_queue::queue::{PriorityPattern, QueueCoordinator, QueueEvents, QueueStatistics, WorkItem};
use audit_queue::{BoxError, NetworkThrottler, OrchestratorConfig, Processor, ResourceMonitor, ThrottledProcessor};

struct ProgressPrinter {
    updates: AtomicU64,
}

impl QueueEvents<String, usize> for ProgressPrinter {
    fn on_item_failed(&self, item: &WorkItem<String, usize>) {
        println!("❌ {} failed: {}", item.payload, item.last_error.as_deref().unwrap_or("unknown"));
    }

    fn on_progress_update(&self, statistics: &QueueStatistics) {
        // every tenth update keeps the console readable
        if self.updates.fetch_add(1, Ordering::Relaxed) % 10 == 0 {
            println!(
                "📊 {:.0}% done, {:.1} items/sec, eta {:?}ms",
                statistics.progress_percent, statistics.throughput_per_sec, statistics.estimated_time_remaining_ms
            );
        }
    }

    fn on_error(&self, message: &str) {
        println!("💥 {}", message);
    }
}

/// Pretend page visit: latency and failures derive from the url so runs repeat
async fn simulated_visit(url: String) -> Result<usize, BoxError> {
    let seed = url.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    tokio::time::sleep(Duration::from_millis(5 + seed % 20)).await;
    if seed % 13 == 0 {
        return Err(format!("simulated failure for {}", url).into());
    }
    Ok(url.len())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let mut config = OrchestratorConfig::default();
    let mut items = 100usize;
    for arg in std::env::args().skip(1) {
        if arg.ends_with(".toml") {
            config = OrchestratorConfig::from_toml(&arg)?;
        } else if let Ok(count) = arg.parse() {
            items = count;
        }
    }
    if config.queue.priority_patterns.is_empty() {
        config.queue.priority_patterns.push(PriorityPattern {
            pattern: "/checkout/".to_string(),
            priority: 10,
        });
    }

    let _log_guard = init_dual_logging(&config.logging)?;

    println!("🎯 Load harness: {} items, {} slots", items, config.queue.max_concurrent);
    println!("================================================================");

    let monitor = Arc::new(ResourceMonitor::new(config.monitor.clone()));
    monitor.start();

    let throttler = Arc::new(NetworkThrottler::new(config.throttle.clone()).with_monitor(monitor.clone()));
    let coordinator: QueueCoordinator<String, usize> = QueueCoordinator::builder(config.queue.clone())
        .priority_queue(config.priority_queue.clone())
        .events(Arc::new(ProgressPrinter {
            updates: AtomicU64::new(0),
        }))
        .with_resource_monitor(monitor.clone())
        .build()?;

    let urls = (0..items)
        .map(|i| match i % 4 {
            0 => format!("https://shop.example.com/checkout/{}", i),
            1 => format!("https://shop.example.com/product/{}", i),
            _ => format!("https://blog.example.com/post/{}", i),
        })
        .collect();
    coordinator.enqueue_keyed(urls)?;

    let inner: Arc<dyn Processor<String, usize>> = Arc::new(simulated_visit);
    let processor = Arc::new(ThrottledProcessor::new(inner, throttler.clone()));
    let result = coordinator.process(processor).await?;
    monitor.stop();

    let stats = &result.statistics;
    println!("\n🏁 Finished in {:?}", result.duration);
    println!("  Completed: {}", result.completed.len());
    println!("  Failed:    {}", result.failed.len());
    println!("  Avg wait:  {:.1}ms", stats.average_wait_time_ms);
    println!("  Avg run:   {:.1}ms", stats.average_processing_time_ms);

    let throttle = throttler.get_stats();
    println!(
        "🚦 Throttler: {} requests, {:.1}% success, avg {:.1}ms",
        throttle.total_requests,
        throttle.success_rate * 100.0,
        throttle.average_response_time_ms
    );
    if let Some(usage) = monitor.get_average_usage() {
        println!(
            "📈 Resources: {:.1}% memory, {:.1}% cpu over {} samples ({} alerts)",
            usage.memory_usage,
            usage.cpu_usage,
            usage.samples,
            monitor.get_alerts().len()
        );
    }

    Ok(())
}
