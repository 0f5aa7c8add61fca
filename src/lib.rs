//! Concurrent work-item processing: a priority queue with starvation
//! boosting, sequential and parallel adapters with timeout and retry policy,
//! a reusable worker pool, a resource monitor that can hold back admission,
//! and a per-call network throttler.

pub mod config;
pub mod logging;
pub mod monitor;
pub mod pool;
pub mod queue;
pub mod throttle;

pub use config::{ConfigError, OrchestratorConfig};
pub use monitor::{ResourceMonitor, ResourceMonitorOptions};
pub use pool::{ExecutionContextFactory, WorkerPool, WorkerPoolConfig};
pub use queue::{
    BoxError, ItemStatus, Processor, QueueConfig, QueueCoordinator, QueueError, QueueEvents, QueueResult,
    QueueStatistics, TaskResult, WorkItem,
};
pub use throttle::{NetworkThrottler, ThrottleConfig, ThrottledProcessor};
