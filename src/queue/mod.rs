pub mod adapter;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod parallel;
pub mod priority_queue;
pub mod processor;
pub mod sequential;
pub mod types;

pub use adapter::{AdapterOptions, AdmissionGate, QueueAdapter};
pub use coordinator::{AdapterKind, CoordinatorBuilder, QueueCoordinator};
pub use errors::QueueError;
pub use events::{NoopEvents, QueueEvents};
pub use metrics::{QueueMetrics, QueueMetricsData};
pub use parallel::ParallelQueue;
pub use priority_queue::{PriorityQueue, PriorityQueueConfig};
pub use processor::Processor;
pub use sequential::SequentialQueue;
pub use types::{
    BoxError, ItemStatus, PriorityPattern, QueueConfig, QueueResult, QueueStatistics, TaskResult, WorkItem,
};
