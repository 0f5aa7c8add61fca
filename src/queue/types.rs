use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Boxed error carried by processors and pooled tasks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Generic task result type
pub type TaskResult<T> = Result<T, BoxError>;

/// Lifecycle status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl ItemStatus {
    /// Completed and failed items never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    /// Pending and retrying items can be claimed by a dequeue
    pub fn is_eligible(&self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::Retrying)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "PENDING"),
            ItemStatus::Processing => write!(f, "PROCESSING"),
            ItemStatus::Completed => write!(f, "COMPLETED"),
            ItemStatus::Failed => write!(f, "FAILED"),
            ItemStatus::Retrying => write!(f, "RETRYING"),
        }
    }
}

/// A unit of work tracked by the priority queue.
///
/// Monotonic `Instant`s drive ordering and timing; the `DateTime<Utc>` stamps
/// are what gets reported outward.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem<P, R> {
    pub id: String,
    pub payload: P,
    pub priority: i32,
    pub status: ItemStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub last_error: Option<String>,
    pub result: Option<R>,
    #[serde(skip)]
    pub(crate) sequence: u64,
    #[serde(skip)]
    pub(crate) queued_instant: Instant,
    #[serde(skip)]
    pub(crate) last_boost_instant: Option<Instant>,
    #[serde(skip)]
    pub(crate) started_instant: Option<Instant>,
    #[serde(skip)]
    pub(crate) waited: Option<Duration>,
}

impl<P, R> WorkItem<P, R> {
    pub(crate) fn new(id: String, payload: P, priority: i32, max_attempts: u32, sequence: u64) -> Self {
        Self {
            id,
            payload,
            priority,
            status: ItemStatus::Pending,
            attempts: 0,
            max_attempts,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration: None,
            last_error: None,
            result: None,
            sequence,
            queued_instant: Instant::now(),
            last_boost_instant: None,
            started_instant: None,
            waited: None,
        }
    }

    /// Time spent waiting since the item was last (re)queued
    pub fn wait_time(&self) -> Duration {
        self.queued_instant.elapsed()
    }

    /// Attempts still available before the item becomes terminally failed
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// Pattern-based priority assignment rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityPattern {
    /// Regular expression matched against the payload key (usually a URL)
    pub pattern: String,
    pub priority: i32,
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent execution slots; 1 selects the sequential adapter
    pub max_concurrent: usize,
    /// Total attempts per item, including the first one
    pub max_retries: u32,
    /// Fixed pause between attempts of the same item
    pub retry_delay: Duration,
    /// Per-attempt processor time budget
    pub timeout: Duration,
    pub priority_patterns: Vec<PriorityPattern>,
    pub enable_progress_reporting: bool,
    pub progress_update_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: num_cpus::get().clamp(1, 4),
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            timeout: Duration::from_secs(30),
            priority_patterns: Vec::new(),
            enable_progress_reporting: true,
            progress_update_interval: Duration::from_millis(1000),
        }
    }
}

/// Queue statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub average_priority: f64,
    pub average_wait_time_ms: f64,
    pub average_processing_time_ms: f64,
    pub throughput_per_sec: f64,
    pub estimated_time_remaining_ms: Option<u64>,
    pub progress_percent: f64,
}

impl QueueStatistics {
    /// Items that have not reached a terminal status yet
    pub fn outstanding(&self) -> usize {
        self.pending + self.processing + self.retrying
    }
}

/// Outcome of one `process()` run
#[derive(Debug, Clone, Serialize)]
pub struct QueueResult<P, R> {
    pub completed: Vec<WorkItem<P, R>>,
    pub failed: Vec<WorkItem<P, R>>,
    pub statistics: QueueStatistics,
    pub duration: Duration,
}

impl<P, R> QueueResult<P, R> {
    /// True when no item of this run ended in `failed`
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<P: Serialize, R: Serialize> QueueResult<P, R> {
    /// Render the run for reporting collaborators
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
