use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use super::types::QueueStatistics;

/// Queue performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetricsData {
    pub queue_name: String,
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub tasks_timeout: u64,
    pub total_execution_time_ms: u64,
    pub average_execution_time_ms: f64,
    pub current_throughput_per_sec: f64,
    pub peak_throughput_per_sec: f64,
}

impl QueueMetricsData {
    fn new(queue_name: String) -> Self {
        Self {
            queue_name,
            tasks_started: 0,
            tasks_completed: 0,
            tasks_failed: 0,
            tasks_retried: 0,
            tasks_timeout: 0,
            total_execution_time_ms: 0,
            average_execution_time_ms: 0.0,
            current_throughput_per_sec: 0.0,
            peak_throughput_per_sec: 0.0,
        }
    }

    fn update_averages(&mut self) {
        let finished = self.tasks_completed + self.tasks_failed;
        if finished > 0 {
            self.average_execution_time_ms = self.total_execution_time_ms as f64 / finished as f64;
        }
    }
}

#[derive(Debug)]
struct MetricsState {
    data: QueueMetricsData,
    recent_outcomes: VecDeque<Instant>,
    first_outcome: Option<Instant>,
}

/// Thread-safe throughput tracker shared by the worker slots of one adapter
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    state: Arc<Mutex<MetricsState>>,
    throughput_window: Duration,
}

impl QueueMetrics {
    /// Create new metrics collector
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self::with_window(queue_name, Duration::from_secs(60))
    }

    pub fn with_window(queue_name: impl Into<String>, throughput_window: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                data: QueueMetricsData::new(queue_name.into()),
                recent_outcomes: VecDeque::new(),
                first_outcome: None,
            })),
            throughput_window,
        }
    }

    pub fn record_task_started(&self) {
        let mut state = self.state.lock();
        state.data.tasks_started += 1;
    }

    /// Record a terminal success
    pub fn record_task_completed(&self, execution_time: Duration) {
        let mut state = self.state.lock();
        state.data.tasks_completed += 1;
        state.data.total_execution_time_ms += execution_time.as_millis() as u64;
        state.data.update_averages();
        self.record_outcome(&mut state);
        debug!(
            "📊 Task completed (total: {}, avg exec time: {:.2}ms)",
            state.data.tasks_completed, state.data.average_execution_time_ms
        );
    }

    /// Record a terminal failure
    pub fn record_task_error(&self, execution_time: Duration) {
        let mut state = self.state.lock();
        state.data.tasks_failed += 1;
        state.data.total_execution_time_ms += execution_time.as_millis() as u64;
        state.data.update_averages();
        self.record_outcome(&mut state);
    }

    pub fn record_task_retry(&self) {
        self.state.lock().data.tasks_retried += 1;
    }

    pub fn record_task_timeout(&self) {
        self.state.lock().data.tasks_timeout += 1;
    }

    pub fn get_metrics(&self) -> QueueMetricsData {
        let mut state = self.state.lock();
        self.refresh_throughput(&mut state, Instant::now());
        state.data.clone()
    }

    /// Fill the throughput and ETA fields of a queue snapshot
    pub fn enrich(&self, mut statistics: QueueStatistics) -> QueueStatistics {
        let throughput = self.get_metrics().current_throughput_per_sec;
        statistics.throughput_per_sec = throughput;
        let remaining = statistics.outstanding();
        statistics.estimated_time_remaining_ms = if remaining == 0 {
            Some(0)
        } else if throughput > 0.0 {
            Some((remaining as f64 / throughput * 1000.0) as u64)
        } else {
            None
        };
        statistics
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        let queue_name = state.data.queue_name.clone();
        state.data = QueueMetricsData::new(queue_name);
        state.recent_outcomes.clear();
        state.first_outcome = None;
        info!("📊 Queue metrics reset");
    }

    pub fn log_summary(&self) {
        let data = self.get_metrics();
        info!("📊 Queue '{}' Summary:", data.queue_name);
        info!(
            "  Tasks: {} started, {} completed, {} failed ({} retries, {} timeouts)",
            data.tasks_started, data.tasks_completed, data.tasks_failed, data.tasks_retried, data.tasks_timeout
        );
        info!(
            "  Throughput: {:.2}/sec (peak: {:.2}/sec)",
            data.current_throughput_per_sec, data.peak_throughput_per_sec
        );
        info!("  Avg execution: {:.2}ms", data.average_execution_time_ms);
    }

    fn record_outcome(&self, state: &mut MetricsState) {
        let now = Instant::now();
        state.first_outcome.get_or_insert(now);
        state.recent_outcomes.push_back(now);
        self.refresh_throughput(state, now);
    }

    fn refresh_throughput(&self, state: &mut MetricsState, now: Instant) {
        while let Some(&front) = state.recent_outcomes.front() {
            if now.saturating_duration_since(front) > self.throughput_window {
                state.recent_outcomes.pop_front();
            } else {
                break;
            }
        }

        // Short runs measure against their own age instead of the full window
        let observed = state
            .first_outcome
            .map(|first| now.saturating_duration_since(first))
            .unwrap_or_default()
            .clamp(Duration::from_secs(1), self.throughput_window);

        let throughput = state.recent_outcomes.len() as f64 / observed.as_secs_f64();
        state.data.current_throughput_per_sec = throughput;
        if throughput > state.data.peak_throughput_per_sec {
            state.data.peak_throughput_per_sec = throughput;
        }
    }
}
