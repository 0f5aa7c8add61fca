//! Periodic resource sampling with limit alerts and a throttle decision.
//!
//! The sampler runs as a background task owned by one monitor instance. Every
//! tick produces a `ResourceSample` that is appended to a 60s rolling history
//! and checked against the configured limits. `should_throttle()` only looks
//! at the most recent sample, so injecting a sample with `record_sample()`
//! gives a deterministic decision.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::errors::MonitorError;
use super::sampler::{SysinfoSampler, SystemSampler};
use crate::queue::AdmissionGate;

/// Percentage readings above this are critical regardless of the limit
const CRITICAL_PERCENT: f64 = 90.0;

/// Count readings at this multiple of their limit are critical
const CRITICAL_COUNT_FACTOR: f64 = 2.0;

const RPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Percent of host memory in use
    pub max_memory_usage: f64,
    /// Percent of host CPU in use
    pub max_cpu_usage: f64,
    pub max_network_connections: u64,
    pub max_requests_per_second: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_usage: 80.0,
            max_cpu_usage: 80.0,
            max_network_connections: 100,
            max_requests_per_second: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMonitorOptions {
    /// Sampling period
    pub interval: Duration,
    pub limits: ResourceLimits,
    pub enable_alerts: bool,
    pub enable_throttling: bool,
    /// Samples older than this are evicted from the history
    pub history_retention: Duration,
    pub max_alerts: usize,
}

impl Default for ResourceMonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            limits: ResourceLimits::default(),
            enable_alerts: true,
            enable_throttling: true,
            history_retention: Duration::from_secs(60),
            max_alerts: 100,
        }
    }
}

/// Immutable snapshot of resource pressure
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub memory_usage: f64,
    pub cpu_usage: f64,
    pub active_connections: u64,
    pub requests_per_second: f64,
    #[serde(skip)]
    recorded_at: Instant,
}

impl ResourceSample {
    pub fn new(memory_usage: f64, cpu_usage: f64, active_connections: u64, requests_per_second: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            memory_usage,
            cpu_usage,
            active_connections,
            requests_per_second,
            recorded_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Memory,
    Cpu,
    NetworkConnections,
    RequestsPerSecond,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::Cpu => write!(f, "cpu"),
            ResourceKind::NetworkConnections => write!(f, "network connections"),
            ResourceKind::RequestsPerSecond => write!(f, "requests/sec"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceAlert {
    pub level: AlertLevel,
    pub resource: ResourceKind,
    pub value: f64,
    pub limit: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Mean of every sample still in the history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AverageUsage {
    pub memory_usage: f64,
    pub cpu_usage: f64,
    pub active_connections: f64,
    pub requests_per_second: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub running: bool,
    pub samples: usize,
    pub alerts: usize,
    pub active_connections: u64,
    pub total_requests: u64,
    pub requests_per_second: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub throttling: bool,
}

struct RequestWindow {
    started: Instant,
    count: u64,
    rate: f64,
}

#[derive(Default)]
struct MonitorState {
    history: VecDeque<ResourceSample>,
    alerts: VecDeque<ResourceAlert>,
    current: Option<ResourceSample>,
}

pub struct ResourceMonitor {
    options: ResourceMonitorOptions,
    sampler: Arc<dyn SystemSampler>,
    state: Mutex<MonitorState>,
    window: Mutex<RequestWindow>,
    active_connections: AtomicU64,
    total_requests: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResourceMonitor {
    pub fn new(options: ResourceMonitorOptions) -> Self {
        Self::with_sampler(options, Arc::new(SysinfoSampler::new()))
    }

    pub fn with_sampler(options: ResourceMonitorOptions, sampler: Arc<dyn SystemSampler>) -> Self {
        Self {
            options,
            sampler,
            state: Mutex::new(MonitorState::default()),
            window: Mutex::new(RequestWindow {
                started: Instant::now(),
                count: 0,
                rate: 0.0,
            }),
            active_connections: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ResourceMonitorOptions {
        &self.options
    }

    /// Start periodic sampling. A running monitor is left as is; otherwise
    /// previous history and alerts are discarded.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("📈 Resource monitor already running");
            return;
        }

        {
            let mut state = self.state.lock();
            state.history.clear();
            state.alerts.clear();
            state.current = None;
        }

        let monitor: Weak<Self> = Arc::downgrade(self);
        let period = self.options.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                if let Err(e) = monitor.sample_now() {
                    warn!("⚠️ {}", e);
                }
            }
        }));
        info!("📈 Resource monitoring started with {:.1}s interval", period.as_secs_f32());
    }

    /// Stop sampling; the last sample and alert history stay readable
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("📉 Resource monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Take one sample from the system sampler and record it
    pub fn sample_now(&self) -> Result<ResourceSample, MonitorError> {
        let reading = self.sampler.sample()?;
        let sample = ResourceSample::new(
            reading.memory_usage,
            reading.cpu_usage,
            self.active_connections(),
            self.requests_per_second(),
        );
        self.record_sample(sample.clone());
        Ok(sample)
    }

    /// Append a sample to the history, make it current and raise alerts for it
    pub fn record_sample(&self, sample: ResourceSample) {
        let alerts = if self.options.enable_alerts {
            self.evaluate(&sample)
        } else {
            Vec::new()
        };

        for alert in &alerts {
            match alert.level {
                AlertLevel::Warning => warn!("⚠️ {}", alert.message),
                AlertLevel::Critical => error!("🚨 {}", alert.message),
            }
        }

        let mut state = self.state.lock();
        let cutoff = sample.recorded_at;
        while let Some(front) = state.history.front() {
            if cutoff.saturating_duration_since(front.recorded_at) > self.options.history_retention {
                state.history.pop_front();
            } else {
                break;
            }
        }
        state.history.push_back(sample.clone());
        state.current = Some(sample);

        for alert in alerts {
            if state.alerts.len() >= self.options.max_alerts {
                state.alerts.pop_front();
            }
            state.alerts.push_back(alert);
        }
    }

    /// True when throttling is enabled and the most recent sample breaches any limit
    pub fn should_throttle(&self) -> bool {
        if !self.options.enable_throttling {
            return false;
        }
        self.state
            .lock()
            .current
            .as_ref()
            .is_some_and(|sample| !self.breaches(sample).is_empty())
    }

    pub fn record_request(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut window = self.window.lock();
        Self::roll_window(&mut window, Instant::now());
        window.count += 1;
    }

    /// Decrement the active connection count, never below zero
    pub fn record_request_complete(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    pub fn record_network_traffic(&self, bytes_in: u64, bytes_out: u64) {
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Request rate measured over the last completed one-second window
    pub fn requests_per_second(&self) -> f64 {
        let mut window = self.window.lock();
        Self::roll_window(&mut window, Instant::now());
        window.rate
    }

    /// Total bytes in and out since creation or the last cleanup
    pub fn network_traffic(&self) -> (u64, u64) {
        (self.bytes_in.load(Ordering::Relaxed), self.bytes_out.load(Ordering::Relaxed))
    }

    pub fn get_current_sample(&self) -> Option<ResourceSample> {
        self.state.lock().current.clone()
    }

    pub fn get_history(&self) -> Vec<ResourceSample> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn get_alerts(&self) -> Vec<ResourceAlert> {
        self.state.lock().alerts.iter().cloned().collect()
    }

    pub fn get_average_usage(&self) -> Option<AverageUsage> {
        let state = self.state.lock();
        let samples = state.history.len();
        if samples == 0 {
            return None;
        }

        let n = samples as f64;
        Some(AverageUsage {
            memory_usage: state.history.iter().map(|s| s.memory_usage).sum::<f64>() / n,
            cpu_usage: state.history.iter().map(|s| s.cpu_usage).sum::<f64>() / n,
            active_connections: state.history.iter().map(|s| s.active_connections as f64).sum::<f64>() / n,
            requests_per_second: state.history.iter().map(|s| s.requests_per_second).sum::<f64>() / n,
            samples,
        })
    }

    pub fn get_stats(&self) -> MonitorStats {
        let (samples, alerts) = {
            let state = self.state.lock();
            (state.history.len(), state.alerts.len())
        };
        let (bytes_in, bytes_out) = self.network_traffic();
        MonitorStats {
            running: self.is_running(),
            samples,
            alerts,
            active_connections: self.active_connections(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            requests_per_second: self.requests_per_second(),
            bytes_in,
            bytes_out,
            throttling: self.should_throttle(),
        }
    }

    /// Stop sampling and forget every sample, alert and counter
    pub fn cleanup(&self) {
        self.stop();
        {
            let mut state = self.state.lock();
            state.history.clear();
            state.alerts.clear();
            state.current = None;
        }
        {
            let mut window = self.window.lock();
            window.started = Instant::now();
            window.count = 0;
            window.rate = 0.0;
        }
        self.active_connections.store(0, Ordering::SeqCst);
        self.total_requests.store(0, Ordering::Relaxed);
        self.bytes_in.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
        debug!("🧹 Resource monitor state cleared");
    }

    fn roll_window(window: &mut RequestWindow, now: Instant) {
        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= RPS_WINDOW {
            window.rate = window.count as f64 / elapsed.as_secs_f64();
            window.count = 0;
            window.started = now;
        }
    }

    /// Dimensions of `sample` over their limit, with the observed value and limit
    fn breaches(&self, sample: &ResourceSample) -> Vec<(ResourceKind, f64, f64)> {
        let limits = &self.options.limits;
        [
            (ResourceKind::Memory, sample.memory_usage, limits.max_memory_usage),
            (ResourceKind::Cpu, sample.cpu_usage, limits.max_cpu_usage),
            (
                ResourceKind::NetworkConnections,
                sample.active_connections as f64,
                limits.max_network_connections as f64,
            ),
            (
                ResourceKind::RequestsPerSecond,
                sample.requests_per_second,
                limits.max_requests_per_second,
            ),
        ]
        .into_iter()
        .filter(|(_, value, limit)| value > limit)
        .collect()
    }

    fn evaluate(&self, sample: &ResourceSample) -> Vec<ResourceAlert> {
        self.breaches(sample)
            .into_iter()
            .map(|(resource, value, limit)| {
                let critical = match resource {
                    ResourceKind::Memory | ResourceKind::Cpu => value > CRITICAL_PERCENT,
                    ResourceKind::NetworkConnections | ResourceKind::RequestsPerSecond => {
                        value >= limit * CRITICAL_COUNT_FACTOR
                    }
                };
                let level = if critical { AlertLevel::Critical } else { AlertLevel::Warning };
                ResourceAlert {
                    level,
                    resource,
                    value,
                    limit,
                    message: format!("High {} usage: {:.1} (limit {:.1})", resource, value, limit),
                    timestamp: sample.timestamp,
                }
            })
            .collect()
    }
}

impl AdmissionGate for ResourceMonitor {
    fn should_throttle(&self) -> bool {
        ResourceMonitor::should_throttle(self)
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
