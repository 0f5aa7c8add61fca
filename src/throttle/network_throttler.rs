use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::errors::ThrottleError;
use crate::monitor::ResourceMonitor;
use crate::queue::TaskResult;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    /// Maximum in-flight calls
    pub concurrent_requests: usize,
    /// Minimum gap between two admissions
    pub delay_between_requests: Duration,
    /// Admissions allowed inside one burst window
    pub burst_limit: u32,
    pub burst_window: Duration,
    pub enable_backoff: bool,
    pub backoff_multiplier: f64,
    /// First delay after a failure when no backoff is in effect
    pub base_backoff_delay: Duration,
    pub max_backoff_delay: Duration,
    /// Upper bound between admission checks of a waiting call
    pub poll_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            requests_per_minute: 300,
            concurrent_requests: 5,
            delay_between_requests: Duration::from_millis(100),
            burst_limit: 20,
            burst_window: Duration::from_secs(10),
            enable_backoff: true,
            backoff_multiplier: 2.0,
            base_backoff_delay: Duration::from_millis(1000),
            max_backoff_delay: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<(), ThrottleError> {
        if self.requests_per_second == 0 || self.requests_per_minute == 0 {
            return Err(ThrottleError::InvalidConfig("request rates must be positive".to_string()));
        }
        if self.concurrent_requests == 0 {
            return Err(ThrottleError::InvalidConfig("concurrent_requests must be positive".to_string()));
        }
        if self.burst_limit == 0 {
            return Err(ThrottleError::InvalidConfig("burst_limit must be positive".to_string()));
        }
        if !self.has_usable_multiplier() {
            return Err(ThrottleError::InvalidConfig(format!(
                "backoff_multiplier must be a finite number of at least 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    fn has_usable_multiplier(&self) -> bool {
        self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0
    }
}

/// Partial update applied live by `update_config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfigUpdate {
    pub requests_per_second: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub concurrent_requests: Option<usize>,
    pub delay_between_requests: Option<Duration>,
    pub burst_limit: Option<u32>,
    pub burst_window: Option<Duration>,
    pub enable_backoff: Option<bool>,
    pub backoff_multiplier: Option<f64>,
    pub base_backoff_delay: Option<Duration>,
    pub max_backoff_delay: Option<Duration>,
}

impl ThrottleConfigUpdate {
    fn apply(self, config: &mut ThrottleConfig) {
        if let Some(v) = self.requests_per_second {
            config.requests_per_second = v;
        }
        if let Some(v) = self.requests_per_minute {
            config.requests_per_minute = v;
        }
        if let Some(v) = self.concurrent_requests {
            config.concurrent_requests = v;
        }
        if let Some(v) = self.delay_between_requests {
            config.delay_between_requests = v;
        }
        if let Some(v) = self.burst_limit {
            config.burst_limit = v;
        }
        if let Some(v) = self.burst_window {
            config.burst_window = v;
        }
        if let Some(v) = self.enable_backoff {
            config.enable_backoff = v;
        }
        if let Some(v) = self.backoff_multiplier {
            config.backoff_multiplier = v;
        }
        if let Some(v) = self.base_backoff_delay {
            config.base_backoff_delay = v;
        }
        if let Some(v) = self.max_backoff_delay {
            config.max_backoff_delay = v;
        }
    }
}

/// One logical throttled call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrottleRequest {
    pub id: u64,
    pub url: String,
    pub method: String,
    pub priority: i32,
    pub retry_count: u32,
}

/// Outcome of one executed attempt, kept for a minute
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub request_id: u64,
    pub url: String,
    pub method: String,
    pub success: bool,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    at: Instant,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ThrottleStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub queued_requests: usize,
    pub active_requests: usize,
    pub requests_last_second: usize,
    pub requests_last_minute: usize,
    pub average_response_time_ms: f64,
    pub success_rate: f64,
    pub current_backoff_ms: u64,
    pub paused: bool,
}

struct Waiter {
    ticket: u64,
    priority: i32,
}

struct ThrottleState {
    config: ThrottleConfig,
    /// Ordered by priority desc, then ticket asc
    waiting: Vec<Waiter>,
    active: usize,
    admissions: VecDeque<Instant>,
    burst_started: Option<Instant>,
    burst_count: u32,
    last_admitted: Option<Instant>,
    backoff_delay: Duration,
    history: VecDeque<RequestRecord>,
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    retried_requests: u64,
    paused: bool,
    next_ticket: u64,
    next_request_id: u64,
}

impl ThrottleState {
    fn enqueue_waiter(&mut self, priority: i32) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let position = self.waiting.partition_point(|w| w.priority >= priority);
        self.waiting.insert(position, Waiter { ticket, priority });
        ticket
    }

    fn remove_waiter(&mut self, ticket: u64) -> bool {
        match self.waiting.iter().position(|w| w.ticket == ticket) {
            Some(index) => {
                self.waiting.remove(index);
                true
            }
            None => false,
        }
    }

    fn is_head(&self, ticket: u64) -> bool {
        self.waiting.first().is_some_and(|w| w.ticket == ticket)
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.admissions.front() {
            if now.saturating_duration_since(front) >= MINUTE {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
        while let Some(front) = self.history.front() {
            if now.saturating_duration_since(front.at) >= MINUTE {
                self.history.pop_front();
            } else {
                break;
            }
        }
        if let Some(started) = self.burst_started {
            if now.saturating_duration_since(started) >= self.config.burst_window {
                self.burst_started = None;
                self.burst_count = 0;
            }
        }
    }

    fn admissions_within(&self, now: Instant, window: Duration) -> usize {
        self.admissions
            .iter()
            .rev()
            .take_while(|&&at| now.saturating_duration_since(at) < window)
            .count()
    }

    fn can_execute(&mut self, now: Instant) -> bool {
        self.prune(now);
        let config = &self.config;
        !self.paused
            && self.active < config.concurrent_requests
            && self.admissions_within(now, SECOND) < config.requests_per_second as usize
            && self.admissions.len() < config.requests_per_minute as usize
            && self.burst_count < config.burst_limit
            && self
                .last_admitted
                .map_or(true, |last| now.saturating_duration_since(last) >= config.delay_between_requests)
    }

    fn admit(&mut self, ticket: u64, now: Instant) {
        self.remove_waiter(ticket);
        self.active += 1;
        self.admissions.push_back(now);
        self.burst_started.get_or_insert(now);
        self.burst_count += 1;
        self.last_admitted = Some(now);
        self.total_requests += 1;
    }

    fn next_backoff(&mut self) -> Duration {
        if !self.config.enable_backoff {
            return Duration::ZERO;
        }
        let next = if self.backoff_delay.is_zero() {
            self.config.base_backoff_delay
        } else {
            let scaled = self.backoff_delay.as_secs_f64() * self.config.backoff_multiplier;
            Duration::try_from_secs_f64(scaled).unwrap_or(self.config.max_backoff_delay)
        };
        self.backoff_delay = next.min(self.config.max_backoff_delay);
        self.backoff_delay
    }
}

/// Per-call admission gate enforcing rate, concurrency, burst and backoff limits
pub struct NetworkThrottler {
    state: Mutex<ThrottleState>,
    changed: Notify,
    monitor: Option<Arc<ResourceMonitor>>,
}

impl NetworkThrottler {
    /// Builds a throttler; an unusable `backoff_multiplier` falls back to the default.
    pub fn new(mut config: ThrottleConfig) -> Self {
        if !config.has_usable_multiplier() {
            let fallback = ThrottleConfig::default().backoff_multiplier;
            warn!(
                "⚠️ backoff_multiplier {} is unusable, falling back to {}",
                config.backoff_multiplier, fallback
            );
            config.backoff_multiplier = fallback;
        }
        info!(
            "🚦 Network throttler: {}/s, {}/min, {} concurrent, burst {}/{:?}",
            config.requests_per_second,
            config.requests_per_minute,
            config.concurrent_requests,
            config.burst_limit,
            config.burst_window
        );
        Self {
            state: Mutex::new(ThrottleState {
                config,
                waiting: Vec::new(),
                active: 0,
                admissions: VecDeque::new(),
                burst_started: None,
                burst_count: 0,
                last_admitted: None,
                backoff_delay: Duration::ZERO,
                history: VecDeque::new(),
                total_requests: 0,
                successful_requests: 0,
                failed_requests: 0,
                retried_requests: 0,
                paused: false,
                next_ticket: 0,
                next_request_id: 0,
            }),
            changed: Notify::new(),
            monitor: None,
        }
    }

    /// Report every executed attempt to a resource monitor's request counters
    pub fn with_monitor(mut self, monitor: Arc<ResourceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Run `operation` once admitted, retrying failures up to `max_retries`
    /// times with exponential backoff. Each retry queues again at the same
    /// priority.
    pub async fn throttle_request<T, Fut, Op>(
        &self,
        mut operation: Op,
        url: &str,
        method: &str,
        priority: i32,
        max_retries: u32,
    ) -> Result<T, ThrottleError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = TaskResult<T>>,
    {
        let mut request = ThrottleRequest {
            id: self.next_request_id(),
            url: url.to_string(),
            method: method.to_string(),
            priority,
            retry_count: 0,
        };

        loop {
            let slot = self.admit(&request).await;
            debug!("🚦 Admitted {} {} (request {}, retry {})", request.method, request.url, request.id, request.retry_count);

            let started = Instant::now();
            let outcome = operation().await;
            let elapsed = started.elapsed();
            drop(slot);
            self.record_outcome(&request, outcome.is_ok(), elapsed);

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if request.retry_count >= max_retries {
                warn!("❌ {} {} failed after {} attempts: {}", request.method, request.url, request.retry_count + 1, error);
                return Err(ThrottleError::Exhausted {
                    url: request.url,
                    attempts: request.retry_count + 1,
                    message: error.to_string(),
                });
            }

            let delay = {
                let mut state = self.state.lock();
                state.retried_requests += 1;
                state.next_backoff()
            };
            request.retry_count += 1;
            warn!(
                "🔁 {} {} failed ({}), retry {}/{} in {:?}",
                request.method, request.url, error, request.retry_count, max_retries, delay
            );
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }

    /// Suspend admission; queued calls keep their place
    pub fn pause(&self) {
        self.state.lock().paused = true;
        info!("⏸️ Network throttler paused");
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
        self.changed.notify_waiters();
        info!("▶️ Network throttler resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Apply new limits to queued and future calls
    pub fn update_config(&self, update: ThrottleConfigUpdate) -> Result<(), ThrottleError> {
        {
            let mut state = self.state.lock();
            let mut config = state.config.clone();
            update.apply(&mut config);
            config.validate()?;
            state.config = config;
        }
        self.changed.notify_waiters();
        info!("🔧 Network throttler limits updated");
        Ok(())
    }

    pub fn get_config(&self) -> ThrottleConfig {
        self.state.lock().config.clone()
    }

    /// True when a call at the head of the queue would be admitted now
    pub fn can_execute_request(&self) -> bool {
        self.state.lock().can_execute(Instant::now())
    }

    pub fn get_stats(&self) -> ThrottleStats {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.prune(now);

        let samples = state.history.len();
        let average_response_time_ms = if samples == 0 {
            0.0
        } else {
            state.history.iter().map(|r| r.response_time_ms as f64).sum::<f64>() / samples as f64
        };
        let finished = state.successful_requests + state.failed_requests;
        ThrottleStats {
            total_requests: state.total_requests,
            successful_requests: state.successful_requests,
            failed_requests: state.failed_requests,
            retried_requests: state.retried_requests,
            queued_requests: state.waiting.len(),
            active_requests: state.active,
            requests_last_second: state.admissions_within(now, SECOND),
            requests_last_minute: state.admissions.len(),
            average_response_time_ms,
            success_rate: if finished == 0 {
                0.0
            } else {
                state.successful_requests as f64 / finished as f64
            },
            current_backoff_ms: state.backoff_delay.as_millis() as u64,
            paused: state.paused,
        }
    }

    /// Executed attempts from the last minute, oldest first
    pub fn get_request_history(&self) -> Vec<RequestRecord> {
        let mut state = self.state.lock();
        state.prune(Instant::now());
        state.history.iter().cloned().collect()
    }

    fn next_request_id(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_request_id;
        state.next_request_id += 1;
        id
    }

    /// Queue `request` and wait until it is at the head and every limit allows it
    async fn admit(&self, request: &ThrottleRequest) -> ActiveSlot<'_> {
        let ticket = self.state.lock().enqueue_waiter(request.priority);
        let mut waiting = WaitTicket {
            throttler: self,
            ticket,
            queued: true,
        };

        loop {
            let notified = self.changed.notified();
            let poll_interval = {
                let mut state = self.state.lock();
                let now = Instant::now();
                if state.is_head(ticket) && state.can_execute(now) {
                    state.admit(ticket, now);
                    waiting.queued = false;
                    break;
                }
                state.config.poll_interval
            };
            let _ = timeout(poll_interval, notified).await;
        }

        // The next waiter may be admissible right away
        self.changed.notify_waiters();
        if let Some(monitor) = &self.monitor {
            monitor.record_request();
        }
        ActiveSlot { throttler: self }
    }

    fn record_outcome(&self, request: &ThrottleRequest, success: bool, elapsed: Duration) {
        let mut state = self.state.lock();
        if success {
            state.successful_requests += 1;
            state.backoff_delay = Duration::ZERO;
        } else {
            state.failed_requests += 1;
        }
        state.history.push_back(RequestRecord {
            request_id: request.id,
            url: request.url.clone(),
            method: request.method.clone(),
            success,
            response_time_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
            at: Instant::now(),
        });
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        if let Some(monitor) = &self.monitor {
            monitor.record_request_complete();
        }
        self.changed.notify_waiters();
    }
}

/// Holds a place in the wait list; a cancelled wait gives it up
struct WaitTicket<'a> {
    throttler: &'a NetworkThrottler,
    ticket: u64,
    queued: bool,
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        if self.queued && self.throttler.state.lock().remove_waiter(self.ticket) {
            self.throttler.changed.notify_waiters();
        }
    }
}

/// One in-flight call; dropping it frees the concurrency slot
struct ActiveSlot<'a> {
    throttler: &'a NetworkThrottler,
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.throttler.release();
    }
}
