use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::errors::QueueError;
use super::events::{NoopEvents, QueueEvents};
use super::metrics::QueueMetrics;
use super::priority_queue::{PriorityQueue, PriorityQueueConfig};
use super::processor::Processor;
use super::types::{QueueConfig, QueueResult, QueueStatistics, WorkItem};

/// Capability contract shared by the sequential and parallel adapters
#[async_trait]
pub trait QueueAdapter<P, R>: Send + Sync {
    /// Add a batch at one priority; returns the new ids in batch order
    fn enqueue(&self, batch: Vec<P>, priority: Option<i32>) -> Result<Vec<String>, QueueError>;

    /// Add a batch where each payload carries its own priority
    fn enqueue_prioritized(&self, batch: Vec<(P, Option<i32>)>) -> Result<Vec<String>, QueueError>;

    /// Run every eligible item through `processor` until the queue drains or is paused
    async fn process(&self, processor: Arc<dyn Processor<P, R>>) -> Result<QueueResult<P, R>, QueueError>;

    /// Stop claiming new items; in-flight items finish normally
    fn pause(&self);

    fn resume(&self);

    fn is_paused(&self) -> bool;

    fn is_processing(&self) -> bool;

    /// Drop every item; returns how many were removed
    fn clear(&self) -> usize;

    fn get_statistics(&self) -> QueueStatistics;

    /// Snapshot of one item, in whatever status it currently holds
    fn get_item(&self, id: &str) -> Option<WorkItem<P, R>>;

    /// Re-rank a queued item; takes effect at the next claim
    fn update_priority(&self, id: &str, priority: i32) -> Result<(), QueueError>;

    /// Short adapter name for logs
    fn name(&self) -> &'static str;
}

/// Admission check consulted before every claim
pub trait AdmissionGate: Send + Sync {
    fn should_throttle(&self) -> bool;
}

/// Construction options common to both adapters
pub struct AdapterOptions<P, R> {
    pub priority_queue: PriorityQueueConfig,
    pub events: Arc<dyn QueueEvents<P, R>>,
    pub admission_gate: Option<Arc<dyn AdmissionGate>>,
    /// Sleep between admission checks while the gate reports pressure
    pub gate_poll_interval: Duration,
}

impl<P, R> Default for AdapterOptions<P, R> {
    fn default() -> Self {
        Self {
            priority_queue: PriorityQueueConfig::default(),
            events: Arc::new(NoopEvents),
            admission_gate: None,
            gate_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Terminal outcome of one item inside a `process()` run
pub(crate) enum ItemOutcome<P, R> {
    Completed(WorkItem<P, R>),
    Failed(WorkItem<P, R>),
}

/// Resets the processing flag when a `process()` call ends, on every exit path
pub(crate) struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Stops the progress heartbeat when dropped
pub(crate) struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// State and execution policy shared by both adapter variants
pub(crate) struct AdapterCore<P, R> {
    pub(crate) name: &'static str,
    pub(crate) config: QueueConfig,
    queue: Mutex<PriorityQueue<P, R>>,
    events: Arc<dyn QueueEvents<P, R>>,
    metrics: QueueMetrics,
    admission_gate: Option<Arc<dyn AdmissionGate>>,
    gate_poll_interval: Duration,
    paused: AtomicBool,
    processing: AtomicBool,
}

impl<P, R> AdapterCore<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: &'static str, config: QueueConfig, options: AdapterOptions<P, R>) -> Self {
        Self {
            name,
            config,
            queue: Mutex::new(PriorityQueue::new(options.priority_queue)),
            events: options.events,
            metrics: QueueMetrics::new(name),
            admission_gate: options.admission_gate,
            gate_poll_interval: options.gate_poll_interval,
            paused: AtomicBool::new(false),
            processing: AtomicBool::new(false),
        }
    }

    pub(crate) fn enqueue(&self, batch: Vec<(P, Option<i32>)>) -> Result<Vec<String>, QueueError> {
        let mut ids = Vec::with_capacity(batch.len());
        let mut added = Vec::with_capacity(batch.len());
        let mut outcome = Ok(());
        {
            let mut queue = self.queue.lock();
            for (payload, priority) in batch {
                match queue.enqueue_with_attempts(payload, priority, None, self.config.max_retries) {
                    Ok(id) => {
                        if let Some(item) = queue.get(&id) {
                            added.push(item.clone());
                        }
                        ids.push(id);
                    }
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
        }

        for item in &added {
            self.events.on_item_added(item);
        }
        debug!("📥 {} queued {} items", self.name, ids.len());
        match outcome {
            Ok(()) => Ok(ids),
            Err(e) if ids.is_empty() => Err(e),
            Err(e) => {
                warn!("⚠️ {} admitted {} items of a batch before: {}", self.name, ids.len(), e);
                Err(QueueError::PartialEnqueue {
                    admitted: ids,
                    source: Box::new(e),
                })
            }
        }
    }

    pub(crate) fn begin_processing(&self) -> Result<ProcessingGuard<'_>, QueueError> {
        self.processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| QueueError::AlreadyProcessing)?;
        Ok(ProcessingGuard { flag: &self.processing })
    }

    pub(crate) fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub(crate) fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("⏸️ {} paused", self.name);
        }
    }

    pub(crate) fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("▶️ {} resumed", self.name);
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) -> usize {
        let removed = self.queue.lock().clear();
        self.metrics.reset();
        info!("🗑️ {} cleared {} items", self.name, removed);
        removed
    }

    /// Run a closure against the underlying queue under its lock
    pub(crate) fn with_queue<T>(&self, f: impl FnOnce(&mut PriorityQueue<P, R>) -> T) -> T {
        f(&mut self.queue.lock())
    }

    pub(crate) fn statistics(&self) -> QueueStatistics {
        let stats = self.queue.lock().get_stats();
        self.metrics.enrich(stats)
    }

    /// Claim the next eligible item for the calling slot.
    ///
    /// Returns `None` once the adapter is paused or nothing is left to claim.
    /// The pending-to-processing transition happens under the queue lock, so
    /// two slots can never claim the same item.
    pub(crate) async fn claim_next(&self) -> Option<WorkItem<P, R>> {
        if !self.has_claimable() || !self.wait_for_admission().await {
            return None;
        }

        let item = self.queue.lock().dequeue()?;
        self.metrics.record_task_started();
        self.events.on_item_started(&item);
        Some(item)
    }

    /// Run one claimed item to a terminal outcome.
    ///
    /// Failed attempts are retried in place after `retry_delay` until the
    /// item's attempt budget is spent. Returns `None` when the queue rejected
    /// the bookkeeping, which is reported through `on_error`.
    pub(crate) async fn execute(
        &self,
        item: WorkItem<P, R>,
        processor: &Arc<dyn Processor<P, R>>,
    ) -> Option<ItemOutcome<P, R>> {
        let mut attempts = item.attempts;
        let started = Instant::now();

        loop {
            let attempt = self.run_attempt(&item, processor).await;

            let outcome = match attempt {
                Ok(result) => {
                    let completed = self.queue.lock().complete(&item.id, result);
                    match completed {
                        Ok(done) => {
                            self.metrics.record_task_completed(done.duration.unwrap_or_else(|| started.elapsed()));
                            self.events.on_item_completed(&done);
                            ItemOutcome::Completed(done)
                        }
                        Err(e) => {
                            self.report_error(format!("could not complete item {}: {}", item.id, e));
                            return None;
                        }
                    }
                }
                Err(err) if attempts + 1 < item.max_attempts => {
                    let retried = self.queue.lock().record_retry(&item.id, err.to_string());
                    match retried {
                        Ok(retrying) => {
                            attempts = retrying.attempts;
                            self.metrics.record_task_retry();
                            warn!(
                                "🔁 Item {} attempt {}/{} failed: {} (retrying in {:?})",
                                item.id, attempts, item.max_attempts, err, self.config.retry_delay
                            );
                            self.events.on_item_retrying(&retrying);
                            sleep(self.config.retry_delay).await;

                            let resumed = self.queue.lock().resume_attempt(&item.id);
                            if let Err(e) = resumed {
                                self.report_error(format!("could not resume item {}: {}", item.id, e));
                                return None;
                            }
                            continue;
                        }
                        Err(e) => {
                            self.report_error(format!("could not record retry for item {}: {}", item.id, e));
                            return None;
                        }
                    }
                }
                Err(err) => {
                    let failed = self.queue.lock().fail(&item.id, err.to_string());
                    match failed {
                        Ok(done) => {
                            error!("❌ Item {} failed after {} attempts: {}", done.id, done.attempts, err);
                            self.metrics.record_task_error(started.elapsed());
                            self.events.on_item_failed(&done);
                            ItemOutcome::Failed(done)
                        }
                        Err(e) => {
                            self.report_error(format!("could not fail item {}: {}", item.id, e));
                            return None;
                        }
                    }
                }
            };

            self.emit_progress();
            return Some(outcome);
        }
    }

    /// Race one processor call against the per-item timeout
    async fn run_attempt(&self, item: &WorkItem<P, R>, processor: &Arc<dyn Processor<P, R>>) -> Result<R, QueueError> {
        let processor = Arc::clone(processor);
        let payload = item.payload.clone();
        let handle = tokio::spawn(async move { processor.process(payload).await });
        let abort = handle.abort_handle();

        match timeout(self.config.timeout, handle).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(QueueError::Processor(e.to_string())),
            Ok(Err(e)) => Err(QueueError::Processor(format!("processor panicked: {}", e))),
            Err(_) => {
                abort.abort();
                self.metrics.record_task_timeout();
                Err(QueueError::Timeout(self.config.timeout))
            }
        }
    }

    pub(crate) fn emit_progress(&self) {
        if self.config.enable_progress_reporting {
            let stats = self.statistics();
            self.events.on_progress_update(&stats);
        }
    }

    pub(crate) fn report_error(&self, message: String) {
        error!("💥 {}: {}", self.name, message);
        self.events.on_error(&message);
    }

    /// Periodic progress updates while a run is in flight
    pub(crate) fn start_heartbeat(self: &Arc<Self>) -> Option<HeartbeatGuard> {
        let period = self.config.progress_update_interval;
        if !self.config.enable_progress_reporting || period.is_zero() {
            return None;
        }

        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                core.emit_progress();
            }
        });
        Some(HeartbeatGuard { handle })
    }

    /// Assemble the run result and fire end-of-run events
    pub(crate) fn finish(
        &self,
        completed: Vec<WorkItem<P, R>>,
        failed: Vec<WorkItem<P, R>>,
        started: Instant,
    ) -> QueueResult<P, R> {
        let drained = !self.queue.lock().has_eligible();
        if drained {
            self.events.on_queue_empty();
        }

        let statistics = self.statistics();
        let duration = started.elapsed();
        info!(
            "🏁 {} run finished in {:?}: {} completed, {} failed{}",
            self.name,
            duration,
            completed.len(),
            failed.len(),
            if drained { "" } else { " (paused with work remaining)" }
        );
        self.metrics.log_summary();

        QueueResult {
            completed,
            failed,
            statistics,
            duration,
        }
    }

    fn has_claimable(&self) -> bool {
        self.queue.lock().has_eligible()
    }

    /// Hold the caller while the admission gate reports pressure.
    ///
    /// Returns false if the adapter was paused, or the queue ran out of
    /// claimable items, before admission was granted.
    async fn wait_for_admission(&self) -> bool {
        if let Some(gate) = &self.admission_gate {
            let mut held = false;
            while gate.should_throttle() {
                if self.is_paused() || !self.has_claimable() {
                    return false;
                }
                if !held {
                    warn!("⏳ {} holding new claims under resource pressure", self.name);
                    held = true;
                }
                sleep(self.gate_poll_interval).await;
            }
            if held {
                info!("✅ {} resource pressure cleared, resuming claims", self.name);
            }
        }
        !self.is_paused()
    }
}
