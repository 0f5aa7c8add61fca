use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use super::errors::PoolError;
use super::factory::{ExecutionContextFactory, Worker};
use crate::monitor::{ProcessSampler, ProcessUsage, SysinfoSampler};
use crate::queue::TaskResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub pool_size: usize,
    /// Upper bound between availability checks while `execute_task` waits
    pub acquire_poll_interval: Duration,
    /// How long `execute_task` waits for an idle worker
    pub acquire_timeout: Duration,
    /// Process memory above this is logged as a warning after a task
    pub memory_warning_bytes: u64,
    pub cpu_warning_percent: f64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get().clamp(1, 4),
            acquire_poll_interval: Duration::from_millis(50),
            acquire_timeout: Duration::from_secs(30),
            memory_warning_bytes: 1024 * 1024 * 1024,
            cpu_warning_percent: 80.0,
        }
    }
}

/// Per-worker telemetry snapshot
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: usize,
    pub busy: bool,
    pub current_task: Option<String>,
    pub busy_for_ms: Option<u64>,
    pub tasks_completed: u64,
    pub last_usage: Option<ProcessUsage>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub initialized: bool,
    pub total_workers: usize,
    pub busy_workers: usize,
    pub idle_workers: usize,
    pub target_size: usize,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
}

struct Slot<H> {
    id: usize,
    handle: Arc<H>,
    busy: bool,
    current_task: Option<String>,
    started_at: Option<Instant>,
    tasks_completed: u64,
    last_usage: Option<ProcessUsage>,
}

struct PoolState<S, H> {
    shared: Option<Arc<S>>,
    slots: Vec<Slot<H>>,
    target_size: usize,
    next_worker_id: usize,
    tasks_executed: u64,
    tasks_failed: u64,
}

/// Fixed set of reusable execution contexts bound to one shared resource.
///
/// The slot table is only touched under a short lock by acquire and release.
/// `initialize`, `resize_pool` and `cleanup` are serialized among themselves
/// because they await the factory.
pub struct WorkerPool<F: ExecutionContextFactory> {
    factory: Arc<F>,
    config: WorkerPoolConfig,
    state: Mutex<PoolState<F::Shared, F::Handle>>,
    lifecycle: tokio::sync::Mutex<()>,
    released: Notify,
    process_sampler: Arc<dyn ProcessSampler>,
}

impl<F: ExecutionContextFactory> WorkerPool<F> {
    pub fn new(factory: F, config: WorkerPoolConfig) -> Self {
        let target_size = config.pool_size.max(1);
        Self {
            factory: Arc::new(factory),
            config,
            state: Mutex::new(PoolState {
                shared: None,
                slots: Vec::new(),
                target_size,
                next_worker_id: 0,
                tasks_executed: 0,
                tasks_failed: 0,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            released: Notify::new(),
            process_sampler: Arc::new(SysinfoSampler::new()),
        }
    }

    /// Replace the telemetry source used for resource warnings
    pub fn with_process_sampler(mut self, sampler: Arc<dyn ProcessSampler>) -> Self {
        self.process_sampler = sampler;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().shared.is_some()
    }

    /// Create the shared resource and `pool_size` workers. Calling it again
    /// on an initialized pool does nothing.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_initialized() {
            debug!("🔄 Worker pool already initialized");
            return Ok(());
        }

        let shared = self
            .factory
            .create_shared()
            .await
            .map_err(|e| PoolError::ResourceCreation(e.to_string()))?;
        let shared = Arc::new(shared);

        let size = self.config.pool_size.max(1);
        let first_id = self.state.lock().next_worker_id;
        let handles = match self.create_workers(&shared, first_id, size).await {
            Ok(handles) => handles,
            Err(e) => {
                self.factory.destroy_shared(&shared).await;
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        state.next_worker_id = first_id + size;
        state.target_size = size;
        state.slots = handles.into_iter().map(|(id, handle)| Slot::new(id, handle)).collect();
        state.shared = Some(shared);
        info!("🚀 Worker pool initialized with {} workers", size);
        Ok(())
    }

    /// Claim the first idle worker, or `None` when every worker is busy
    pub fn get_available_worker(&self) -> Option<Worker<F::Handle>> {
        let mut state = self.state.lock();
        let slot = state.slots.iter_mut().find(|slot| !slot.busy)?;
        slot.busy = true;
        slot.started_at = Some(Instant::now());
        debug!("🔒 Worker {} acquired", slot.id);
        Some(Worker::new(slot.id, Arc::clone(&slot.handle)))
    }

    /// Claim an idle worker wrapped in a lease that releases it on drop
    pub fn try_acquire(&self) -> Result<WorkerLease<'_, F>, PoolError> {
        if !self.is_initialized() {
            return Err(PoolError::NotInitialized);
        }
        self.get_available_worker()
            .map(|worker| WorkerLease { pool: self, worker })
            .ok_or(PoolError::WorkerUnavailable)
    }

    /// Wait up to `acquire_timeout` for an idle worker
    pub async fn acquire(&self) -> Result<WorkerLease<'_, F>, PoolError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            match self.try_acquire() {
                Ok(lease) => return Ok(lease),
                Err(PoolError::WorkerUnavailable) => {}
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("⏰ No worker became available within {:?}", self.config.acquire_timeout);
                return Err(PoolError::WorkerUnavailable);
            }
            let wait = self.config.acquire_poll_interval.min(deadline - now);
            let _ = timeout(wait, self.released.notified()).await;
        }
    }

    /// Return a worker to the idle set. Returns false for unknown ids.
    ///
    /// Workers above the target size are retired here instead of going idle.
    pub fn release_worker(&self, worker_id: usize) -> bool {
        let retired = {
            let mut state = self.state.lock();
            let Some(index) = state.slots.iter().position(|slot| slot.id == worker_id) else {
                return false;
            };

            let slot = &mut state.slots[index];
            slot.busy = false;
            slot.current_task = None;
            slot.started_at = None;
            slot.tasks_completed += 1;

            if state.slots.len() > state.target_size {
                Some(state.slots.remove(index))
            } else {
                None
            }
        };

        match retired {
            Some(slot) => {
                info!("📉 Worker {} retired after deferred shrink", slot.id);
                self.destroy_in_background(slot.handle);
            }
            None => {
                debug!("🔓 Worker {} released", worker_id);
                self.released.notify_one();
            }
        }
        true
    }

    /// Run `task` on a worker, waiting for one if needed. The worker is
    /// released on every exit path, including errors, panics and cancellation.
    pub async fn execute_task<T, Fut, Task>(&self, task: Task, label: Option<&str>) -> Result<T, PoolError>
    where
        Task: FnOnce(Worker<F::Handle>) -> Fut,
        Fut: Future<Output = TaskResult<T>>,
    {
        let lease = self.acquire().await?;
        let worker_id = lease.worker().id();
        let label = label.unwrap_or("task").to_string();
        self.set_current_task(worker_id, &label);

        let started = Instant::now();
        let result = task(lease.worker().clone()).await;
        let elapsed = started.elapsed();

        self.record_telemetry(worker_id, &label, result.is_ok());
        drop(lease);

        match result {
            Ok(value) => {
                debug!("✅ {} on worker {} finished in {:?}", label, worker_id, elapsed);
                Ok(value)
            }
            Err(e) => {
                error!("❌ {} on worker {} failed after {:?}: {}", label, worker_id, elapsed, e);
                Err(PoolError::Task(e.to_string()))
            }
        }
    }

    /// Change the worker count. Growth happens immediately; shrinking retires
    /// idle workers now and busy ones when they are released.
    pub async fn resize_pool(&self, size: usize) -> Result<(), PoolError> {
        let _lifecycle = self.lifecycle.lock().await;
        let size = size.max(1);

        let (shared, current, first_id) = {
            let mut state = self.state.lock();
            let shared = state.shared.clone().ok_or(PoolError::NotInitialized)?;
            state.target_size = size;
            (shared, state.slots.len(), state.next_worker_id)
        };

        if size > current {
            let added = size - current;
            let handles = self.create_workers(&shared, first_id, added).await?;
            let mut state = self.state.lock();
            state.next_worker_id = first_id + added;
            state.slots.extend(handles.into_iter().map(|(id, handle)| Slot::new(id, handle)));
            drop(state);
            for _ in 0..added {
                self.released.notify_one();
            }
            info!("📈 Worker pool grown {} -> {}", current, size);
        } else if size < current {
            let retired = {
                let mut state = self.state.lock();
                let mut excess = state.slots.len() - size;
                let mut retired = Vec::new();
                let mut index = state.slots.len();
                while excess > 0 && index > 0 {
                    index -= 1;
                    if !state.slots[index].busy {
                        retired.push(state.slots.remove(index));
                        excess -= 1;
                    }
                }
                retired
            };

            for slot in &retired {
                self.factory.destroy_worker(&slot.handle).await;
            }
            let deferred = current - size - retired.len();
            if deferred > 0 {
                info!(
                    "📉 Worker pool shrinking {} -> {} ({} busy workers retire on release)",
                    current, size, deferred
                );
            } else {
                info!("📉 Worker pool shrunk {} -> {}", current, size);
            }
        }
        Ok(())
    }

    /// Destroy every worker and the shared resource
    pub async fn cleanup(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let (slots, shared) = {
            let mut state = self.state.lock();
            state.target_size = self.config.pool_size.max(1);
            (std::mem::take(&mut state.slots), state.shared.take())
        };

        let busy = slots.iter().filter(|slot| slot.busy).count();
        if busy > 0 {
            warn!("🧹 Cleaning up worker pool with {} busy workers", busy);
        }
        for slot in &slots {
            self.factory.destroy_worker(&slot.handle).await;
        }
        if let Some(shared) = shared {
            self.factory.destroy_shared(&shared).await;
        }
        info!("🧹 Worker pool cleaned up ({} workers destroyed)", slots.len());
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().slots.iter().filter(|slot| !slot.busy).count()
    }

    pub fn get_stats(&self) -> PoolStats {
        let state = self.state.lock();
        let busy = state.slots.iter().filter(|slot| slot.busy).count();
        PoolStats {
            initialized: state.shared.is_some(),
            total_workers: state.slots.len(),
            busy_workers: busy,
            idle_workers: state.slots.len() - busy,
            target_size: state.target_size,
            tasks_executed: state.tasks_executed,
            tasks_failed: state.tasks_failed,
        }
    }

    pub fn get_worker_info(&self) -> Vec<WorkerInfo> {
        let now = Instant::now();
        self.state
            .lock()
            .slots
            .iter()
            .map(|slot| WorkerInfo {
                id: slot.id,
                busy: slot.busy,
                current_task: slot.current_task.clone(),
                busy_for_ms: slot
                    .started_at
                    .map(|started| now.saturating_duration_since(started).as_millis() as u64),
                tasks_completed: slot.tasks_completed,
                last_usage: slot.last_usage,
            })
            .collect()
    }

    async fn create_workers(
        &self,
        shared: &Arc<F::Shared>,
        first_id: usize,
        count: usize,
    ) -> Result<Vec<(usize, Arc<F::Handle>)>, PoolError> {
        let mut handles = Vec::with_capacity(count);
        for id in first_id..first_id + count {
            match self.factory.create_worker(shared, id).await {
                Ok(handle) => handles.push((id, Arc::new(handle))),
                Err(e) => {
                    error!("❌ Failed to create worker {}: {}", id, e);
                    for (_, handle) in &handles {
                        self.factory.destroy_worker(handle).await;
                    }
                    return Err(PoolError::ResourceCreation(e.to_string()));
                }
            }
        }
        Ok(handles)
    }

    fn set_current_task(&self, worker_id: usize, label: &str) {
        if let Some(slot) = self.state.lock().slots.iter_mut().find(|slot| slot.id == worker_id) {
            slot.current_task = Some(label.to_string());
        }
    }

    /// Advisory accounting; never affects scheduling
    fn record_telemetry(&self, worker_id: usize, label: &str, succeeded: bool) {
        let usage = self.process_sampler.sample_process();
        if let Some(usage) = usage {
            if usage.memory_bytes > self.config.memory_warning_bytes {
                warn!(
                    "⚠️ Worker {} high memory after {}: {:.1} MB",
                    worker_id,
                    label,
                    usage.memory_bytes as f64 / (1024.0 * 1024.0)
                );
            }
            if usage.cpu_percent > self.config.cpu_warning_percent {
                warn!("⚠️ Worker {} high CPU after {}: {:.1}%", worker_id, label, usage.cpu_percent);
            }
        }

        let mut state = self.state.lock();
        state.tasks_executed += 1;
        if !succeeded {
            state.tasks_failed += 1;
        }
        if let Some(slot) = state.slots.iter_mut().find(|slot| slot.id == worker_id) {
            slot.last_usage = usage;
        }
    }

    fn destroy_in_background(&self, handle: Arc<F::Handle>) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let factory = Arc::clone(&self.factory);
                runtime.spawn(async move {
                    factory.destroy_worker(&handle).await;
                });
            }
            Err(_) => warn!("⚠️ No runtime to destroy retired worker; dropping its handle"),
        }
    }
}

impl<H> Slot<H> {
    fn new(id: usize, handle: Arc<H>) -> Self {
        Self {
            id,
            handle,
            busy: false,
            current_task: None,
            started_at: None,
            tasks_completed: 0,
            last_usage: None,
        }
    }
}

/// Scoped ownership of a worker; dropping the lease releases it
pub struct WorkerLease<'a, F: ExecutionContextFactory> {
    pool: &'a WorkerPool<F>,
    worker: Worker<F::Handle>,
}

impl<F: ExecutionContextFactory> WorkerLease<'_, F> {
    pub fn worker(&self) -> &Worker<F::Handle> {
        &self.worker
    }
}

impl<F: ExecutionContextFactory> Drop for WorkerLease<'_, F> {
    fn drop(&mut self) {
        self.pool.release_worker(self.worker.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::BoxError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        shared_created: AtomicUsize,
        shared_destroyed: AtomicUsize,
        workers_created: AtomicUsize,
        workers_destroyed: AtomicUsize,
    }

    struct TestFactory {
        counters: Arc<Counters>,
        fail_shared: bool,
        fail_worker: Option<usize>,
    }

    impl TestFactory {
        fn new(counters: Arc<Counters>) -> Self {
            Self {
                counters,
                fail_shared: false,
                fail_worker: None,
            }
        }
    }

    #[async_trait]
    impl ExecutionContextFactory for TestFactory {
        type Shared = String;
        type Handle = usize;

        async fn create_shared(&self) -> Result<String, BoxError> {
            if self.fail_shared {
                return Err("session refused".into());
            }
            self.counters.shared_created.fetch_add(1, Ordering::SeqCst);
            Ok("session".to_string())
        }

        async fn create_worker(&self, _shared: &String, worker_id: usize) -> Result<usize, BoxError> {
            if self.fail_worker == Some(worker_id) {
                return Err("tab crashed".into());
            }
            self.counters.workers_created.fetch_add(1, Ordering::SeqCst);
            Ok(worker_id)
        }

        async fn destroy_worker(&self, _handle: &usize) {
            self.counters.workers_destroyed.fetch_add(1, Ordering::SeqCst);
        }

        async fn destroy_shared(&self, _shared: &String) {
            self.counters.shared_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(size: usize, counters: Arc<Counters>) -> WorkerPool<TestFactory> {
        WorkerPool::new(
            TestFactory::new(counters),
            WorkerPoolConfig {
                pool_size: size,
                acquire_poll_interval: Duration::from_millis(5),
                acquire_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let counters = Arc::new(Counters::default());
        let pool = pool(3, counters.clone());
        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();

        assert_eq!(counters.shared_created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.workers_created.load(Ordering::SeqCst), 3);
        assert_eq!(pool.get_stats().idle_workers, 3);
    }

    #[tokio::test]
    async fn test_initialize_propagates_creation_failure() {
        let counters = Arc::new(Counters::default());
        let pool = WorkerPool::new(
            TestFactory {
                fail_shared: true,
                ..TestFactory::new(counters.clone())
            },
            WorkerPoolConfig::default(),
        );
        assert!(matches!(pool.initialize().await, Err(PoolError::ResourceCreation(_))));
        assert!(!pool.is_initialized());

        let pool = WorkerPool::new(
            TestFactory {
                fail_worker: Some(1),
                ..TestFactory::new(counters.clone())
            },
            WorkerPoolConfig {
                pool_size: 3,
                ..Default::default()
            },
        );
        assert!(pool.initialize().await.is_err());
        assert_eq!(counters.workers_destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.shared_destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_available_worker_is_non_blocking() {
        let pool = pool(2, Arc::new(Counters::default()));
        assert!(matches!(pool.try_acquire(), Err(PoolError::NotInitialized)));
        pool.initialize().await.unwrap();

        let a = pool.get_available_worker().unwrap();
        let b = pool.get_available_worker().unwrap();
        assert_ne!(a.id(), b.id());
        assert!(pool.get_available_worker().is_none());
        assert!(matches!(pool.try_acquire(), Err(PoolError::WorkerUnavailable)));

        assert!(pool.release_worker(a.id()));
        assert!(!pool.release_worker(99));
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_task_releases_worker() {
        let pool = pool(2, Arc::new(Counters::default()));
        pool.initialize().await.unwrap();
        let idle_before = pool.idle_count();

        let result: Result<(), PoolError> = pool
            .execute_task(|_worker| async { Err::<(), BoxError>("navigation failed".into()) }, Some("audit"))
            .await;

        assert!(matches!(result, Err(PoolError::Task(_))));
        assert_eq!(pool.idle_count(), idle_before);
        assert_eq!(pool.get_stats().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_releases_worker() {
        let pool = pool(1, Arc::new(Counters::default()));
        pool.initialize().await.unwrap();

        let slow = pool.execute_task(
            |_worker| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, BoxError>(())
            },
            None,
        );
        assert!(timeout(Duration::from_millis(20), slow).await.is_err());
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_execute_task_waits_for_release() {
        let pool = Arc::new(pool(1, Arc::new(Counters::default())));
        pool.initialize().await.unwrap();

        let held = pool.get_available_worker().unwrap();
        let releaser = {
            let pool = pool.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                pool.release_worker(held.id());
            })
        };

        let value = pool
            .execute_task(|worker| async move { Ok::<_, BoxError>(*worker.handle() + 100) }, Some("wait"))
            .await
            .unwrap();
        releaser.await.unwrap();
        assert_eq!(value, 100);
    }

    #[tokio::test]
    async fn test_execute_task_times_out_when_saturated() {
        let pool = pool(1, Arc::new(Counters::default()));
        pool.initialize().await.unwrap();
        let _held = pool.get_available_worker().unwrap();

        let result = pool.execute_task(|_worker| async { Ok::<_, BoxError>(()) }, None).await;
        assert!(matches!(result, Err(PoolError::WorkerUnavailable)));
    }

    #[tokio::test]
    async fn test_resize_grows_and_defers_busy_shrink() {
        let counters = Arc::new(Counters::default());
        let pool = pool(2, counters.clone());
        pool.initialize().await.unwrap();

        pool.resize_pool(4).await.unwrap();
        assert_eq!(pool.get_stats().total_workers, 4);
        assert_eq!(counters.shared_created.load(Ordering::SeqCst), 1);

        let busy: Vec<_> = (0..3).filter_map(|_| pool.get_available_worker()).collect();
        pool.resize_pool(1).await.unwrap();

        // only the single idle worker could go immediately
        let stats = pool.get_stats();
        assert_eq!(stats.total_workers, 3);
        assert_eq!(stats.target_size, 1);

        for worker in &busy {
            pool.release_worker(worker.id());
        }
        assert_eq!(pool.get_stats().total_workers, 1);
    }

    #[tokio::test]
    async fn test_cleanup_resets_pool() {
        let counters = Arc::new(Counters::default());
        let pool = pool(3, counters.clone());
        pool.initialize().await.unwrap();
        pool.cleanup().await;

        assert!(!pool.is_initialized());
        assert_eq!(counters.workers_destroyed.load(Ordering::SeqCst), 3);
        assert_eq!(counters.shared_destroyed.load(Ordering::SeqCst), 1);

        pool.initialize().await.unwrap();
        assert_eq!(counters.shared_created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_worker_info_tracks_tasks() {
        let pool = pool(1, Arc::new(Counters::default()));
        pool.initialize().await.unwrap();
        pool.execute_task(|_worker| async { Ok::<_, BoxError>(()) }, Some("home"))
            .await
            .unwrap();

        let info = pool.get_worker_info();
        assert_eq!(info.len(), 1);
        assert!(!info[0].busy);
        assert_eq!(info[0].tasks_completed, 1);
    }
}
