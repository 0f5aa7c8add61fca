use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info};

use super::adapter::{AdapterCore, AdapterOptions, ItemOutcome, QueueAdapter};
use super::errors::QueueError;
use super::processor::Processor;
use super::types::{QueueConfig, QueueResult, QueueStatistics, WorkItem};

/// Adapter with `max_concurrent` independent execution slots.
///
/// Each slot loops claim, execute, repeat until the queue has nothing eligible
/// left or the adapter is paused. Claims go through the queue lock, so admission
/// order follows priority while completion order is unconstrained.
pub struct ParallelQueue<P, R> {
    core: Arc<AdapterCore<P, R>>,
}

impl<P, R> ParallelQueue<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(config: QueueConfig) -> Self {
        Self::with_options(config, AdapterOptions::default())
    }

    pub fn with_options(config: QueueConfig, options: AdapterOptions<P, R>) -> Self {
        Self {
            core: Arc::new(AdapterCore::new("parallel", config, options)),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.core.config.max_concurrent.max(1)
    }

    async fn run_slot(
        core: Arc<AdapterCore<P, R>>,
        slot: usize,
        processor: Arc<dyn Processor<P, R>>,
    ) -> Vec<ItemOutcome<P, R>> {
        let mut outcomes = Vec::new();
        while let Some(item) = core.claim_next().await {
            debug!("🧵 Slot {} claimed item {}", slot, item.id);
            if let Some(outcome) = core.execute(item, &processor).await {
                outcomes.push(outcome);
            }
        }
        debug!("🧵 Slot {} idle after {} items", slot, outcomes.len());
        outcomes
    }
}

#[async_trait]
impl<P, R> QueueAdapter<P, R> for ParallelQueue<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn enqueue(&self, batch: Vec<P>, priority: Option<i32>) -> Result<Vec<String>, QueueError> {
        self.core.enqueue(batch.into_iter().map(|payload| (payload, priority)).collect())
    }

    fn enqueue_prioritized(&self, batch: Vec<(P, Option<i32>)>) -> Result<Vec<String>, QueueError> {
        self.core.enqueue(batch)
    }

    async fn process(&self, processor: Arc<dyn Processor<P, R>>) -> Result<QueueResult<P, R>, QueueError> {
        let _processing = self.core.begin_processing()?;
        let _heartbeat = self.core.start_heartbeat();
        let started = Instant::now();
        let slots = self.slot_count();
        info!("🚀 Parallel run started with {} slots", slots);

        let mut workers = JoinSet::new();
        for slot in 0..slots {
            workers.spawn(Self::run_slot(Arc::clone(&self.core), slot, Arc::clone(&processor)));
        }

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome {
                            ItemOutcome::Completed(item) => completed.push(item),
                            ItemOutcome::Failed(item) => failed.push(item),
                        }
                    }
                }
                Err(e) => self.core.report_error(QueueError::from(e).to_string()),
            }
        }

        Ok(self.core.finish(completed, failed, started))
    }

    fn pause(&self) {
        self.core.pause();
    }

    fn resume(&self) {
        self.core.resume();
    }

    fn is_paused(&self) -> bool {
        self.core.is_paused()
    }

    fn is_processing(&self) -> bool {
        self.core.is_processing()
    }

    fn clear(&self) -> usize {
        self.core.clear()
    }

    fn get_statistics(&self) -> QueueStatistics {
        self.core.statistics()
    }

    fn get_item(&self, id: &str) -> Option<WorkItem<P, R>> {
        self.core.with_queue(|queue| queue.get(id).cloned())
    }

    fn update_priority(&self, id: &str, priority: i32) -> Result<(), QueueError> {
        self.core.with_queue(|queue| queue.update_priority(id, priority))
    }

    fn name(&self) -> &'static str {
        self.core.name
    }
}
