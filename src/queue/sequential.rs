use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use super::adapter::{AdapterCore, AdapterOptions, ItemOutcome, QueueAdapter};
use super::errors::QueueError;
use super::processor::Processor;
use super::types::{QueueConfig, QueueResult, QueueStatistics, WorkItem};

/// Single-slot adapter: every item runs to a terminal outcome before the next
/// one is claimed, so execution order equals admission order.
pub struct SequentialQueue<P, R> {
    core: Arc<AdapterCore<P, R>>,
}

impl<P, R> SequentialQueue<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    pub fn new(config: QueueConfig) -> Self {
        Self::with_options(config, AdapterOptions::default())
    }

    pub fn with_options(config: QueueConfig, options: AdapterOptions<P, R>) -> Self {
        Self {
            core: Arc::new(AdapterCore::new("sequential", config, options)),
        }
    }
}

#[async_trait]
impl<P, R> QueueAdapter<P, R> for SequentialQueue<P, R>
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
        info!("🚀 Sequential run started");

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        while let Some(item) = self.core.claim_next().await {
            match self.core.execute(item, &processor).await {
                Some(ItemOutcome::Completed(item)) => completed.push(item),
                Some(ItemOutcome::Failed(item)) => failed.push(item),
                None => {}
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
