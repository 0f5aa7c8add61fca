use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::errors::QueueError;
use super::types::{ItemStatus, QueueStatistics, WorkItem};

/// Priority queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityQueueConfig {
    /// Maximum number of non-terminal items held at once
    pub max_size: usize,
    pub default_priority: i32,
    pub max_attempts: u32,
    /// Wait time after which a pending item earns a starvation boost
    pub starvation_threshold: Duration,
    pub starvation_boost: i32,
    /// Priority added when a failed item is re-inserted for another attempt
    pub retry_priority_boost: i32,
}

impl Default for PriorityQueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10000,
            default_priority: 0,
            max_attempts: 3,
            starvation_threshold: Duration::from_secs(30),
            starvation_boost: 1,
            retry_priority_boost: 1,
        }
    }
}

/// Holding area for work items, ordered by priority with FIFO tie-break.
///
/// The queue owns every item for its whole lifetime; the status field is the
/// bucket an item lives in, so an id can never be in two buckets at once.
#[derive(Debug)]
pub struct PriorityQueue<P, R> {
    config: PriorityQueueConfig,
    items: HashMap<String, WorkItem<P, R>>,
    /// Retrying items that keep their execution slot; never handed to `dequeue`
    held: HashSet<String>,
    /// Non-terminal item count, kept in step with every status transition
    active: usize,
    next_sequence: u64,
    total_enqueued: u64,
    total_removed: u64,
}

impl<P: Clone, R: Clone> PriorityQueue<P, R> {
    pub fn new(config: PriorityQueueConfig) -> Self {
        Self {
            config,
            items: HashMap::new(),
            held: HashSet::new(),
            active: 0,
            next_sequence: 0,
            total_enqueued: 0,
            total_removed: 0,
        }
    }

    pub fn config(&self) -> &PriorityQueueConfig {
        &self.config
    }

    /// Add a new pending item and return its id
    pub fn enqueue(&mut self, payload: P, priority: Option<i32>, id: Option<String>) -> Result<String, QueueError> {
        self.enqueue_with_attempts(payload, priority, id, self.config.max_attempts)
    }

    /// Add a new pending item with an explicit attempt budget
    pub fn enqueue_with_attempts(
        &mut self,
        payload: P,
        priority: Option<i32>,
        id: Option<String>,
        max_attempts: u32,
    ) -> Result<String, QueueError> {
        if self.active >= self.config.max_size {
            warn!("🚫 Queue full ({} items), rejecting enqueue", self.config.max_size);
            return Err(QueueError::CapacityExceeded(self.config.max_size));
        }

        let sequence = self.next_sequence;
        let id = match id {
            Some(id) if self.items.contains_key(&id) => return Err(QueueError::DuplicateId(id)),
            Some(id) => id,
            None => self.generate_id(sequence),
        };
        self.next_sequence += 1;

        let priority = priority.unwrap_or(self.config.default_priority);
        let item = WorkItem::new(id.clone(), payload, priority, max_attempts.max(1), sequence);
        self.items.insert(id.clone(), item);
        self.active += 1;
        self.total_enqueued += 1;

        debug!("📥 Queued item {} (priority: {}, queue size: {})", id, priority, self.items.len());
        Ok(id)
    }

    /// Claim the most urgent pending or retrying item.
    ///
    /// Starvation boosts are applied first, then the head of
    /// (priority desc, enqueue order asc) moves to `processing`.
    pub fn dequeue(&mut self) -> Option<WorkItem<P, R>> {
        let now = Instant::now();
        self.apply_starvation_boost(now);

        let id = self
            .items
            .values()
            .filter(|item| self.is_claimable(item))
            .max_by(|a, b| order_key(a).cmp(&order_key(b)))
            .map(|item| item.id.clone())?;

        let item = self.items.get_mut(&id)?;
        item.status = ItemStatus::Processing;
        item.started_at = Some(Utc::now());
        item.started_instant = Some(now);
        item.waited = Some(now.saturating_duration_since(item.queued_instant));

        debug!("🏃 Dequeued item {} (priority: {}, attempt: {})", item.id, item.priority, item.attempts + 1);
        Some(item.clone())
    }

    /// Mark a processing item as completed
    pub fn complete(&mut self, id: &str, result: R) -> Result<WorkItem<P, R>, QueueError> {
        let item = self.processing_item(id)?;
        let now = Instant::now();
        item.status = ItemStatus::Completed;
        item.completed_at = Some(Utc::now());
        item.duration = item.started_instant.map(|started| now.saturating_duration_since(started));
        item.result = Some(result);

        debug!("✅ Item {} completed in {:?}", item.id, item.duration);
        let completed = item.clone();
        self.active -= 1;
        Ok(completed)
    }

    /// Record a failed attempt of a processing item.
    ///
    /// The item becomes terminally `failed` once its attempts are used up;
    /// otherwise it is boosted and re-inserted as `retrying`.
    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> Result<WorkItem<P, R>, QueueError> {
        let retry_boost = self.config.retry_priority_boost;
        let item = self.processing_item(id)?;
        let now = Instant::now();
        item.attempts += 1;
        item.last_error = Some(error.into());
        item.duration = item.started_instant.map(|started| now.saturating_duration_since(started));

        let exhausted = item.attempts >= item.max_attempts;
        if exhausted {
            item.status = ItemStatus::Failed;
            item.completed_at = Some(Utc::now());
            debug!("❌ Item {} failed after {} attempts", item.id, item.attempts);
        } else {
            item.status = ItemStatus::Retrying;
            item.priority += retry_boost;
            item.started_instant = None;
            item.queued_instant = now;
            item.last_boost_instant = None;
            debug!(
                "🔁 Item {} re-queued for attempt {} (priority: {})",
                item.id,
                item.attempts + 1,
                item.priority
            );
        }

        let snapshot = item.clone();
        if exhausted {
            self.active -= 1;
        }
        Ok(snapshot)
    }

    /// Count a failed attempt while the item keeps its execution slot.
    ///
    /// The item reads as `retrying` until `resume_attempt`, but it is held for
    /// its slot: `dequeue` never hands it to anyone else.
    pub fn record_retry(&mut self, id: &str, error: impl Into<String>) -> Result<WorkItem<P, R>, QueueError> {
        let item = self.processing_item(id)?;
        item.attempts += 1;
        item.last_error = Some(error.into());
        item.status = ItemStatus::Retrying;
        let snapshot = item.clone();
        self.held.insert(id.to_string());
        Ok(snapshot)
    }

    /// Start the next attempt of an item held by `record_retry`
    pub fn resume_attempt(&mut self, id: &str) -> Result<WorkItem<P, R>, QueueError> {
        let item = self.items.get_mut(id).ok_or_else(|| QueueError::ItemNotFound(id.to_string()))?;
        if item.status != ItemStatus::Retrying || !self.held.contains(id) {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                expected: ItemStatus::Retrying,
                found: item.status,
            });
        }

        self.held.remove(id);
        item.status = ItemStatus::Processing;
        debug!("🔁 Item {} starting attempt {}", item.id, item.attempts + 1);
        Ok(item.clone())
    }

    /// Move a retrying item back to pending, clearing its timing fields.
    /// An item held for its slot is released back to general claiming.
    pub fn retry(&mut self, id: &str) -> Result<WorkItem<P, R>, QueueError> {
        let item = self.items.get_mut(id).ok_or_else(|| QueueError::ItemNotFound(id.to_string()))?;
        if item.status != ItemStatus::Retrying {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                expected: ItemStatus::Retrying,
                found: item.status,
            });
        }

        self.held.remove(id);
        item.status = ItemStatus::Pending;
        item.started_at = None;
        item.completed_at = None;
        item.duration = None;
        item.waited = None;
        item.started_instant = None;
        item.last_boost_instant = None;
        item.queued_instant = Instant::now();
        Ok(item.clone())
    }

    pub fn remove(&mut self, id: &str) -> Option<WorkItem<P, R>> {
        let removed = self.items.remove(id)?;
        self.held.remove(id);
        if !removed.status.is_terminal() {
            self.active -= 1;
        }
        self.total_removed += 1;
        Some(removed)
    }

    /// Drop every item; returns how many were removed
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        self.held.clear();
        self.active = 0;
        self.total_removed += count as u64;
        count
    }

    pub fn update_priority(&mut self, id: &str, priority: i32) -> Result<(), QueueError> {
        let item = self.items.get_mut(id).ok_or_else(|| QueueError::ItemNotFound(id.to_string()))?;
        debug!("🔀 Item {} priority {} -> {}", id, item.priority, priority);
        item.priority = priority;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&WorkItem<P, R>> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Any pending or retrying item left to claim
    pub fn has_eligible(&self) -> bool {
        self.items.values().any(|item| self.is_claimable(item))
    }

    /// Items that are neither completed nor failed
    pub fn active_len(&self) -> usize {
        self.active
    }

    pub fn count_by_status(&self, status: ItemStatus) -> usize {
        self.items.values().filter(|item| item.status == status).count()
    }

    pub fn ids_with_status(&self, status: ItemStatus) -> Vec<String> {
        let mut ids: Vec<&WorkItem<P, R>> = self.items.values().filter(|item| item.status == status).collect();
        ids.sort_by_key(|item| item.sequence);
        ids.into_iter().map(|item| item.id.clone()).collect()
    }

    /// Eligible ids in current dequeue order, without applying boosts
    pub fn eligible_ids(&self) -> Vec<String> {
        let mut eligible: Vec<&WorkItem<P, R>> = self.items.values().filter(|item| self.is_claimable(item)).collect();
        eligible.sort_by(|a, b| order_key(b).cmp(&order_key(a)));
        eligible.into_iter().map(|item| item.id.clone()).collect()
    }

    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued
    }

    pub fn total_removed(&self) -> u64 {
        self.total_removed
    }

    pub fn get_stats(&self) -> QueueStatistics {
        let mut stats = QueueStatistics {
            total: self.items.len(),
            ..Default::default()
        };

        let mut priority_sum = 0i64;
        let mut wait_sum = Duration::ZERO;
        let mut wait_count = 0u32;
        let mut processing_sum = Duration::ZERO;
        let mut processing_count = 0u32;

        for item in self.items.values() {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Processing => stats.processing += 1,
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Retrying => stats.retrying += 1,
            }
            priority_sum += item.priority as i64;

            if let Some(waited) = item.waited {
                wait_sum += waited;
                wait_count += 1;
            }
            if item.status == ItemStatus::Completed {
                if let Some(duration) = item.duration {
                    processing_sum += duration;
                    processing_count += 1;
                }
            }
        }

        if stats.total > 0 {
            stats.average_priority = priority_sum as f64 / stats.total as f64;
            stats.progress_percent = (stats.completed + stats.failed) as f64 / stats.total as f64 * 100.0;
        }
        if wait_count > 0 {
            stats.average_wait_time_ms = wait_sum.as_secs_f64() * 1000.0 / wait_count as f64;
        }
        if processing_count > 0 {
            stats.average_processing_time_ms = processing_sum.as_secs_f64() * 1000.0 / processing_count as f64;
        }
        stats
    }

    /// Raise the priority of items that waited past the threshold.
    ///
    /// An item is boosted at most once per threshold interval, so repeated
    /// evaluations do not compound.
    fn apply_starvation_boost(&mut self, now: Instant) {
        let threshold = self.config.starvation_threshold;
        let boost = self.config.starvation_boost;
        if boost == 0 || threshold.is_zero() {
            return;
        }

        for item in self.items.values_mut().filter(|item| item.status == ItemStatus::Pending) {
            let reference = item.last_boost_instant.unwrap_or(item.queued_instant);
            if now.saturating_duration_since(reference) >= threshold {
                item.priority += boost;
                item.last_boost_instant = Some(now);
                debug!("⏫ Starvation boost for item {} (priority now {})", item.id, item.priority);
            }
        }
    }

    fn processing_item(&mut self, id: &str) -> Result<&mut WorkItem<P, R>, QueueError> {
        let item = self.items.get_mut(id).ok_or_else(|| QueueError::ItemNotFound(id.to_string()))?;
        if item.status != ItemStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                expected: ItemStatus::Processing,
                found: item.status,
            });
        }
        Ok(item)
    }

    fn is_claimable(&self, item: &WorkItem<P, R>) -> bool {
        item.status.is_eligible() && !self.held.contains(&item.id)
    }

    fn generate_id(&self, sequence: u64) -> String {
        let mut candidate = sequence;
        loop {
            let id = format!("item-{}", candidate);
            if !self.items.contains_key(&id) {
                return id;
            }
            candidate += 1;
        }
    }
}

fn order_key<P, R>(item: &WorkItem<P, R>) -> (i32, Reverse<u64>) {
    (item.priority, Reverse(item.sequence))
}

impl<P: Clone, R: Clone> Default for PriorityQueue<P, R> {
    fn default() -> Self {
        Self::new(PriorityQueueConfig::default())
    }
}
