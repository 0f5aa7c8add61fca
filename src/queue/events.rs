use super::types::{QueueStatistics, WorkItem};

/// Observer for queue lifecycle events.
///
/// Every method has a no-op default, so implementors only override the
/// events they care about. Callbacks run on the worker slot that produced the
/// event and should return quickly.
pub trait QueueEvents<P, R>: Send + Sync {
    fn on_item_added(&self, _item: &WorkItem<P, R>) {}

    fn on_item_started(&self, _item: &WorkItem<P, R>) {}

    fn on_item_completed(&self, _item: &WorkItem<P, R>) {}

    fn on_item_failed(&self, _item: &WorkItem<P, R>) {}

    fn on_item_retrying(&self, _item: &WorkItem<P, R>) {}

    fn on_progress_update(&self, _statistics: &QueueStatistics) {}

    fn on_queue_empty(&self) {}

    fn on_error(&self, _message: &str) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl<P, R> QueueEvents<P, R> for NoopEvents {}
