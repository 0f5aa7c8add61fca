use std::time::Duration;

use thiserror::Error;

use super::types::ItemStatus;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue capacity exceeded (max size: {0})")]
    CapacityExceeded(usize),

    #[error("Duplicate item id: {0}")]
    DuplicateId(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Invalid transition for item {id}: expected {expected}, found {found}")]
    InvalidTransition {
        id: String,
        expected: ItemStatus,
        found: ItemStatus,
    },

    #[error("Processor error: {0}")]
    Processor(String),

    #[error("Processor timed out after {0:?}")]
    Timeout(Duration),

    #[error("Queue is already processing")]
    AlreadyProcessing,

    #[error("Invalid priority pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A batch stopped partway; the items in `admitted` stay queued
    #[error("Batch enqueue stopped after {} items: {source}", .admitted.len())]
    PartialEnqueue {
        admitted: Vec<String>,
        #[source]
        source: Box<QueueError>,
    },

    #[error("Coordination error: {0}")]
    Coordination(String),
}

impl From<tokio::task::JoinError> for QueueError {
    fn from(err: tokio::task::JoinError) -> Self {
        QueueError::Coordination(format!("worker slot terminated: {}", err))
    }
}
