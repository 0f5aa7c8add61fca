use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool is not initialized")]
    NotInitialized,

    #[error("No idle worker available")]
    WorkerUnavailable,

    #[error("Failed to create execution context: {0}")]
    ResourceCreation(String),

    #[error("Task failed: {0}")]
    Task(String),
}
