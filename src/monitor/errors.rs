use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Resource sampling failed: {0}")]
    Sampling(String),
}
