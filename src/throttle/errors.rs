use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("Request to {url} failed after {attempts} attempts: {message}")]
    Exhausted { url: String, attempts: u32, message: String },

    #[error("Invalid throttle configuration: {0}")]
    InvalidConfig(String),
}
