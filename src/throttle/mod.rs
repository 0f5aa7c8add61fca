pub mod errors;
pub mod network_throttler;
pub mod throttled_processor;

pub use errors::ThrottleError;
pub use network_throttler::{
    NetworkThrottler, RequestRecord, ThrottleConfig, ThrottleConfigUpdate, ThrottleRequest, ThrottleStats,
};
pub use throttled_processor::ThrottledProcessor;
