pub mod errors;
pub mod factory;
pub mod worker_pool;

pub use errors::PoolError;
pub use factory::{ExecutionContextFactory, Worker};
pub use worker_pool::{PoolStats, WorkerInfo, WorkerLease, WorkerPool, WorkerPoolConfig};
