use std::future::Future;

use async_trait::async_trait;

use super::types::TaskResult;

/// The externally supplied unit of work run for each item payload.
///
/// Any `Fn(P) -> impl Future<Output = TaskResult<R>>` closure is a processor.
#[async_trait]
pub trait Processor<P, R>: Send + Sync {
    async fn process(&self, payload: P) -> TaskResult<R>;
}

#[async_trait]
impl<P, R, F, Fut> Processor<P, R> for F
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult<R>> + Send + 'static,
{
    async fn process(&self, payload: P) -> TaskResult<R> {
        (self)(payload).await
    }
}
